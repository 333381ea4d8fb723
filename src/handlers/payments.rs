use axum::{extract::State, Json};

use crate::{
    auth::AuthUser,
    errors::ServiceError,
    services::payments::{
        CreatePaymentOrderRequest, CreatePaymentOrderResponse, VerifyPaymentRequest,
        VerifyPaymentResponse,
    },
    AppState,
};

#[utoipa::path(
    post,
    path = "/api/v1/payments/create-order",
    summary = "Start a gateway payment",
    description = "Snapshots the cart, prices it server-side and opens a Razorpay order for the browser checkout",
    request_body = CreatePaymentOrderRequest,
    responses(
        (status = 200, description = "Gateway order created", body = CreatePaymentOrderResponse),
        (status = 400, description = "Empty cart, unserviceable area or item gone", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 422, description = "Insufficient stock", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment gateway unavailable", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Payments"
)]
pub async fn create_payment_order(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<CreatePaymentOrderRequest>,
) -> Result<Json<CreatePaymentOrderResponse>, ServiceError> {
    let response = state
        .payment_service()
        .initiate_payment(user.user_id, request)
        .await?;
    Ok(Json(response))
}

#[utoipa::path(
    post,
    path = "/api/v1/payments/verify",
    summary = "Verify a completed checkout",
    description = "Checks the checkout signature and finalizes the payment into an order. Safe to retry.",
    request_body = VerifyPaymentRequest,
    responses(
        (status = 200, description = "Payment finalized", body = VerifyPaymentResponse),
        (status = 400, description = "Invalid signature, failed payment or validation error", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Payment belongs to another user", body = crate::errors::ErrorResponse),
        (status = 404, description = "No such pending payment", body = crate::errors::ErrorResponse),
        (status = 429, description = "Too many verification attempts", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Payments"
)]
pub async fn verify_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<VerifyPaymentRequest>,
) -> Result<Json<VerifyPaymentResponse>, ServiceError> {
    let response = state
        .payment_service()
        .verify_payment(user.user_id, request)
        .await?;
    Ok(Json(response))
}
