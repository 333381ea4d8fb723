use axum::{
    extract::{Path, State},
    response::Response,
    Json,
};

use super::common::{created_response, success_response};
use crate::{
    auth::AuthUser,
    errors::ServiceError,
    services::orders::{DirectOrderRequest, OrderResponse},
    ApiResponse, AppState,
};

#[utoipa::path(
    post,
    path = "/api/v1/orders",
    summary = "Place cash-on-delivery order",
    description = "Turns the caller's cart into an order paid on delivery",
    request_body = DirectOrderRequest,
    responses(
        (status = 201, description = "Order placed", body = ApiResponse<OrderResponse>,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "Empty cart, unserviceable area, invalid coupon or item gone", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 422, description = "Insufficient stock", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<DirectOrderRequest>,
) -> Result<Response, ServiceError> {
    let order = state
        .order_service()
        .place_direct_order(user.user_id, request)
        .await?;
    Ok(created_response(order))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders",
    summary = "List my orders",
    description = "The caller's orders, newest first",
    responses(
        (status = 200, description = "Orders retrieved successfully", body = ApiResponse<Vec<OrderResponse>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Response, ServiceError> {
    let orders = state.order_service().list_orders(user.user_id).await?;
    Ok(success_response(orders))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{order_number}",
    summary = "Get order by number",
    params(("order_number" = String, Path, description = "Public order number")),
    responses(
        (status = 200, description = "Order retrieved successfully", body = ApiResponse<OrderResponse>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_number): Path<String>,
) -> Result<Response, ServiceError> {
    let order = state
        .order_service()
        .get_order(user.user_id, &order_number)
        .await?;
    Ok(success_response(order))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/{order_number}/cancel",
    summary = "Cancel my order",
    description = "Allowed while the order is pending or paid. Restores stock and coupon usage.",
    params(("order_number" = String, Path, description = "Public order number")),
    responses(
        (status = 200, description = "Order cancelled", body = ApiResponse<OrderResponse>),
        (status = 400, description = "Order can no longer be cancelled", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_number): Path<String>,
) -> Result<Response, ServiceError> {
    let order = state
        .order_service()
        .cancel_own_order(user.user_id, &order_number)
        .await?;
    Ok(success_response(order))
}
