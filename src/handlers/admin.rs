use axum::{
    extract::{Path, State},
    response::Response,
    Json,
};
use tracing::info;

use super::common::success_response;
use crate::{
    auth::AdminUser,
    errors::ServiceError,
    services::orders::{OrderResponse, UpdateOrderStatusRequest},
    ApiResponse, AppState,
};

#[utoipa::path(
    put,
    path = "/api/v1/admin/orders/{order_number}/status",
    summary = "Update order status",
    description = "Moves an order through fulfilment. CANCELLED and REFUNDED restore stock and are final.",
    params(("order_number" = String, Path, description = "Public order number")),
    request_body = UpdateOrderStatusRequest,
    responses(
        (status = 200, description = "Order updated", body = ApiResponse<OrderResponse>),
        (status = 400, description = "Order already cancelled or refunded", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Admin role required", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Admin"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(order_number): Path<String>,
    Json(request): Json<UpdateOrderStatusRequest>,
) -> Result<Response, ServiceError> {
    info!(admin_id = %admin.user_id, %order_number, status = %request.status, "admin status change");
    let order = state
        .order_service()
        .update_order_status(&order_number, request)
        .await?;
    Ok(success_response(order))
}
