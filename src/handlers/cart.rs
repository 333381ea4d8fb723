use axum::{
    extract::{Path, State},
    response::Response,
    Json,
};
use uuid::Uuid;
use validator::Validate;

use super::common::success_response;
use crate::{
    auth::AuthUser,
    errors::ServiceError,
    services::cart::{AddCartItemRequest, CartView, UpdateCartItemRequest},
    ApiResponse, AppState,
};

#[utoipa::path(
    get,
    path = "/api/v1/cart",
    summary = "View cart",
    description = "Re-prices every cart line against the live catalog and previews totals",
    responses(
        (status = 200, description = "Current cart", body = ApiResponse<CartView>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Cart"
)]
pub async fn get_cart(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Response, ServiceError> {
    let cart = state.cart_service().view(user.user_id).await?;
    Ok(success_response(cart))
}

#[utoipa::path(
    post,
    path = "/api/v1/cart/items",
    summary = "Add to cart",
    description = "Adds a line, or overwrites the quantity of the same item, size and colour",
    request_body = AddCartItemRequest,
    responses(
        (status = 200, description = "Updated cart", body = ApiResponse<CartView>),
        (status = 400, description = "Invalid line or item no longer available", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Cart"
)]
pub async fn add_cart_item(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<AddCartItemRequest>,
) -> Result<Response, ServiceError> {
    request.validate()?;
    let service = state.cart_service();
    service.add_item(user.user_id, request).await?;
    Ok(success_response(service.view(user.user_id).await?))
}

#[utoipa::path(
    patch,
    path = "/api/v1/cart/items/{id}",
    summary = "Change line quantity",
    params(("id" = Uuid, Path, description = "Cart line id")),
    request_body = UpdateCartItemRequest,
    responses(
        (status = 200, description = "Updated cart", body = ApiResponse<CartView>),
        (status = 400, description = "Quantity out of range", body = crate::errors::ErrorResponse),
        (status = 404, description = "Cart line not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Cart"
)]
pub async fn update_cart_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(line_id): Path<Uuid>,
    Json(request): Json<UpdateCartItemRequest>,
) -> Result<Response, ServiceError> {
    request.validate()?;
    let service = state.cart_service();
    service
        .update_quantity(user.user_id, line_id, request.quantity)
        .await?;
    Ok(success_response(service.view(user.user_id).await?))
}

#[utoipa::path(
    delete,
    path = "/api/v1/cart/items/{id}",
    summary = "Remove cart line",
    params(("id" = Uuid, Path, description = "Cart line id")),
    responses(
        (status = 200, description = "Updated cart", body = ApiResponse<CartView>),
        (status = 404, description = "Cart line not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Cart"
)]
pub async fn remove_cart_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(line_id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let service = state.cart_service();
    service.remove_item(user.user_id, line_id).await?;
    Ok(success_response(service.view(user.user_id).await?))
}
