use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Nursery Storefront API",
        version = "1.0.0",
        description = r#"
# Nursery Storefront API

Cart, checkout and payment finalization for an online plant nursery.

## Checkout flows

- **Cash on delivery**: `POST /api/v1/orders` turns the cart into an order immediately.
- **Gateway payment**: `POST /api/v1/payments/create-order` opens a Razorpay order; the
  browser checkout then confirms through `POST /api/v1/payments/verify`, and Razorpay
  independently calls `POST /api/v1/payments/webhook`. Either confirmation creates the
  order exactly once.

## Authentication

Customer and admin endpoints require a JWT bearer token:

```
Authorization: Bearer <your-jwt-token>
```

## Error Handling

Errors share one body shape with a stable machine-readable `code`:

```json
{
  "error": "Bad Request",
  "code": "INVALID_SIGNATURE",
  "message": "Invalid payment signature",
  "request_id": "2f1d...",
  "timestamp": "2024-01-01T00:00:00Z"
}
```
        "#
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Cart", description = "Shopping cart endpoints"),
        (name = "Orders", description = "Order placement and history"),
        (name = "Payments", description = "Gateway payment endpoints"),
        (name = "Pincodes", description = "Delivery availability"),
        (name = "Health", description = "Health check endpoints"),
        (name = "Admin", description = "Administrative endpoints")
    ),
    paths(
        // Cart
        crate::handlers::cart::get_cart,
        crate::handlers::cart::add_cart_item,
        crate::handlers::cart::update_cart_item,
        crate::handlers::cart::remove_cart_item,

        // Orders
        crate::handlers::orders::create_order,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::cancel_order,

        // Admin
        crate::handlers::admin::update_order_status,

        // Payments
        crate::handlers::payments::create_payment_order,
        crate::handlers::payments::verify_payment,

        // Webhooks
        crate::handlers::payment_webhooks::payment_webhook,

        // Pincodes & Health
        crate::handlers::pincodes::check_pincode,
        crate::handlers::health::health_check,
    ),
    components(
        schemas(
            crate::ApiResponse<serde_json::Value>,

            // Cart types
            crate::services::cart::CartView,
            crate::services::cart::CartViewLine,
            crate::services::cart::CartSnapshotItem,
            crate::services::cart::AddCartItemRequest,
            crate::services::cart::UpdateCartItemRequest,
            crate::services::totals::OrderTotals,

            // Order types
            crate::services::orders::OrderResponse,
            crate::services::orders::OrderItemResponse,
            crate::services::orders::ShippingDetails,
            crate::services::orders::DirectOrderRequest,
            crate::services::orders::UpdateOrderStatusRequest,
            crate::entities::OrderStatus,
            crate::entities::PaymentMethod,
            crate::entities::CatalogItemKind,

            // Payment types
            crate::services::payments::CreatePaymentOrderRequest,
            crate::services::payments::CreatePaymentOrderResponse,
            crate::services::payments::CheckoutPrefill,
            crate::services::payments::VerifyPaymentRequest,
            crate::services::payments::VerifyPaymentResponse,
            crate::services::payments::WebhookStatus,
            crate::handlers::payment_webhooks::WebhookAck,

            crate::handlers::pincodes::PincodeAvailability,
            crate::handlers::health::HealthResponse,

            // Error types
            crate::errors::ErrorResponse
        )
    ),
    modifiers(&BearerAuth)
)]
pub struct ApiDocV1;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "Bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDocV1::openapi())
}
