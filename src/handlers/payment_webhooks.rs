use axum::{extract::State, http::HeaderMap, Json};
use bytes::Bytes;
use serde::Serialize;
use tracing::{error, warn};
use utoipa::ToSchema;

use crate::{errors::ServiceError, services::payments::WebhookStatus, AppState};

const SIGNATURE_HEADERS: [&str; 2] = ["x-signature", "x-razorpay-signature"];

#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookAck {
    pub status: WebhookStatus,
}

fn signature_header(headers: &HeaderMap) -> Option<&str> {
    SIGNATURE_HEADERS
        .iter()
        .find_map(|name| headers.get(*name))
        .and_then(|value| value.to_str().ok())
}

// POST /api/v1/payments/webhook
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    request_body = String,
    responses(
        (status = 200, description = "Webhook acknowledged", body = WebhookAck),
        (status = 400, description = "Missing or invalid signature", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ServiceError> {
    let service = state.payment_service();

    // The signature covers the raw bytes, so it is checked before parsing.
    if let Err(err) = service.authenticate_webhook(&body, signature_header(&headers)) {
        warn!("payment webhook signature verification failed");
        return Err(err);
    }

    // Our failures are acknowledged so the processor does not retry into them.
    let status = match service.handle_webhook_event(&body).await {
        Ok(status) => status,
        Err(err) => {
            error!(error = %err, code = err.code(), "payment webhook processing failed");
            WebhookStatus::Error
        }
    };

    Ok(Json(WebhookAck { status }))
}
