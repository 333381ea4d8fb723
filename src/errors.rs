use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::{error::DbErr, SqlErr};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

fn current_request_id() -> Option<String> {
    crate::middleware_helpers::request_id::current_request_id()
        .map(|rid| rid.as_str().to_string())
}

/// Error body returned by every endpoint except the webhook.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Unprocessable Entity",
    "code": "INSUFFICIENT_STOCK",
    "message": "Insufficient stock for Money Plant (6 inch): 1 available, 2 requested",
    "request_id": "req-abc123xyz",
    "timestamp": "2026-10-19T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category
    pub error: String,
    /// Stable machine-readable error code
    pub code: String,
    /// Human-readable error description
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Item {item_id} is no longer available")]
    ItemGone { item_id: Uuid },

    #[error("Insufficient stock for {name}: {available} available, {requested} requested")]
    InsufficientStock {
        item_id: Uuid,
        name: String,
        available: i32,
        requested: i32,
    },

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Delivery is not available for pincode {0}")]
    AreaNotServiceable(String),

    #[error("Coupon {0} is invalid or exhausted")]
    CouponInvalid(String),

    #[error("No payment record for gateway order {0}")]
    PaymentRecordNotFound(String),

    #[error("Payment for gateway order {0} has already failed")]
    PaymentAlreadyFailed(String),

    #[error("Payment signature verification failed")]
    InvalidSignature,

    #[error("Captured amount {received} does not match expected {expected} (smallest unit)")]
    AmountMismatch { expected: i64, received: i64 },

    #[error("Order {order_number} is already {status}")]
    AlreadyTerminal {
        order_number: String,
        status: crate::entities::OrderStatus,
    },

    #[error("Payment gateway error: {0}")]
    GatewayError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::SerializationError(err.to_string())
    }
}

impl ServiceError {
    /// Single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DatabaseError(_) | Self::SerializationError(_) | Self::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::NotFound(_) | Self::PaymentRecordNotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_)
            | Self::ItemGone { .. }
            | Self::EmptyCart
            | Self::AreaNotServiceable(_)
            | Self::CouponInvalid(_)
            | Self::PaymentAlreadyFailed(_)
            | Self::InvalidSignature
            | Self::AmountMismatch { .. }
            | Self::AlreadyTerminal { .. } => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            Self::InsufficientStock { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::GatewayError(_) => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::DatabaseError(_) => "DATABASE_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::ValidationError(_) => "VALIDATION_ERROR",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::RateLimitExceeded => "RATE_LIMITED",
            Self::ItemGone { .. } => "ITEM_GONE",
            Self::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            Self::EmptyCart => "EMPTY_CART",
            Self::AreaNotServiceable(_) => "AREA_NOT_SERVICEABLE",
            Self::CouponInvalid(_) => "COUPON_INVALID",
            Self::PaymentRecordNotFound(_) => "RECORD_NOT_FOUND",
            Self::PaymentAlreadyFailed(_) => "ALREADY_FAILED",
            Self::InvalidSignature => "INVALID_SIGNATURE",
            Self::AmountMismatch { .. } => "AMOUNT_MISMATCH",
            Self::AlreadyTerminal { .. } => "ALREADY_TERMINAL",
            Self::GatewayError(_) => "GATEWAY_ERROR",
            Self::SerializationError(_) | Self::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::SerializationError(_) | Self::InternalError(_) => {
                "Internal server error".to_string()
            }
            Self::GatewayError(_) => "Payment gateway is unavailable, please retry".to_string(),
            _ => self.to_string(),
        }
    }

    /// True when the store rejected a write because of a unique index.
    pub fn is_unique_violation(&self) -> bool {
        matches!(
            self,
            Self::DatabaseError(err)
                if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
        )
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "request failed");
        }

        let body = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            code: self.code().to_string(),
            message: self.response_message(),
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(body)).into_response()
    }
}
