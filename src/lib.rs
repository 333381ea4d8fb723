//! Nursery storefront API
//!
//! Cart, checkout and payment finalization for an online plant nursery.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod notifications;
pub mod openapi;
pub mod rate_limiter;
pub mod services;

use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    routing::{get, patch, post, put},
    Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::{
    auth::AuthKeys,
    config::AppConfig,
    errors::ServiceError,
    middleware_helpers::request_id::{current_request_id, request_id_middleware, RequestSpanMaker},
    notifications::Notifier,
    rate_limiter::{RateLimitBackend, RateLimitConfig, RateLimiter},
    services::{
        cart::CartService,
        orders::{default_order_numbers, OrderNumberFn, OrderService},
        payments::PaymentService,
        razorpay::PaymentGateway,
    },
};

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<AppConfig>,
    pub auth: Arc<AuthKeys>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub notifier: Arc<dyn Notifier>,
    pub rate_limiter: Arc<RateLimiter>,
    pub order_numbers: OrderNumberFn,
}

impl AppState {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: AppConfig,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
        rate_limiter: RateLimiter,
    ) -> Self {
        let auth = Arc::new(AuthKeys::new(&config.jwt_secret, config.jwt_expiration));
        Self {
            db,
            config: Arc::new(config),
            auth,
            gateway,
            notifier,
            rate_limiter: Arc::new(rate_limiter),
            order_numbers: default_order_numbers(),
        }
    }

    pub fn cart_service(&self) -> CartService {
        CartService::new(self.db.clone(), self.config.shipping_policy())
    }

    pub fn order_service(&self) -> OrderService {
        OrderService::new(
            self.db.clone(),
            self.notifier.clone(),
            self.config.shipping_policy(),
        )
        .with_order_numbers(self.order_numbers.clone())
    }

    pub fn payment_service(&self) -> PaymentService {
        PaymentService::new(
            self.db.clone(),
            self.gateway.clone(),
            self.notifier.clone(),
            self.rate_limiter.clone(),
            self.config.clone(),
        )
        .with_order_numbers(self.order_numbers.clone())
    }
}

/// Builds the verify-attempt limiter, backed by Redis when configured.
pub fn build_verify_rate_limiter(config: &AppConfig) -> Result<RateLimiter, ServiceError> {
    let limits = RateLimitConfig {
        max_attempts: config.verify_rate_limit_attempts,
        window: config.verify_rate_limit_window(),
    };

    let backend = match (config.rate_limit_use_redis, config.redis_url.as_deref()) {
        (true, Some(url)) => {
            let client = redis::Client::open(url).map_err(|e| {
                ServiceError::InternalError(format!("invalid redis url for rate limiting: {e}"))
            })?;
            info!("Verify rate limiting backed by Redis");
            RateLimitBackend::Redis {
                client: Arc::new(client),
                namespace: config.rate_limit_namespace.clone(),
            }
        }
        (true, None) => {
            warn!("rate_limit_use_redis is set without redis_url; using in-memory limiter");
            RateLimitBackend::InMemory
        }
        (false, _) => RateLimitBackend::InMemory,
    };

    Ok(RateLimiter::new(limits, backend))
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            meta: Some(ResponseMeta::capture()),
        }
    }
}


pub fn api_v1_routes() -> Router<AppState> {
    let cart = Router::new()
        .route("/cart", get(handlers::cart::get_cart))
        .route("/cart/items", post(handlers::cart::add_cart_item))
        .route(
            "/cart/items/:id",
            patch(handlers::cart::update_cart_item).delete(handlers::cart::remove_cart_item),
        );

    let orders = Router::new()
        .route(
            "/orders",
            post(handlers::orders::create_order).get(handlers::orders::list_orders),
        )
        .route("/orders/:order_number", get(handlers::orders::get_order))
        .route(
            "/orders/:order_number/cancel",
            post(handlers::orders::cancel_order),
        );

    let admin = Router::new().route(
        "/admin/orders/:order_number/status",
        put(handlers::admin::update_order_status),
    );

    let payments = Router::new()
        .route(
            "/payments/create-order",
            post(handlers::payments::create_payment_order),
        )
        .route("/payments/verify", post(handlers::payments::verify_payment))
        .route(
            "/payments/webhook",
            post(handlers::payment_webhooks::payment_webhook),
        );

    let pincodes = Router::new().route(
        "/pincodes/:pincode",
        get(handlers::pincodes::check_pincode),
    );

    Router::new()
        .merge(cart)
        .merge(orders)
        .merge(admin)
        .merge(payments)
        .merge(pincodes)
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_origins()
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    if origins.is_empty() {
        if config.is_production() {
            warn!("No CORS origins configured in production; cross-origin requests are refused");
            layer
        } else {
            layer.allow_origin(Any)
        }
    } else {
        layer.allow_origin(AllowOrigin::list(origins))
    }
}

/// Full application router with tracing, CORS and request-id layers.
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .nest("/api/v1", api_v1_routes())
        .merge(openapi::swagger_ui())
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http().make_span_with(RequestSpanMaker))
        .layer(middleware::from_fn(request_id_middleware))
}
