#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use chrono::Utc;
use nursery_api::{
    auth::CUSTOMER_ROLE,
    config::AppConfig,
    db,
    entities::{
        catalog_item, coupon, serviceable_pincode, size_variant, CatalogItem, CatalogItemKind,
        CatalogItemModel, CatalogItemStatus, CouponModel, PendingPayment, PendingPaymentModel,
        SizeVariant,
    },
    errors::ServiceError,
    notifications::LoggingNotifier,
    rate_limiter::{RateLimitConfig, RateLimiter},
    services::{
        cart::AddCartItemRequest,
        inventory,
        orders::{generate_order_number, OrderNumberFn, ShippingDetails},
        payments::{CreatePaymentOrderRequest, PaymentService},
        razorpay::{GatewayOrder, GatewayOrderRequest, PaymentGateway},
    },
    AppState,
};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

pub const KEY_SECRET: &str = "test_razorpay_key_secret";
pub const WEBHOOK_SECRET: &str = "test_razorpay_webhook_secret";
pub const TEST_KEY_ID: &str = "rzp_test_key";
pub const SERVICEABLE_PINCODE: &str = "560001";
const JWT_SECRET: &str =
    "integration-test-secret-0123456789abcdefghijklmnopqrstuvwxyz-ABCDEFGH";

/// Stand-in for Razorpay that hands out sequential order ids.
#[derive(Default)]
pub struct FakeGateway {
    pub fail: AtomicBool,
    next_id: AtomicU64,
    pub requests: Mutex<Vec<GatewayOrderRequest>>,
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    fn key_id(&self) -> &str {
        TEST_KEY_ID
    }

    async fn create_order(
        &self,
        request: &GatewayOrderRequest,
    ) -> Result<GatewayOrder, ServiceError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ServiceError::GatewayError("gateway unreachable".into()));
        }
        self.requests.lock().unwrap().push(request.clone());
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(GatewayOrder {
            id: format!("order_test{n:06}"),
            amount: request.amount,
            currency: request.currency.clone(),
        })
    }
}

/// Full application over a throwaway SQLite file.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: Arc<FakeGateway>,
    _dir: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Builds the app after letting the caller adjust the configuration.
    pub async fn with_config(adjust: impl FnOnce(&mut AppConfig)) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let url = format!(
            "sqlite://{}?mode=rwc",
            dir.path().join("nursery_test.db").display()
        );

        let mut cfg = AppConfig::new(
            url,
            JWT_SECRET.to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        // Several connections, so concurrent tests contend in the database.
        cfg.db_max_connections = 4;
        cfg.db_min_connections = 1;
        cfg.razorpay.key_id = TEST_KEY_ID.to_string();
        cfg.razorpay.key_secret = KEY_SECRET.to_string();
        cfg.razorpay.webhook_secret = Some(WEBHOOK_SECRET.to_string());
        adjust(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let gateway = Arc::new(FakeGateway::default());
        let rate_limiter = RateLimiter::in_memory(RateLimitConfig {
            max_attempts: cfg.verify_rate_limit_attempts,
            window: cfg.verify_rate_limit_window(),
        });
        let state = AppState::new(
            Arc::new(pool),
            cfg,
            gateway.clone(),
            Arc::new(LoggingNotifier),
            rate_limiter,
        );
        let router = nursery_api::build_router(state.clone());

        Self {
            router,
            state,
            gateway,
            _dir: dir,
        }
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.state.db
    }

    pub fn payments(&self) -> PaymentService {
        self.state.payment_service()
    }

    pub fn token_for(&self, user_id: Uuid, role: &str) -> String {
        self.state
            .auth
            .issue_token(user_id, role)
            .expect("issue test token")
    }

    pub fn customer_token(&self, user_id: Uuid) -> String {
        self.token_for(user_id, CUSTOMER_ROLE)
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Posts raw webhook bytes, optionally signed.
    pub async fn webhook(&self, body: &[u8], signature: Option<&str>) -> Response {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/payments/webhook")
            .header("content-type", "application/json");
        if let Some(signature) = signature {
            builder = builder.header("x-signature", signature);
        }
        let request = builder
            .body(Body::from(body.to_vec()))
            .expect("failed to build webhook request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during webhook request")
    }

    pub async fn seed_pincode(&self, pincode: &str, is_active: bool) {
        serviceable_pincode::ActiveModel {
            pincode: Set(pincode.to_string()),
            city: Set(Some("Bengaluru".to_string())),
            state: Set(Some("Karnataka".to_string())),
            is_active: Set(is_active),
        }
        .insert(self.db())
        .await
        .expect("seed pincode");
    }

    pub async fn set_pincode_active(&self, pincode: &str, is_active: bool) {
        let entry = nursery_api::entities::ServiceablePincode::find_by_id(pincode.to_string())
            .one(self.db())
            .await
            .unwrap()
            .expect("pincode seeded");
        let mut active: serviceable_pincode::ActiveModel = entry.into();
        active.is_active = Set(is_active);
        active.update(self.db()).await.unwrap();
    }

    pub async fn seed_product(&self, name: &str, price: i64, stock: i32) -> CatalogItemModel {
        self.seed_item(CatalogItemKind::Product, name, price, stock, CatalogItemStatus::Active)
            .await
    }

    pub async fn seed_item(
        &self,
        kind: CatalogItemKind,
        name: &str,
        price: i64,
        stock: i32,
        status: CatalogItemStatus,
    ) -> CatalogItemModel {
        let now = Utc::now();
        catalog_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            kind: Set(kind),
            name: Set(name.to_string()),
            price: Set(price),
            stock: Set(stock),
            status: Set(status),
            image_url: Set(Some(format!("https://cdn.example.com/{name}.jpg"))),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.db())
        .await
        .expect("seed catalog item")
    }

    /// Seeds a product with size variants and recomputes its aggregates.
    pub async fn seed_variant_product(
        &self,
        name: &str,
        sizes: &[(&str, i64, i32)],
    ) -> CatalogItemModel {
        let item = self.seed_product(name, 0, 0).await;
        for (size, price, stock) in sizes {
            size_variant::ActiveModel {
                id: Set(Uuid::new_v4()),
                catalog_item_id: Set(item.id),
                size: Set(size.to_string()),
                price: Set(*price),
                stock: Set(*stock),
            }
            .insert(self.db())
            .await
            .expect("seed size variant");
        }
        inventory::recompute_aggregates(self.db(), item.id)
            .await
            .expect("recompute aggregates");
        self.item(item.id).await
    }

    pub async fn seed_coupon(&self, code: &str, usage_limit: Option<i32>) -> CouponModel {
        let now = Utc::now();
        coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.to_string()),
            is_active: Set(true),
            usage_limit: Set(usage_limit),
            used_count: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.db())
        .await
        .expect("seed coupon")
    }

    pub async fn coupon(&self, code: &str) -> CouponModel {
        nursery_api::entities::Coupon::find()
            .filter(coupon::Column::Code.eq(code))
            .one(self.db())
            .await
            .unwrap()
            .expect("coupon exists")
    }

    pub async fn item(&self, id: Uuid) -> CatalogItemModel {
        CatalogItem::find_by_id(id)
            .one(self.db())
            .await
            .unwrap()
            .expect("catalog item exists")
    }

    pub async fn stock_of(&self, id: Uuid) -> i32 {
        self.item(id).await.stock
    }

    pub async fn variant_stock(&self, id: Uuid, size: &str) -> i32 {
        SizeVariant::find()
            .filter(size_variant::Column::CatalogItemId.eq(id))
            .filter(size_variant::Column::Size.eq(size))
            .one(self.db())
            .await
            .unwrap()
            .expect("variant exists")
            .stock
    }

    pub async fn add_to_cart(&self, user_id: Uuid, item_id: Uuid, size: Option<&str>, quantity: i32) {
        self.state
            .cart_service()
            .add_item(
                user_id,
                AddCartItemRequest {
                    catalog_item_id: item_id,
                    size: size.map(str::to_string),
                    selected_color: None,
                    quantity,
                },
            )
            .await
            .expect("add to cart");
    }

    /// Starts a gateway payment for the user's current cart and returns the Razorpay order id.
    pub async fn start_payment(&self, user_id: Uuid) -> String {
        self.payments()
            .initiate_payment(
                user_id,
                CreatePaymentOrderRequest {
                    shipping: shipping(),
                    payment_method: nursery_api::entities::PaymentMethod::Razorpay,
                },
            )
            .await
            .expect("initiate payment")
            .processor_order_id
    }

    pub async fn pending(&self, razorpay_order_id: &str) -> PendingPaymentModel {
        PendingPayment::find()
            .filter(nursery_api::entities::pending_payment::Column::RazorpayOrderId.eq(razorpay_order_id))
            .one(self.db())
            .await
            .unwrap()
            .expect("pending payment exists")
    }
}

/// Hands out `numbers` in order, then falls back to random order numbers.
pub fn scripted_order_numbers(numbers: &[&str]) -> OrderNumberFn {
    let queue: Mutex<VecDeque<String>> =
        Mutex::new(numbers.iter().map(|n| n.to_string()).collect());
    Arc::new(move |now| {
        queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| generate_order_number(now))
    })
}

pub fn shipping() -> ShippingDetails {
    ShippingDetails {
        name: "Asha Rao".into(),
        phone: "9876543210".into(),
        email: Some("asha@example.com".into()),
        address_line1: "12 Lalbagh Road".into(),
        address_line2: None,
        city: "Bengaluru".into(),
        state: "Karnataka".into(),
        pincode: SERVICEABLE_PINCODE.into(),
    }
}

pub fn shipping_json() -> Value {
    serde_json::to_value(shipping()).expect("shipping serializes")
}

pub fn razorpay_webhook(event: &str, order_id: &str, payment_id: &str, amount_paise: i64) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "entity": "event",
        "event": event,
        "payload": {
            "payment": {
                "entity": {
                    "id": payment_id,
                    "order_id": order_id,
                    "amount": amount_paise,
                    "currency": "INR",
                    "status": if event == "payment.failed" { "failed" } else { "captured" },
                    "error_description": if event == "payment.failed" { json!("Card declined") } else { Value::Null }
                }
            }
        }
    }))
    .expect("webhook body serializes")
}

pub async fn body_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&bytes).expect("response body is json")
}
