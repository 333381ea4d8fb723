//! Gateway payments: initiation, the idempotent finalizer and its two entry
//! points (client verify and processor webhook).
//!
//! Both entry points converge on [`PaymentService::finalize`]. A pending
//! payment is claimed by a conditional `PENDING -> SUCCESS` update inside the
//! same transaction that writes the order, so exactly one caller can commit
//! an order for a given Razorpay order id. Losers re-read the winner's order
//! number and report `already_processed`.

use chrono::Utc;
use metrics::counter;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, Set,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    config::AppConfig,
    db,
    entities::{
        order, payment, pending_payment, Order, OrderModel, OrderStatus, Payment, PaymentMethod,
        PaymentStatus, PendingPayment, PendingPaymentModel, PendingPaymentStatus,
    },
    errors::ServiceError,
    notifications::{self, Notifier, OrderEvent},
    rate_limiter::RateLimiter,
};

use super::{
    cart::{self, CartSnapshotItem},
    inventory,
    orders::{
        assemble_order, default_order_numbers, NewOrder, OrderNumberFn, ShippingDetails,
        MAX_ORDER_NUMBER_ATTEMPTS,
    },
    razorpay::{self, GatewayOrderRequest, PaymentGateway},
    serviceability,
    totals::calculate_totals,
};

/// Which entry point asked for finalization. Only used for logging and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeSource {
    Verify,
    Webhook,
}

impl FinalizeSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Verify => "verify",
            Self::Webhook => "webhook",
        }
    }
}

impl std::fmt::Display for FinalizeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeOutcome {
    pub order_number: String,
    /// True when another call had already turned this payment into an order.
    pub already_processed: bool,
}

enum FinalizeAttempt {
    Committed(OrderModel),
    LostRace,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentOrderRequest {
    #[validate]
    pub shipping: ShippingDetails,
    #[serde(default = "default_gateway_method")]
    pub payment_method: PaymentMethod,
}

fn default_gateway_method() -> PaymentMethod {
    PaymentMethod::Razorpay
}

/// Values the browser checkout widget is pre-filled with.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutPrefill {
    pub name: String,
    pub email: Option<String>,
    pub contact: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentOrderResponse {
    pub processor_order_id: String,
    /// Whole currency units.
    pub amount: i64,
    pub currency: String,
    pub key_id: String,
    pub prefill: CheckoutPrefill,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentRequest {
    #[serde(alias = "razorpay_order_id")]
    #[validate(length(min = 1, max = 64))]
    pub processor_order_id: String,
    #[serde(alias = "razorpay_payment_id")]
    #[validate(length(min = 1, max = 64))]
    pub payment_id: String,
    #[serde(alias = "razorpay_signature")]
    #[validate(length(min = 1, max = 128))]
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentResponse {
    pub success: bool,
    pub message: String,
    pub order_number: String,
}

/// Acknowledgement returned to the processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum WebhookStatus {
    Ok,
    Ignored,
    Error,
}

#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    event: String,
    #[serde(default)]
    payload: WebhookPayload,
}

#[derive(Debug, Default, Deserialize)]
struct WebhookPayload {
    payment: Option<WebhookPaymentWrapper>,
}

#[derive(Debug, Deserialize)]
struct WebhookPaymentWrapper {
    entity: WebhookPaymentEntity,
}

#[derive(Debug, Deserialize)]
struct WebhookPaymentEntity {
    id: String,
    order_id: Option<String>,
    /// Smallest currency unit.
    amount: i64,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn Notifier>,
    rate_limiter: Arc<RateLimiter>,
    config: Arc<AppConfig>,
    order_numbers: OrderNumberFn,
}

impl PaymentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
        rate_limiter: Arc<RateLimiter>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            gateway,
            notifier,
            rate_limiter,
            config,
            order_numbers: default_order_numbers(),
        }
    }

    pub fn with_order_numbers(mut self, order_numbers: OrderNumberFn) -> Self {
        self.order_numbers = order_numbers;
        self
    }

    /// Creates the processor-side order and the pending payment that tracks it.
    ///
    /// Nothing is written when the gateway call fails.
    #[instrument(skip(self, request))]
    pub async fn initiate_payment(
        &self,
        user_id: Uuid,
        request: CreatePaymentOrderRequest,
    ) -> Result<CreatePaymentOrderResponse, ServiceError> {
        request.validate()?;
        if request.payment_method != PaymentMethod::Razorpay {
            return Err(ServiceError::ValidationError(
                "cash on delivery orders are placed directly, not through the gateway".into(),
            ));
        }
        let shipping = request.shipping;
        serviceability::ensure_serviceable(&*self.db, &shipping.pincode).await?;

        let snapshot = cart::snapshot_cart(&*self.db, user_id).await?;
        if snapshot.is_empty() {
            return Err(ServiceError::EmptyCart);
        }
        let totals = calculate_totals(&snapshot, &self.config.shipping_policy());
        inventory::validate_stock(&*self.db, &cart::stock_lines(&snapshot)).await?;

        let receipt = format!("rcpt_{}", Uuid::new_v4().simple());
        let gateway_order = self
            .gateway
            .create_order(&GatewayOrderRequest {
                amount: razorpay::to_smallest_unit(totals.total),
                currency: self.config.currency.clone(),
                receipt,
                notes: json!({ "userId": user_id }),
            })
            .await?;

        let now = Utc::now();
        let pending = pending_payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            razorpay_order_id: Set(gateway_order.id.clone()),
            user_id: Set(user_id),
            amount: Set(totals.total),
            currency: Set(self.config.currency.clone()),
            status: Set(PendingPaymentStatus::Pending),
            shipping: Set(serde_json::to_value(&shipping)?),
            cart_snapshot: Set(serde_json::to_value(&snapshot)?),
            failure_reason: Set(None),
            expires_at: Set(now + self.config.payment_expiry()),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await?;

        counter!("nursery_payments.initiated", 1);
        info!(
            razorpay_order_id = %pending.razorpay_order_id,
            amount = pending.amount,
            "payment initiated"
        );

        Ok(CreatePaymentOrderResponse {
            processor_order_id: pending.razorpay_order_id,
            amount: pending.amount,
            currency: pending.currency,
            key_id: self.gateway.key_id().to_string(),
            prefill: CheckoutPrefill {
                name: shipping.name,
                email: shipping.email,
                contact: shipping.phone,
            },
        })
    }

    /// Client-side confirmation after checkout.
    ///
    /// Rate limited per user before anything else, then the signature is
    /// checked before any state is read for finalization.
    #[instrument(skip(self, request), fields(razorpay_order_id = %request.processor_order_id))]
    pub async fn verify_payment(
        &self,
        user_id: Uuid,
        request: VerifyPaymentRequest,
    ) -> Result<VerifyPaymentResponse, ServiceError> {
        let limit = self.rate_limiter.check(&format!("verify:{user_id}")).await;
        if !limit.allowed {
            counter!("nursery_payments.verify_rate_limited", 1);
            warn!(%user_id, retry_after_secs = limit.retry_after.as_secs(), "verify rate limited");
            return Err(ServiceError::RateLimitExceeded);
        }
        request.validate()?;

        let signature_ok = razorpay::verify_payment_signature(
            &request.processor_order_id,
            &request.payment_id,
            &request.signature,
            &self.config.razorpay.key_secret,
        );
        if !signature_ok {
            counter!("nursery_payments.invalid_signature", 1);
            if let Some(pending) = self.find_pending(&request.processor_order_id).await? {
                if pending.user_id == user_id {
                    self.mark_failed(&pending.razorpay_order_id, "invalid payment signature")
                        .await?;
                } else {
                    warn!(%user_id, "invalid signature for another user's payment");
                }
            }
            return Err(ServiceError::InvalidSignature);
        }

        let pending = self
            .find_pending(&request.processor_order_id)
            .await?
            .ok_or_else(|| ServiceError::PaymentRecordNotFound(request.processor_order_id.clone()))?;
        if pending.user_id != user_id {
            return Err(ServiceError::Forbidden(
                "payment belongs to another user".to_string(),
            ));
        }

        let outcome = self
            .finalize(
                &request.processor_order_id,
                &request.payment_id,
                FinalizeSource::Verify,
            )
            .await?;

        let message = if outcome.already_processed {
            "Payment already verified"
        } else {
            "Payment verified and order placed"
        };
        Ok(VerifyPaymentResponse {
            success: true,
            message: message.to_string(),
            order_number: outcome.order_number,
        })
    }

    /// Rejects webhooks whose signature does not cover the exact body bytes.
    pub fn authenticate_webhook(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<(), ServiceError> {
        let secret = self
            .config
            .razorpay
            .webhook_secret
            .as_deref()
            .unwrap_or_default();
        if secret.is_empty() {
            error!("webhook received but no webhook secret is configured");
            return Err(ServiceError::InvalidSignature);
        }
        match signature {
            Some(signature) if razorpay::verify_webhook_signature(body, signature, secret) => {
                Ok(())
            }
            _ => Err(ServiceError::InvalidSignature),
        }
    }

    /// Acts on an authenticated webhook body.
    #[instrument(skip(self, body))]
    pub async fn handle_webhook_event(&self, body: &[u8]) -> Result<WebhookStatus, ServiceError> {
        let envelope: WebhookEnvelope = serde_json::from_slice(body)?;
        counter!("nursery_payments.webhook_events", 1, "event" => envelope.event.clone());

        match envelope.event.as_str() {
            "payment.captured" => {
                let entity = payment_entity(envelope.payload)?;
                let razorpay_order_id = entity.order_id.ok_or_else(|| {
                    ServiceError::ValidationError("captured payment without order id".into())
                })?;
                let pending = self
                    .find_pending(&razorpay_order_id)
                    .await?
                    .ok_or_else(|| ServiceError::PaymentRecordNotFound(razorpay_order_id.clone()))?;

                let expected = razorpay::to_smallest_unit(pending.amount);
                if entity.amount != expected {
                    error!(
                        %razorpay_order_id,
                        expected,
                        received = entity.amount,
                        "captured amount does not match pending payment"
                    );
                    self.mark_failed(&razorpay_order_id, "captured amount mismatch")
                        .await?;
                    return Err(ServiceError::AmountMismatch {
                        expected,
                        received: entity.amount,
                    });
                }

                self.finalize(&razorpay_order_id, &entity.id, FinalizeSource::Webhook)
                    .await?;
                Ok(WebhookStatus::Ok)
            }
            "payment.failed" => {
                let entity = payment_entity(envelope.payload)?;
                let razorpay_order_id = entity.order_id.ok_or_else(|| {
                    ServiceError::ValidationError("failed payment without order id".into())
                })?;
                let reason = entity
                    .error_description
                    .unwrap_or_else(|| "payment failed at gateway".to_string());
                self.mark_failed(&razorpay_order_id, &reason).await?;
                Ok(WebhookStatus::Ok)
            }
            other => {
                info!(event = other, "ignoring webhook event");
                Ok(WebhookStatus::Ignored)
            }
        }
    }

    /// Turns a pending payment into exactly one order.
    ///
    /// Safe to call any number of times, concurrently, from either entry
    /// point: every caller for the same Razorpay order id gets the same
    /// order number.
    #[instrument(skip(self), fields(source = %source))]
    pub async fn finalize(
        &self,
        razorpay_order_id: &str,
        razorpay_payment_id: &str,
        source: FinalizeSource,
    ) -> Result<FinalizeOutcome, ServiceError> {
        let pending = self
            .find_pending(razorpay_order_id)
            .await?
            .ok_or_else(|| {
                warn!(razorpay_order_id, "finalize requested for unknown payment");
                ServiceError::PaymentRecordNotFound(razorpay_order_id.to_string())
            })?;

        match pending.status {
            PendingPaymentStatus::Success => return self.resolve_winner(razorpay_order_id, source).await,
            PendingPaymentStatus::Failed => {
                return Err(ServiceError::PaymentAlreadyFailed(razorpay_order_id.to_string()))
            }
            PendingPaymentStatus::Pending => {}
        }

        if pending.is_expired(Utc::now()) {
            // Money has moved; an expired hold is still honoured.
            warn!(razorpay_order_id, expires_at = %pending.expires_at, "finalizing expired payment");
        }

        let shipping: ShippingDetails = serde_json::from_value(pending.shipping.clone())?;
        let snapshot: Vec<CartSnapshotItem> = serde_json::from_value(pending.cart_snapshot.clone())?;

        serviceability::ensure_serviceable(&*self.db, &shipping.pincode).await?;

        let totals = calculate_totals(&snapshot, &self.config.shipping_policy());
        if totals.total != pending.amount {
            warn!(
                razorpay_order_id,
                charged = pending.amount,
                recomputed = totals.total,
                "recomputed total differs from the charged amount"
            );
        }
        let lines = cart::stock_lines(&snapshot);

        let mut attempt = 0;
        let order = loop {
            attempt += 1;
            let txn = db::begin_write(&self.db).await?;
            let result = async {
                let claimed = PendingPayment::update_many()
                    .col_expr(
                        pending_payment::Column::Status,
                        Expr::value(PendingPaymentStatus::Success),
                    )
                    .col_expr(pending_payment::Column::UpdatedAt, Expr::value(Utc::now()))
                    .filter(pending_payment::Column::RazorpayOrderId.eq(razorpay_order_id))
                    .filter(pending_payment::Column::Status.eq(PendingPaymentStatus::Pending))
                    .exec(&txn)
                    .await?;
                if claimed.rows_affected == 0 {
                    return Ok(FinalizeAttempt::LostRace);
                }

                inventory::validate_stock(&txn, &lines).await?;
                let order = assemble_order(
                    &txn,
                    NewOrder {
                        order_number: (self.order_numbers)(Utc::now()),
                        user_id: pending.user_id,
                        shipping: &shipping,
                        items: &snapshot,
                        totals,
                        payment_method: PaymentMethod::Razorpay,
                        order_status: OrderStatus::Paid,
                        coupon_code: None,
                    },
                )
                .await?;
                inventory::decrement_stock(&txn, &lines).await?;
                record_payment(&txn, &order, &pending, razorpay_payment_id, source).await?;
                cart::clear_cart(&txn, pending.user_id).await?;
                Ok::<_, ServiceError>(FinalizeAttempt::Committed(order))
            }
            .await;

            match result {
                Ok(FinalizeAttempt::Committed(order)) => {
                    txn.commit().await?;
                    break order;
                }
                Ok(FinalizeAttempt::LostRace) => {
                    txn.rollback().await?;
                    info!(razorpay_order_id, "payment claimed by a concurrent finalization");
                    return self.resolve_winner(razorpay_order_id, source).await;
                }
                Err(err) => {
                    txn.rollback().await?;
                    if err.is_unique_violation() {
                        if let Some(order_number) = self.winning_order_number(razorpay_order_id).await? {
                            counter!("nursery_payments.finalized", 1, "source" => source.as_str(), "outcome" => "already_processed");
                            return Ok(FinalizeOutcome {
                                order_number,
                                already_processed: true,
                            });
                        }
                        if attempt < MAX_ORDER_NUMBER_ATTEMPTS {
                            warn!(attempt, "order number collision during finalization, retrying");
                            continue;
                        }
                    }
                    counter!("nursery_payments.finalize_failed", 1, "source" => source.as_str(), "code" => err.code());
                    error!(razorpay_order_id, error = %err, "finalization rolled back, payment left pending");
                    return Err(err);
                }
            }
        };

        counter!("nursery_payments.finalized", 1, "source" => source.as_str(), "outcome" => "created");
        info!(
            razorpay_order_id,
            order_number = %order.order_number,
            total = order.total_amount,
            "payment finalized"
        );
        notifications::dispatch(
            self.notifier.clone(),
            OrderEvent::OrderPlaced {
                order_number: order.order_number.clone(),
                user_id: order.user_id,
                total_amount: order.total_amount,
                email: order.shipping_email.clone(),
            },
        );

        Ok(FinalizeOutcome {
            order_number: order.order_number,
            already_processed: false,
        })
    }

    /// Moves a pending payment to FAILED. Returns false when it was no longer pending.
    #[instrument(skip(self))]
    pub async fn mark_failed(
        &self,
        razorpay_order_id: &str,
        reason: &str,
    ) -> Result<bool, ServiceError> {
        let result = PendingPayment::update_many()
            .col_expr(
                pending_payment::Column::Status,
                Expr::value(PendingPaymentStatus::Failed),
            )
            .col_expr(
                pending_payment::Column::FailureReason,
                Expr::value(reason.to_string()),
            )
            .col_expr(pending_payment::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(pending_payment::Column::RazorpayOrderId.eq(razorpay_order_id))
            .filter(pending_payment::Column::Status.eq(PendingPaymentStatus::Pending))
            .exec(&*self.db)
            .await?;

        let failed = result.rows_affected > 0;
        if failed {
            counter!("nursery_payments.failed", 1);
            info!(razorpay_order_id, reason, "pending payment marked failed");
        }
        Ok(failed)
    }

    pub async fn find_pending(
        &self,
        razorpay_order_id: &str,
    ) -> Result<Option<PendingPaymentModel>, ServiceError> {
        Ok(PendingPayment::find()
            .filter(pending_payment::Column::RazorpayOrderId.eq(razorpay_order_id))
            .one(&*self.db)
            .await?)
    }

    async fn winning_order_number(
        &self,
        razorpay_order_id: &str,
    ) -> Result<Option<String>, ServiceError> {
        let Some(payment) = Payment::find()
            .filter(payment::Column::RazorpayOrderId.eq(razorpay_order_id))
            .one(&*self.db)
            .await?
        else {
            return Ok(None);
        };
        Ok(Order::find()
            .filter(order::Column::Id.eq(payment.order_id))
            .one(&*self.db)
            .await?
            .map(|order| order.order_number))
    }

    async fn resolve_winner(
        &self,
        razorpay_order_id: &str,
        source: FinalizeSource,
    ) -> Result<FinalizeOutcome, ServiceError> {
        if let Some(order_number) = self.winning_order_number(razorpay_order_id).await? {
            counter!("nursery_payments.finalized", 1, "source" => source.as_str(), "outcome" => "already_processed");
            return Ok(FinalizeOutcome {
                order_number,
                already_processed: true,
            });
        }

        // No order: the row left PENDING some other way.
        match self.find_pending(razorpay_order_id).await? {
            Some(pending) if pending.status == PendingPaymentStatus::Failed => {
                Err(ServiceError::PaymentAlreadyFailed(razorpay_order_id.to_string()))
            }
            _ => {
                error!(razorpay_order_id, "payment marked successful without an order");
                Err(ServiceError::InternalError(format!(
                    "payment {razorpay_order_id} has no order"
                )))
            }
        }
    }
}

fn payment_entity(payload: WebhookPayload) -> Result<WebhookPaymentEntity, ServiceError> {
    payload
        .payment
        .map(|wrapper| wrapper.entity)
        .ok_or_else(|| ServiceError::ValidationError("webhook payload has no payment entity".into()))
}

async fn record_payment<C: ConnectionTrait>(
    conn: &C,
    order: &OrderModel,
    pending: &PendingPaymentModel,
    razorpay_payment_id: &str,
    source: FinalizeSource,
) -> Result<(), ServiceError> {
    let now = Utc::now();
    payment::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_id: Set(order.id),
        razorpay_order_id: Set(pending.razorpay_order_id.clone()),
        razorpay_payment_id: Set(razorpay_payment_id.to_string()),
        // What the processor captured, even if totals were recomputed since.
        amount: Set(pending.amount),
        currency: Set(pending.currency.clone()),
        status: Set(PaymentStatus::Success),
        captured_via: Set(source.as_str().to_string()),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(conn)
    .await?;
    Ok(())
}
