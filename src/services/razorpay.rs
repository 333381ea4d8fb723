//! Razorpay gateway client and signature checks.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;
use tracing::{error, instrument};

use crate::{config::RazorpayConfig, errors::ServiceError};

type HmacSha256 = Hmac<Sha256>;

/// Razorpay amounts are expressed in the smallest currency unit (paise).
pub fn to_smallest_unit(amount: i64) -> i64 {
    amount * 100
}

#[derive(Debug, Clone, Serialize)]
pub struct GatewayOrderRequest {
    /// Smallest currency unit
    pub amount: i64,
    pub currency: String,
    pub receipt: String,
    pub notes: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayOrder {
    pub id: String,
    pub amount: i64,
    pub currency: String,
}

/// Creates processor-side orders. The checkout itself happens in the browser.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Public key id handed to the client-side checkout.
    fn key_id(&self) -> &str;

    async fn create_order(&self, request: &GatewayOrderRequest)
        -> Result<GatewayOrder, ServiceError>;
}

#[derive(Debug, Clone)]
pub struct RazorpayClient {
    client: Client,
    api_base_url: String,
    key_id: String,
    key_secret: String,
}

impl RazorpayClient {
    pub fn new(config: &RazorpayConfig) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("HTTP client build failed: {e}")))?;

        Ok(Self {
            client,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            key_id: config.key_id.clone(),
            key_secret: config.key_secret.clone(),
        })
    }
}

#[async_trait]
impl PaymentGateway for RazorpayClient {
    fn key_id(&self) -> &str {
        &self.key_id
    }

    #[instrument(skip(self, request), fields(receipt = %request.receipt, amount = request.amount))]
    async fn create_order(
        &self,
        request: &GatewayOrderRequest,
    ) -> Result<GatewayOrder, ServiceError> {
        let response = self
            .client
            .post(format!("{}/orders", self.api_base_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(request)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Razorpay order request failed");
                ServiceError::GatewayError(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(%status, body = %body, "Razorpay rejected order creation");
            return Err(ServiceError::GatewayError(format!(
                "order creation returned {status}"
            )));
        }

        response.json::<GatewayOrder>().await.map_err(|e| {
            error!(error = %e, "Razorpay order response could not be parsed");
            ServiceError::GatewayError(format!("unreadable order response: {e}"))
        })
    }
}

fn hmac_hex(secret: &str, message: &[u8]) -> String {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

fn verify_hex(secret: &str, message: &[u8], signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(message);
    mac.verify_slice(&expected).is_ok()
}

/// Signature Razorpay checkout returns: `HMAC-SHA256(order_id|payment_id, key_secret)`.
pub fn sign_payment(order_id: &str, payment_id: &str, key_secret: &str) -> String {
    hmac_hex(key_secret, format!("{order_id}|{payment_id}").as_bytes())
}

/// Constant-time check of a checkout signature.
pub fn verify_payment_signature(
    order_id: &str,
    payment_id: &str,
    signature: &str,
    key_secret: &str,
) -> bool {
    !key_secret.is_empty()
        && verify_hex(
            key_secret,
            format!("{order_id}|{payment_id}").as_bytes(),
            signature,
        )
}

/// Signature Razorpay puts on webhooks: `HMAC-SHA256(raw_body, webhook_secret)`.
pub fn sign_webhook(body: &[u8], webhook_secret: &str) -> String {
    hmac_hex(webhook_secret, body)
}

/// Verifies a webhook signature over the unparsed request body.
pub fn verify_webhook_signature(body: &[u8], signature: &str, webhook_secret: &str) -> bool {
    !webhook_secret.is_empty() && verify_hex(webhook_secret, body, signature)
}
