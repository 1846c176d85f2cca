//! Online payment gateway seam. Razorpay is the production implementation.

pub mod razorpay;
pub mod signature;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use crate::domain::value_objects::Money;

pub use razorpay::RazorpayClient;

/// Order created on the gateway side; the client completes payment against its id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayOrder { pub id: String, pub amount_minor: i64, pub currency: String }

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Public key handed to the checkout widget.
    fn key_id(&self) -> &str;
    async fn create_order(&self, amount: &Money, receipt: &str) -> Result<GatewayOrder, GatewayError>;
    async fn refund(&self, gateway_payment_id: &str, amount: &Money) -> Result<String, GatewayError>;
    fn verify_payment_signature(&self, gateway_order_id: &str, gateway_payment_id: &str, signature: &str) -> bool;
    fn verify_webhook_signature(&self, body: &[u8], signature: &str) -> bool;
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("gateway returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("gateway unavailable: {0}")]
    Unavailable(String),
}

/// Webhook envelope; only the fields checkout reacts to are decoded.
#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    pub event: String,
    #[serde(default)]
    pub payload: WebhookPayload,
}

#[derive(Debug, Default, Deserialize)]
pub struct WebhookPayload { pub payment: Option<EntityWrapper<PaymentEntity>> }

#[derive(Debug, Deserialize)]
pub struct EntityWrapper<T> { pub entity: T }

#[derive(Debug, Deserialize)]
pub struct PaymentEntity {
    pub id: String,
    pub order_id: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

/// What a webhook means for checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Captured { gateway_order_id: String, gateway_payment_id: String },
    Failed { gateway_order_id: String, gateway_payment_id: String, reason: String },
    Ignored,
}

impl WebhookEvent {
    pub fn outcome(&self) -> WebhookOutcome {
        let Some(payment) = self.payload.payment.as_ref().map(|p| &p.entity) else { return WebhookOutcome::Ignored };
        let Some(order_id) = payment.order_id.clone() else { return WebhookOutcome::Ignored };
        match self.event.as_str() {
            "payment.captured" | "order.paid" => WebhookOutcome::Captured { gateway_order_id: order_id, gateway_payment_id: payment.id.clone() },
            "payment.failed" => WebhookOutcome::Failed {
                gateway_order_id: order_id,
                gateway_payment_id: payment.id.clone(),
                reason: payment.error_description.clone().unwrap_or_else(|| "payment failed".into()),
            },
            _ => WebhookOutcome::Ignored,
        }
    }

    /// Dedup key used when the gateway sends no event id header.
    pub fn fallback_id(&self) -> String {
        let payment_id = self.payload.payment.as_ref().map(|p| p.entity.id.as_str()).unwrap_or("-");
        format!("{}:{}", self.event, payment_id)
    }
}
