//! Razorpay REST client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::config::RazorpayConfig;
use crate::domain::value_objects::Money;
use super::{signature, GatewayError, GatewayOrder, PaymentGateway};

pub struct RazorpayClient {
    http: reqwest::Client,
    base_url: String,
    key_id: String,
    key_secret: String,
    webhook_secret: String,
}

#[derive(Serialize)]
struct CreateOrderBody<'a> { amount: i64, currency: &'a str, receipt: &'a str }

#[derive(Deserialize)]
struct OrderResponse { id: String, amount: i64, currency: String }

#[derive(Serialize)]
struct RefundBody { amount: i64 }

#[derive(Deserialize)]
struct RefundResponse { id: String }

#[derive(Deserialize)]
struct ErrorResponse { error: ErrorDetail }

#[derive(Deserialize)]
struct ErrorDetail { description: String }

impl RazorpayClient {
    pub fn new(config: &RazorpayConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            key_id: config.key_id.clone(),
            key_secret: config.key_secret.clone(),
            webhook_secret: config.webhook_secret.clone(),
        }
    }

    async fn post<B: Serialize, R: for<'de> Deserialize<'de>>(&self, path: &str, body: &B) -> Result<R, GatewayError> {
        let response = self.http
            .post(format!("{}{}", self.base_url, path))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let message = match response.json::<ErrorResponse>().await {
                Ok(e) => e.error.description,
                Err(_) => status.to_string(),
            };
            return Err(GatewayError::Api { status: status.as_u16(), message });
        }
        Ok(response.json::<R>().await?)
    }
}

#[async_trait]
impl PaymentGateway for RazorpayClient {
    fn key_id(&self) -> &str { &self.key_id }

    async fn create_order(&self, amount: &Money, receipt: &str) -> Result<GatewayOrder, GatewayError> {
        let body = CreateOrderBody { amount: amount.minor_units(), currency: amount.currency(), receipt };
        let order: OrderResponse = self.post("/v1/orders", &body).await?;
        tracing::debug!(gateway_order_id = %order.id, receipt, "razorpay order created");
        Ok(GatewayOrder { id: order.id, amount_minor: order.amount, currency: order.currency })
    }

    async fn refund(&self, gateway_payment_id: &str, amount: &Money) -> Result<String, GatewayError> {
        let path = format!("/v1/payments/{gateway_payment_id}/refund");
        let refund: RefundResponse = self.post(&path, &RefundBody { amount: amount.minor_units() }).await?;
        Ok(refund.id)
    }

    fn verify_payment_signature(&self, gateway_order_id: &str, gateway_payment_id: &str, sig: &str) -> bool {
        signature::verify_payment_signature(&self.key_secret, gateway_order_id, gateway_payment_id, sig)
    }

    fn verify_webhook_signature(&self, body: &[u8], sig: &str) -> bool {
        signature::verify_webhook_signature(&self.webhook_secret, body, sig)
    }
}
