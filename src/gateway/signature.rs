//! Razorpay signature checks.
//!
//! Both the checkout callback and webhooks are signed with HMAC-SHA256 and
//! hex-encoded. Comparison is constant time; malformed hex is "not valid".

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

pub fn sign(secret: &str, payload: &[u8]) -> String {
    // HMAC accepts keys of any length, so new_from_slice cannot fail here.
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

fn verify(secret: &str, payload: &[u8], signature: &str) -> bool {
    let Ok(provided) = hex::decode(signature.trim()) else { return false };
    let Ok(expected) = hex::decode(sign(secret, payload)) else { return false };
    if provided.len() != expected.len() {
        return false;
    }
    provided.ct_eq(expected.as_slice()).into()
}

/// Signature Razorpay Checkout returns to the client: `order_id|payment_id` keyed by the API secret.
pub fn verify_payment_signature(key_secret: &str, order_id: &str, payment_id: &str, signature: &str) -> bool {
    verify(key_secret, format!("{order_id}|{payment_id}").as_bytes(), signature)
}

/// `X-Razorpay-Signature` over the raw webhook body, keyed by the webhook secret.
pub fn verify_webhook_signature(webhook_secret: &str, body: &[u8], signature: &str) -> bool {
    verify(webhook_secret, body, signature)
}
