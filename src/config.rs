//! Environment configuration. `.env` is loaded by `main` through dotenvy.

use rust_decimal::Decimal;
use std::str::FromStr;
use thiserror::Error;
use crate::domain::pricing::PricingPolicy;

#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Postgres URL; without it the service runs on the in-memory store.
    pub database_url: Option<String>,
    pub nats_url: Option<String>,
    pub port: u16,
    pub pricing: PricingPolicy,
    pub razorpay: RazorpayConfig,
    pub admin_token: Option<String>,
}

#[derive(Clone, Debug)]
pub struct RazorpayConfig {
    pub key_id: String,
    pub key_secret: String,
    pub webhook_secret: String,
    pub base_url: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} is not a valid {expected}: {value:?}")]
    Invalid { key: &'static str, expected: &'static str, value: String },
    #[error("{0} must be set")]
    Missing(&'static str),
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = PricingPolicy::default();
        let pricing = PricingPolicy {
            currency: get("CURRENCY").map(|c| c.trim().to_uppercase()).unwrap_or(defaults.currency),
            shipping_fee: parse(&get, "SHIPPING_FEE", "decimal")?.unwrap_or(defaults.shipping_fee),
            free_shipping_threshold: parse(&get, "FREE_SHIPPING_THRESHOLD", "decimal")?.unwrap_or(defaults.free_shipping_threshold),
            tax_rate: parse::<Decimal>(&get, "TAX_RATE", "decimal")?.unwrap_or(defaults.tax_rate),
        };
        if pricing.tax_rate < Decimal::ZERO || pricing.tax_rate >= Decimal::ONE {
            return Err(ConfigError::Invalid { key: "TAX_RATE", expected: "fraction between 0 and 1", value: pricing.tax_rate.to_string() });
        }
        let razorpay = RazorpayConfig {
            key_id: get("RAZORPAY_KEY_ID").ok_or(ConfigError::Missing("RAZORPAY_KEY_ID"))?,
            key_secret: get("RAZORPAY_KEY_SECRET").ok_or(ConfigError::Missing("RAZORPAY_KEY_SECRET"))?,
            webhook_secret: get("RAZORPAY_WEBHOOK_SECRET").ok_or(ConfigError::Missing("RAZORPAY_WEBHOOK_SECRET"))?,
            base_url: get("RAZORPAY_BASE_URL").unwrap_or_else(|| "https://api.razorpay.com".into()),
        };
        Ok(Self {
            database_url: get("DATABASE_URL").filter(|v| !v.is_empty()),
            nats_url: get("NATS_URL").filter(|v| !v.is_empty()),
            port: parse(&get, "PORT", "port")?.unwrap_or(8083),
            pricing,
            razorpay,
            admin_token: get("ADMIN_TOKEN").filter(|v| !v.is_empty()),
        })
    }
}

fn parse<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &'static str, expected: &'static str) -> Result<Option<T>, ConfigError> {
    match get(key) {
        None => Ok(None),
        Some(value) => value.trim().parse().map(Some).map_err(|_| ConfigError::Invalid { key, expected, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let mut map: HashMap<String, String> = HashMap::from([
            ("RAZORPAY_KEY_ID".to_string(), "rzp_test_key".to_string()),
            ("RAZORPAY_KEY_SECRET".to_string(), "secret".to_string()),
            ("RAZORPAY_WEBHOOK_SECRET".to_string(), "whsec".to_string()),
        ]);
        for (k, v) in pairs { map.insert(k.to_string(), v.to_string()); }
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.port, 8083);
        assert!(config.database_url.is_none());
        assert_eq!(config.pricing, PricingPolicy::default());
        assert_eq!(config.razorpay.base_url, "https://api.razorpay.com");
    }

    #[test]
    fn test_overrides() {
        let config = AppConfig::from_lookup(lookup(&[("PORT", "9000"), ("TAX_RATE", "0.12"), ("CURRENCY", "inr"), ("SHIPPING_FEE", "40")])).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.pricing.tax_rate, Decimal::new(12, 2));
        assert_eq!(config.pricing.currency, "INR");
        assert_eq!(config.pricing.shipping_fee, Decimal::new(40, 0));
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(AppConfig::from_lookup(lookup(&[("PORT", "http")])), Err(ConfigError::Invalid { key: "PORT", .. })));
        assert!(matches!(AppConfig::from_lookup(lookup(&[("TAX_RATE", "18")])), Err(ConfigError::Invalid { key: "TAX_RATE", .. })));
    }

    #[test]
    fn test_missing_gateway_keys() {
        let err = AppConfig::from_lookup(|_| None).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("RAZORPAY_KEY_ID")));
    }
}
