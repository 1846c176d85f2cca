//! Coupon Aggregate
//!
//! A coupon is a discount rule with a validity window, a global usage cap,
//! a per-user cap and an optional list of users it is assigned to.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;
use crate::domain::value_objects::round_money;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountType { Percentage, Fixed }

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Coupon {
    code: String,
    description: String,
    discount_type: DiscountType,
    value: Decimal,
    max_discount: Option<Decimal>,
    min_order_amount: Decimal,
    valid_from: DateTime<Utc>,
    valid_until: DateTime<Utc>,
    usage_limit: Option<u32>,
    used_count: u32,
    per_user_limit: Option<u32>,
    assigned_users: Vec<Uuid>,
    redemptions: BTreeMap<Uuid, u32>,
    is_active: bool,
}

/// Normalizes a user-entered code to its stored form.
pub fn normalize_code(code: &str) -> String { code.trim().to_uppercase() }

impl Coupon {
    pub fn new(code: &str, discount_type: DiscountType, value: Decimal, valid_from: DateTime<Utc>, valid_until: DateTime<Utc>) -> Result<Self, CouponError> {
        let code = normalize_code(code);
        if code.is_empty() { return Err(CouponError::InvalidDefinition("code is empty")); }
        if value <= Decimal::ZERO { return Err(CouponError::InvalidDefinition("value must be positive")); }
        if discount_type == DiscountType::Percentage && value > Decimal::ONE_HUNDRED {
            return Err(CouponError::InvalidDefinition("percentage above 100"));
        }
        if valid_until < valid_from { return Err(CouponError::InvalidDefinition("validity window is inverted")); }
        Ok(Self {
            code, description: String::new(), discount_type, value, max_discount: None,
            min_order_amount: Decimal::ZERO, valid_from, valid_until, usage_limit: None, used_count: 0,
            per_user_limit: None, assigned_users: vec![], redemptions: BTreeMap::new(), is_active: true,
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self { self.description = description.into(); self }
    pub fn with_max_discount(mut self, cap: Decimal) -> Self { self.max_discount = Some(cap); self }
    pub fn with_min_order_amount(mut self, min: Decimal) -> Self { self.min_order_amount = min; self }
    pub fn with_usage_limit(mut self, limit: u32) -> Self { self.usage_limit = Some(limit); self }
    pub fn with_per_user_limit(mut self, limit: u32) -> Self { self.per_user_limit = Some(limit); self }
    pub fn assigned_to(mut self, users: Vec<Uuid>) -> Self { self.assigned_users = users; self }

    pub fn code(&self) -> &str { &self.code }
    pub fn discount_type(&self) -> DiscountType { self.discount_type }
    pub fn used_count(&self) -> u32 { self.used_count }
    pub fn is_active(&self) -> bool { self.is_active }
    pub fn redemptions_by(&self, user_id: Uuid) -> u32 { self.redemptions.get(&user_id).copied().unwrap_or(0) }

    pub fn deactivate(&mut self) { self.is_active = false; }

    /// Keeps the redemption history of the definition this one replaces.
    pub fn carry_usage_from(&mut self, previous: &Coupon) {
        self.used_count = previous.used_count;
        self.redemptions = previous.redemptions.clone();
    }

    /// Checks every rule and returns the discount this coupon grants on `subtotal`.
    pub fn evaluate(&self, user_id: Uuid, subtotal: Decimal, now: DateTime<Utc>) -> Result<Decimal, CouponError> {
        if !self.is_active { return Err(CouponError::Inactive); }
        if now < self.valid_from { return Err(CouponError::NotYetValid); }
        if now > self.valid_until { return Err(CouponError::Expired); }
        if self.usage_limit.is_some_and(|limit| self.used_count >= limit) { return Err(CouponError::UsageLimitReached); }
        if !self.assigned_users.is_empty() && !self.assigned_users.contains(&user_id) { return Err(CouponError::NotAssigned); }
        if self.per_user_limit.is_some_and(|limit| self.redemptions_by(user_id) >= limit) { return Err(CouponError::PerUserLimitReached); }
        if subtotal < self.min_order_amount { return Err(CouponError::MinimumOrderNotMet { minimum: self.min_order_amount }); }
        Ok(self.discount_on(subtotal))
    }

    fn discount_on(&self, subtotal: Decimal) -> Decimal {
        let raw = match self.discount_type {
            DiscountType::Percentage => {
                let pct = subtotal * self.value / Decimal::ONE_HUNDRED;
                self.max_discount.map_or(pct, |cap| pct.min(cap))
            }
            DiscountType::Fixed => self.value,
        };
        round_money(raw.min(subtotal).max(Decimal::ZERO))
    }

    /// Records one use by `user_id`. Limits are checked again because another
    /// checkout may have redeemed the last use since `evaluate`.
    pub fn redeem(&mut self, user_id: Uuid) -> Result<(), CouponError> {
        if self.usage_limit.is_some_and(|limit| self.used_count >= limit) { return Err(CouponError::UsageLimitReached); }
        if self.per_user_limit.is_some_and(|limit| self.redemptions_by(user_id) >= limit) { return Err(CouponError::PerUserLimitReached); }
        self.used_count += 1;
        *self.redemptions.entry(user_id).or_insert(0) += 1;
        Ok(())
    }

    /// Gives back a use after the order that redeemed it was cancelled.
    pub fn restore(&mut self, user_id: Uuid) {
        self.used_count = self.used_count.saturating_sub(1);
        if let Some(count) = self.redemptions.get_mut(&user_id) {
            *count = count.saturating_sub(1);
            if *count == 0 { self.redemptions.remove(&user_id); }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CouponError {
    #[error("coupon not found")]
    NotFound,
    #[error("coupon is not active")]
    Inactive,
    #[error("coupon is not valid yet")]
    NotYetValid,
    #[error("coupon has expired")]
    Expired,
    #[error("coupon usage limit reached")]
    UsageLimitReached,
    #[error("coupon is not available for this user")]
    NotAssigned,
    #[error("coupon already used the maximum number of times by this user")]
    PerUserLimitReached,
    #[error("minimum order amount for this coupon is {minimum}")]
    MinimumOrderNotMet { minimum: Decimal },
    #[error("invalid coupon definition: {0}")]
    InvalidDefinition(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        let now = Utc::now();
        (now - Duration::days(1), now + Duration::days(30))
    }

    fn percent(value: i64) -> Coupon {
        let (from, until) = window();
        Coupon::new("health10", DiscountType::Percentage, Decimal::new(value, 0), from, until).unwrap()
    }

    #[test]
    fn test_percentage_capped_by_max_discount() {
        let coupon = percent(20).with_max_discount(Decimal::new(100, 0));
        let user = Uuid::new_v4();
        assert_eq!(coupon.evaluate(user, Decimal::new(300, 0), Utc::now()).unwrap(), Decimal::new(60, 0));
        assert_eq!(coupon.evaluate(user, Decimal::new(1000, 0), Utc::now()).unwrap(), Decimal::new(100, 0));
    }

    #[test]
    fn test_fixed_never_exceeds_subtotal() {
        let (from, until) = window();
        let coupon = Coupon::new("FLAT150", DiscountType::Fixed, Decimal::new(150, 0), from, until).unwrap();
        assert_eq!(coupon.evaluate(Uuid::new_v4(), Decimal::new(120, 0), Utc::now()).unwrap(), Decimal::new(120, 0));
    }

    #[test]
    fn test_percentage_rounds_to_paise() {
        let coupon = percent(15);
        let discount = coupon.evaluate(Uuid::new_v4(), Decimal::new(3333, 2), Utc::now()).unwrap();
        assert_eq!(discount, Decimal::new(500, 2));
    }

    #[test]
    fn test_min_order_amount_gate() {
        let coupon = percent(10).with_min_order_amount(Decimal::new(499, 0));
        let err = coupon.evaluate(Uuid::new_v4(), Decimal::new(400, 0), Utc::now()).unwrap_err();
        assert_eq!(err, CouponError::MinimumOrderNotMet { minimum: Decimal::new(499, 0) });
    }

    #[test]
    fn test_validity_window() {
        let coupon = percent(10);
        assert_eq!(coupon.evaluate(Uuid::new_v4(), Decimal::ONE_HUNDRED, Utc::now() - Duration::days(2)), Err(CouponError::NotYetValid));
        assert_eq!(coupon.evaluate(Uuid::new_v4(), Decimal::ONE_HUNDRED, Utc::now() + Duration::days(31)), Err(CouponError::Expired));
    }

    #[test]
    fn test_assignment_and_limits() {
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let mut coupon = percent(10).assigned_to(vec![alice]).with_per_user_limit(1).with_usage_limit(5);
        assert_eq!(coupon.evaluate(bob, Decimal::ONE_HUNDRED, Utc::now()), Err(CouponError::NotAssigned));
        coupon.redeem(alice).unwrap();
        assert_eq!(coupon.evaluate(alice, Decimal::ONE_HUNDRED, Utc::now()), Err(CouponError::PerUserLimitReached));
        assert_eq!(coupon.redeem(alice), Err(CouponError::PerUserLimitReached));
        coupon.restore(alice);
        assert_eq!(coupon.used_count(), 0);
        assert!(coupon.evaluate(alice, Decimal::ONE_HUNDRED, Utc::now()).is_ok());
    }

    #[test]
    fn test_deactivated_coupon_is_rejected() {
        let mut coupon = percent(10);
        coupon.deactivate();
        assert!(!coupon.is_active());
        assert_eq!(coupon.evaluate(Uuid::new_v4(), Decimal::ONE_HUNDRED, Utc::now()), Err(CouponError::Inactive));
    }

    #[test]
    fn test_redefinition_keeps_usage() {
        let user = Uuid::new_v4();
        let mut old = percent(10).with_per_user_limit(1);
        old.redeem(user).unwrap();
        let mut new = percent(15).with_per_user_limit(1);
        new.carry_usage_from(&old);
        assert_eq!(new.used_count(), 1);
        assert_eq!(new.evaluate(user, Decimal::ONE_HUNDRED, Utc::now()), Err(CouponError::PerUserLimitReached));
    }

    #[test]
    fn test_global_usage_cap() {
        let mut coupon = percent(10).with_usage_limit(1);
        coupon.redeem(Uuid::new_v4()).unwrap();
        assert_eq!(coupon.evaluate(Uuid::new_v4(), Decimal::ONE_HUNDRED, Utc::now()), Err(CouponError::UsageLimitReached));
    }

    #[test]
    fn test_rejects_bad_definitions() {
        let (from, until) = window();
        assert!(Coupon::new("X", DiscountType::Percentage, Decimal::new(101, 0), from, until).is_err());
        assert!(Coupon::new("X", DiscountType::Fixed, Decimal::ZERO, from, until).is_err());
        assert!(Coupon::new(" ", DiscountType::Fixed, Decimal::ONE, from, until).is_err());
        assert!(Coupon::new("X", DiscountType::Fixed, Decimal::ONE, until, from).is_err());
    }
}
