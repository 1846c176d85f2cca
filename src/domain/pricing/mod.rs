//! Order totals: discount, shipping and tax on top of the line subtotal.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use crate::domain::value_objects::{round_money, Money};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingPolicy {
    pub currency: String,
    pub shipping_fee: Decimal,
    pub free_shipping_threshold: Decimal,
    /// Fraction, e.g. `0.12` for 12% GST.
    pub tax_rate: Decimal,
}

impl Default for PricingPolicy {
    fn default() -> Self {
        Self { currency: "INR".into(), shipping_fee: Decimal::new(50, 0), free_shipping_threshold: Decimal::new(500, 0), tax_rate: Decimal::ZERO }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub subtotal: Money,
    pub discount: Money,
    pub shipping: Money,
    pub tax: Money,
    pub total: Money,
}

impl PricingPolicy {
    pub fn quote(&self, subtotal: Decimal, discount: Decimal) -> Totals {
        let discount = discount.clamp(Decimal::ZERO, subtotal);
        let taxable = subtotal - discount;
        let shipping = if taxable >= self.free_shipping_threshold { Decimal::ZERO } else { self.shipping_fee };
        let tax = round_money(taxable * self.tax_rate);
        let money = |amount| Money::new(amount, &self.currency);
        Totals {
            subtotal: money(subtotal),
            discount: money(discount),
            shipping: money(shipping),
            tax: money(tax),
            total: money(taxable + shipping + tax),
        }
    }
}
