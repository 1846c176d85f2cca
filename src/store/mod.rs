//! Persistence seam.
//!
//! Reads are plain lookups. Writes that span aggregates go through
//! [`Store::place_order`] and [`Store::apply_update`], which each commit
//! all-or-nothing and compare-and-set on the statuses the caller read.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;
use crate::domain::aggregates::{Cart, Coupon, LineItem, Order, OrderStatus, Payment, PaymentStatus, Product, Wallet};
use crate::domain::value_objects::Money;
use crate::{CheckoutError, Result};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("document encoding: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A new order together with everything that has to change with it.
#[derive(Clone, Debug)]
pub struct OrderPlacement {
    pub order: Order,
    pub payment: Payment,
    /// Debited from the user's wallet in the same commit.
    pub wallet_debit: Option<Money>,
    pub clear_cart: bool,
}

#[derive(Clone, Debug)]
pub enum Placement {
    Created,
    /// The user already checked out with this key; nothing was written.
    Existing { order: Order, payment: Payment },
}

/// Saves a changed order (and optionally its payment) if neither moved
/// since the caller read them, with the side effects of the change.
#[derive(Clone, Debug)]
pub struct OrderUpdate {
    pub order: Order,
    pub payment: Option<Payment>,
    pub expected_order: OrderStatus,
    pub expected_payment: Option<PaymentStatus>,
    pub release_stock: bool,
    pub restore_coupon: bool,
    pub wallet_credit: Option<Money>,
    pub clear_cart: bool,
}

impl OrderUpdate {
    pub fn new(order: Order, expected_order: OrderStatus) -> Self {
        Self { order, payment: None, expected_order, expected_payment: None, release_stock: false, restore_coupon: false, wallet_credit: None, clear_cart: false }
    }

    pub fn with_payment(mut self, payment: Payment, expected: PaymentStatus) -> Self {
        self.payment = Some(payment);
        self.expected_payment = Some(expected);
        self
    }

    /// Puts the order's stock and coupon use back.
    pub fn releasing(mut self) -> Self { self.release_stock = true; self.restore_coupon = true; self }
    pub fn crediting_wallet(mut self, amount: Money) -> Self { self.wallet_credit = Some(amount); self }
    pub fn clearing_cart(mut self) -> Self { self.clear_cart = true; self }
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn product(&self, id: Uuid) -> Result<Option<Product>>;
    async fn products(&self) -> Result<Vec<Product>>;
    async fn save_product(&self, product: &Product) -> Result<()>;

    async fn cart(&self, user_id: Uuid) -> Result<Option<Cart>>;
    async fn save_cart(&self, cart: &Cart) -> Result<()>;

    async fn coupon(&self, code: &str) -> Result<Option<Coupon>>;
    async fn save_coupon(&self, coupon: &Coupon) -> Result<()>;

    async fn wallet(&self, user_id: Uuid) -> Result<Option<Wallet>>;
    async fn credit_wallet(&self, user_id: Uuid, amount: &Money, reference: &str) -> Result<Wallet>;

    async fn order(&self, id: Uuid) -> Result<Option<Order>>;
    /// Newest first.
    async fn orders_for_user(&self, user_id: Uuid) -> Result<Vec<Order>>;
    async fn order_by_checkout_key(&self, user_id: Uuid, checkout_key: &str) -> Result<Option<Order>>;
    async fn payment_for_order(&self, order_id: Uuid) -> Result<Option<Payment>>;
    async fn payment_by_gateway_order(&self, gateway_order_id: &str) -> Result<Option<Payment>>;

    /// Rejects a reused checkout key, reserves stock, redeems the coupon,
    /// debits the wallet, inserts order and payment and clears the cart.
    async fn place_order(&self, placement: OrderPlacement) -> Result<Placement>;

    /// Returns `false` when the stored order or payment status no longer
    /// matches the expectation; nothing is written in that case.
    async fn apply_update(&self, update: OrderUpdate) -> Result<bool>;

    async fn webhook_seen(&self, event_id: &str) -> Result<bool>;
    /// Returns `false` when the webhook event was already recorded.
    async fn record_webhook(&self, event_id: &str) -> Result<bool>;
}

/// Aggregated stock demand per product/variant pair.
pub(crate) fn stock_demand(lines: &[LineItem]) -> Vec<(Uuid, Option<Uuid>, u32)> {
    let mut demand: Vec<(Uuid, Option<Uuid>, u32)> = Vec::new();
    for line in lines {
        match demand.iter_mut().find(|(p, v, _)| *p == line.product_id && *v == line.variant_id) {
            Some(entry) => entry.2 += line.quantity,
            None => demand.push((line.product_id, line.variant_id, line.quantity)),
        }
    }
    demand
}

/// Reserves every line against `products`; the map is partially modified on
/// error, so callers work on copies or roll back.
pub(crate) fn reserve_lines(products: &mut HashMap<Uuid, Product>, lines: &[LineItem]) -> Result<()> {
    for (product_id, variant_id, quantity) in stock_demand(lines) {
        let product = products.get_mut(&product_id).ok_or_else(|| CheckoutError::ProductUnavailable(product_id.to_string()))?;
        if !product.is_active() {
            return Err(CheckoutError::ProductUnavailable(product.name().to_string()));
        }
        product.reserve(variant_id, quantity)?;
    }
    Ok(())
}

/// Returns the units of every line. Products deleted since are skipped.
pub(crate) fn release_lines(products: &mut HashMap<Uuid, Product>, lines: &[LineItem]) -> Result<()> {
    for (product_id, variant_id, quantity) in stock_demand(lines) {
        if let Some(product) = products.get_mut(&product_id) {
            product.release(variant_id, quantity)?;
        }
    }
    Ok(())
}

pub(crate) fn status_matches(order: &Order, payment: Option<&Payment>, update: &OrderUpdate) -> bool {
    if order.status() != update.expected_order { return false; }
    match (update.expected_payment, payment) {
        (None, _) => true,
        (Some(expected), Some(stored)) => stored.status() == expected,
        (Some(_), None) => false,
    }
}

impl From<sqlx::Error> for CheckoutError {
    fn from(e: sqlx::Error) -> Self { CheckoutError::Storage(e.into()) }
}

impl From<serde_json::Error> for CheckoutError {
    fn from(e: serde_json::Error) -> Self { CheckoutError::Storage(e.into()) }
}
