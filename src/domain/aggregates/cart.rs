//! Cart Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use crate::domain::value_objects::{Money, Sku};

/// A user's shopping cart. Every cart has exactly one owner.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Cart {
    id: Uuid,
    user_id: Uuid,
    items: Vec<CartItem>,
    subtotal: Money,
    currency: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub name: String,
    pub sku: Sku,
    pub quantity: u32,
    pub unit_price: Money,
}

impl CartItem {
    pub fn line_total(&self) -> Money { self.unit_price.multiply(self.quantity) }
    fn is(&self, product_id: Uuid, variant_id: Option<Uuid>) -> bool { self.product_id == product_id && self.variant_id == variant_id }
}

impl Cart {
    pub fn for_user(user_id: Uuid, currency: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(), user_id, items: vec![], subtotal: Money::zero(currency),
            currency: currency.to_uppercase(), created_at: now, updated_at: now,
        }
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn user_id(&self) -> Uuid { self.user_id }
    pub fn items(&self) -> &[CartItem] { &self.items }
    pub fn subtotal(&self) -> &Money { &self.subtotal }
    pub fn item_count(&self) -> usize { self.items.len() }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }

    /// Quantity already in the cart for a product/variant pair.
    pub fn quantity_of(&self, product_id: Uuid, variant_id: Option<Uuid>) -> u32 {
        self.items.iter().find(|i| i.is(product_id, variant_id)).map_or(0, |i| i.quantity)
    }

    pub fn add_item(&mut self, item: CartItem) -> Result<(), CartError> {
        if item.quantity == 0 { return Err(CartError::InvalidQuantity); }
        if item.unit_price.currency() != self.currency { return Err(CartError::CurrencyMismatch); }
        if let Some(existing) = self.items.iter_mut().find(|i| i.is(item.product_id, item.variant_id)) {
            existing.quantity = existing.quantity.saturating_add(item.quantity);
            existing.unit_price = item.unit_price;
        } else {
            self.items.push(item);
        }
        self.recalculate();
        Ok(())
    }

    pub fn update_quantity(&mut self, product_id: Uuid, variant_id: Option<Uuid>, quantity: u32) -> Result<(), CartError> {
        let item = self.items.iter_mut().find(|i| i.is(product_id, variant_id)).ok_or(CartError::ItemNotFound)?;
        if quantity == 0 { self.items.retain(|i| !i.is(product_id, variant_id)); }
        else { item.quantity = quantity; }
        self.recalculate();
        Ok(())
    }

    pub fn remove_item(&mut self, product_id: Uuid, variant_id: Option<Uuid>) -> Result<(), CartError> {
        let before = self.items.len();
        self.items.retain(|i| !i.is(product_id, variant_id));
        if self.items.len() == before { return Err(CartError::ItemNotFound); }
        self.recalculate();
        Ok(())
    }

    pub fn clear(&mut self) { self.items.clear(); self.recalculate(); }

    fn recalculate(&mut self) {
        self.subtotal = self.items.iter().fold(Money::zero(&self.currency), |acc, i| acc.add(&i.line_total()).unwrap_or(acc));
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CartError {
    #[error("item not found in cart")]
    ItemNotFound,
    #[error("quantity must be greater than zero")]
    InvalidQuantity,
    #[error("item currency does not match cart currency")]
    CurrencyMismatch,
}
