//! Product Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use crate::domain::value_objects::{Sku, Money, Quantity};
use crate::domain::events::{DomainEvent, ProductEvent};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Product {
    id: Uuid,
    sku: Sku,
    name: String,
    description: String,
    product_type: ProductType,
    price: Money,
    stock: Quantity,
    status: ProductStatus,
    variants: Vec<Variant>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

#[derive(Clone, Debug, Serialize, Deserialize)] pub struct Variant { pub id: Uuid, pub sku: Sku, pub name: String, pub price: Money, pub stock: Quantity }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus { #[default] Draft, Active, Archived }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductType { Medicine, Device, Wellness, PersonalCare, #[default] Other }

impl ProductType {
    pub fn is_medicine(&self) -> bool { matches!(self, Self::Medicine) }
}

impl Product {
    pub fn create(sku: Sku, name: impl Into<String>, product_type: ProductType, price: Money) -> Self {
        let id = Uuid::now_v7();
        let now = Utc::now();
        let mut product = Self {
            id, sku: sku.clone(), name: name.into(), description: String::new(), product_type,
            price, stock: Quantity::default(), status: ProductStatus::Draft, variants: vec![],
            created_at: now, updated_at: now, events: vec![],
        };
        product.raise_event(DomainEvent::Product(ProductEvent::Created { product_id: id, sku }));
        product
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn sku(&self) -> &Sku { &self.sku }
    pub fn name(&self) -> &str { &self.name }
    pub fn description(&self) -> &str { &self.description }
    pub fn product_type(&self) -> ProductType { self.product_type }
    pub fn price(&self) -> &Money { &self.price }
    pub fn stock(&self) -> Quantity { self.stock }
    pub fn status(&self) -> ProductStatus { self.status }
    pub fn variants(&self) -> &[Variant] { &self.variants }
    pub fn is_active(&self) -> bool { self.status == ProductStatus::Active }
    pub fn is_medicine(&self) -> bool { self.product_type.is_medicine() }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn add_variant(&mut self, sku: Sku, name: impl Into<String>, price: Money) -> Uuid {
        let id = Uuid::now_v7();
        self.variants.push(Variant { id, sku, name: name.into(), price, stock: Quantity::default() });
        self.touch();
        id
    }

    pub fn publish(&mut self) -> Result<(), ProductError> {
        if self.name.trim().is_empty() { return Err(ProductError::MissingName); }
        self.status = ProductStatus::Active;
        self.touch();
        self.raise_event(DomainEvent::Product(ProductEvent::Published { product_id: self.id }));
        Ok(())
    }

    pub fn archive(&mut self) { self.status = ProductStatus::Archived; self.touch(); }

    pub fn update_price(&mut self, new_price: Money) {
        self.price = new_price;
        self.touch();
    }

    /// Display name of a cart or order line, including the variant name.
    pub fn line_name(&self, variant_id: Option<Uuid>) -> Result<String, ProductError> {
        Ok(match variant_id {
            None => self.name.clone(),
            Some(_) => format!("{} ({})", self.name, self.variant(variant_id)?.name),
        })
    }

    pub fn line_sku(&self, variant_id: Option<Uuid>) -> Result<&Sku, ProductError> {
        match variant_id {
            None => Ok(&self.sku),
            Some(_) => Ok(&self.variant(variant_id)?.sku),
        }
    }

    pub fn unit_price(&self, variant_id: Option<Uuid>) -> Result<&Money, ProductError> {
        match variant_id {
            None => Ok(&self.price),
            Some(_) => Ok(&self.variant(variant_id)?.price),
        }
    }

    pub fn available(&self, variant_id: Option<Uuid>) -> Result<u32, ProductError> {
        match variant_id {
            None => Ok(self.stock.value()),
            Some(_) => Ok(self.variant(variant_id)?.stock.value()),
        }
    }

    pub fn add_inventory(&mut self, variant_id: Option<Uuid>, qty: u32) -> Result<(), ProductError> {
        let stock = self.stock_mut(variant_id)?;
        *stock = stock.add(qty);
        self.touch();
        self.raise_event(DomainEvent::Product(ProductEvent::InventoryAdded { product_id: self.id, variant_id, quantity: qty }));
        Ok(())
    }

    /// Takes `qty` units out of stock for an order. Stock is untouched on failure.
    pub fn reserve(&mut self, variant_id: Option<Uuid>, qty: u32) -> Result<(), ProductError> {
        let name = self.name.clone();
        let stock = self.stock_mut(variant_id)?;
        let available = stock.value();
        *stock = stock.subtract(qty).ok_or(ProductError::InsufficientInventory { product: name, requested: qty, available })?;
        self.touch();
        Ok(())
    }

    /// Puts reserved units back, e.g. after a cancelled order.
    pub fn release(&mut self, variant_id: Option<Uuid>, qty: u32) -> Result<(), ProductError> {
        let stock = self.stock_mut(variant_id)?;
        *stock = stock.add(qty);
        self.touch();
        Ok(())
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
    fn touch(&mut self) { self.updated_at = Utc::now(); }

    fn variant(&self, variant_id: Option<Uuid>) -> Result<&Variant, ProductError> {
        self.variants.iter().find(|v| Some(v.id) == variant_id).ok_or(ProductError::VariantNotFound)
    }

    fn stock_mut(&mut self, variant_id: Option<Uuid>) -> Result<&mut Quantity, ProductError> {
        match variant_id {
            None => Ok(&mut self.stock),
            Some(id) => self.variants.iter_mut().find(|v| v.id == id).map(|v| &mut v.stock).ok_or(ProductError::VariantNotFound),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProductError {
    #[error("product name is missing")]
    MissingName,
    #[error("variant not found")]
    VariantNotFound,
    #[error("insufficient inventory for {product}: requested {requested}, available {available}")]
    InsufficientInventory { product: String, requested: u32, available: u32 },
}
