//! Order Aggregate
//!
//! An order is the frozen result of a checkout. Lines and totals never change
//! after placement; only the fulfillment and payment status move.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use crate::domain::aggregates::payment::PaymentMethod;
use crate::domain::aggregates::product::ProductType;
use crate::domain::events::{DomainEvent, OrderEvent};
use crate::domain::pricing::Totals;
use crate::domain::value_objects::{Money, Sku};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Order {
    id: Uuid,
    order_number: String,
    user_id: Uuid,
    checkout_key: String,
    status: OrderStatus,
    payment_status: OrderPaymentStatus,
    payment_method: PaymentMethod,
    lines: Vec<LineItem>,
    totals: Totals,
    coupon_code: Option<String>,
    shipping_address: Address,
    tracking_number: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LineItem { pub product_id: Uuid, pub variant_id: Option<Uuid>, pub name: String, pub sku: Sku, pub product_type: ProductType, pub quantity: u32, pub unit_price: Money, pub total: Money }

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address { pub name: String, pub phone: String, pub line1: String, pub line2: Option<String>, pub city: String, pub state: String, pub pincode: String, pub country: String }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus { #[default] Pending, Confirmed, Processing, Shipped, Delivered, Cancelled }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderPaymentStatus { #[default] Pending, Paid, Failed, Refunded }

/// Everything needed to freeze a checkout into an order.
#[derive(Clone, Debug)]
pub struct NewOrder {
    pub user_id: Uuid,
    pub checkout_key: String,
    pub payment_method: PaymentMethod,
    pub lines: Vec<LineItem>,
    pub totals: Totals,
    pub coupon_code: Option<String>,
    pub shipping_address: Address,
}

/// `MM` + date + six random digits, e.g. `MM20261016042317`.
pub fn generate_order_number(now: DateTime<Utc>) -> String {
    format!("MM{}{:06}", now.format("%Y%m%d"), rand::thread_rng().gen_range(0..1_000_000))
}

impl Order {
    pub fn place(new: NewOrder) -> Result<Self, OrderError> {
        if new.lines.is_empty() { return Err(OrderError::NoItems); }
        let now = Utc::now();
        let (status, payment_status) = match new.payment_method {
            PaymentMethod::Razorpay => (OrderStatus::Pending, OrderPaymentStatus::Pending),
            PaymentMethod::Cod => (OrderStatus::Confirmed, OrderPaymentStatus::Pending),
            PaymentMethod::Wallet => (OrderStatus::Confirmed, OrderPaymentStatus::Paid),
        };
        let mut order = Self {
            id: Uuid::now_v7(), order_number: generate_order_number(now), user_id: new.user_id,
            checkout_key: new.checkout_key, status, payment_status, payment_method: new.payment_method,
            lines: new.lines, totals: new.totals, coupon_code: new.coupon_code,
            shipping_address: new.shipping_address, tracking_number: None,
            created_at: now, updated_at: now, events: vec![],
        };
        order.raise_event(DomainEvent::Order(OrderEvent::Placed {
            order_id: order.id, order_number: order.order_number.clone(), user_id: order.user_id, total: order.totals.total.clone(),
        }));
        if status == OrderStatus::Confirmed {
            order.raise_event(DomainEvent::Order(OrderEvent::Confirmed { order_id: order.id }));
        }
        Ok(order)
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn order_number(&self) -> &str { &self.order_number }
    pub fn user_id(&self) -> Uuid { self.user_id }
    pub fn checkout_key(&self) -> &str { &self.checkout_key }
    pub fn status(&self) -> OrderStatus { self.status }
    pub fn payment_status(&self) -> OrderPaymentStatus { self.payment_status }
    pub fn payment_method(&self) -> PaymentMethod { self.payment_method }
    pub fn lines(&self) -> &[LineItem] { &self.lines }
    pub fn totals(&self) -> &Totals { &self.totals }
    pub fn total(&self) -> &Money { &self.totals.total }
    pub fn coupon_code(&self) -> Option<&str> { self.coupon_code.as_deref() }
    pub fn shipping_address(&self) -> &Address { &self.shipping_address }
    pub fn tracking_number(&self) -> Option<&str> { self.tracking_number.as_deref() }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }

    /// True when every line is a medicine; used by MedixMall mode.
    pub fn is_medicine_only(&self) -> bool { self.lines.iter().all(|l| l.product_type.is_medicine()) }

    pub fn mark_paid(&mut self) -> Result<(), OrderError> {
        if self.payment_status != OrderPaymentStatus::Pending || self.status == OrderStatus::Cancelled {
            return Err(self.invalid("mark paid"));
        }
        self.payment_status = OrderPaymentStatus::Paid;
        if self.status == OrderStatus::Pending {
            self.status = OrderStatus::Confirmed;
            self.raise_event(DomainEvent::Order(OrderEvent::Confirmed { order_id: self.id }));
        }
        self.touch();
        Ok(())
    }

    pub fn mark_payment_failed(&mut self) -> Result<(), OrderError> {
        if self.status != OrderStatus::Pending || self.payment_status != OrderPaymentStatus::Pending {
            return Err(self.invalid("fail payment"));
        }
        self.status = OrderStatus::Cancelled;
        self.payment_status = OrderPaymentStatus::Failed;
        self.touch();
        self.raise_event(DomainEvent::Order(OrderEvent::PaymentFailed { order_id: self.id }));
        Ok(())
    }

    pub fn process(&mut self) -> Result<(), OrderError> {
        if self.status != OrderStatus::Confirmed { return Err(self.invalid("process")); }
        self.status = OrderStatus::Processing;
        self.touch();
        Ok(())
    }

    pub fn ship(&mut self, tracking: impl Into<String>) -> Result<(), OrderError> {
        if !matches!(self.status, OrderStatus::Confirmed | OrderStatus::Processing) { return Err(self.invalid("ship")); }
        let tracking = tracking.into();
        self.status = OrderStatus::Shipped;
        self.tracking_number = Some(tracking.clone());
        self.touch();
        self.raise_event(DomainEvent::Order(OrderEvent::Shipped { order_id: self.id, tracking }));
        Ok(())
    }

    pub fn deliver(&mut self) -> Result<(), OrderError> {
        if self.status != OrderStatus::Shipped { return Err(self.invalid("deliver")); }
        self.status = OrderStatus::Delivered;
        self.touch();
        self.raise_event(DomainEvent::Order(OrderEvent::Delivered { order_id: self.id }));
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), OrderError> {
        if !matches!(self.status, OrderStatus::Pending | OrderStatus::Confirmed | OrderStatus::Processing) {
            return Err(self.invalid("cancel"));
        }
        self.status = OrderStatus::Cancelled;
        if self.payment_status == OrderPaymentStatus::Paid { self.payment_status = OrderPaymentStatus::Refunded; }
        self.touch();
        self.raise_event(DomainEvent::Order(OrderEvent::Cancelled { order_id: self.id, user_id: self.user_id }));
        Ok(())
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
    fn touch(&mut self) { self.updated_at = Utc::now(); }
    fn invalid(&self, action: &'static str) -> OrderError { OrderError::InvalidTransition { from: self.status, action } }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    #[error("order has no items")]
    NoItems,
    #[error("cannot {action} an order in status {from:?}")]
    InvalidTransition { from: OrderStatus, action: &'static str },
}
