//! Domain events
use crate::domain::value_objects::{Money, Sku};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "aggregate", content = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    Product(ProductEvent),
    Order(OrderEvent),
    Payment(PaymentEvent),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProductEvent {
    Created { product_id: Uuid, sku: Sku },
    Published { product_id: Uuid },
    InventoryAdded { product_id: Uuid, variant_id: Option<Uuid>, quantity: u32 },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderEvent {
    Placed { order_id: Uuid, order_number: String, user_id: Uuid, total: Money },
    Confirmed { order_id: Uuid },
    PaymentFailed { order_id: Uuid },
    Cancelled { order_id: Uuid, user_id: Uuid },
    Shipped { order_id: Uuid, tracking: String },
    Delivered { order_id: Uuid },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentEvent {
    Succeeded { payment_id: Uuid, order_id: Uuid, amount: Money },
    Failed { payment_id: Uuid, order_id: Uuid, reason: String },
    Refunded { payment_id: Uuid, order_id: Uuid, amount: Money },
}

impl DomainEvent {
    /// Subject suffix used when the event leaves the process, e.g. `order.placed`.
    pub fn subject(&self) -> &'static str {
        match self {
            Self::Product(ProductEvent::Created { .. }) => "product.created",
            Self::Product(ProductEvent::Published { .. }) => "product.published",
            Self::Product(ProductEvent::InventoryAdded { .. }) => "product.inventory_added",
            Self::Order(OrderEvent::Placed { .. }) => "order.placed",
            Self::Order(OrderEvent::Confirmed { .. }) => "order.confirmed",
            Self::Order(OrderEvent::PaymentFailed { .. }) => "order.payment_failed",
            Self::Order(OrderEvent::Cancelled { .. }) => "order.cancelled",
            Self::Order(OrderEvent::Shipped { .. }) => "order.shipped",
            Self::Order(OrderEvent::Delivered { .. }) => "order.delivered",
            Self::Payment(PaymentEvent::Succeeded { .. }) => "payment.succeeded",
            Self::Payment(PaymentEvent::Failed { .. }) => "payment.failed",
            Self::Payment(PaymentEvent::Refunded { .. }) => "payment.refunded",
        }
    }
}
