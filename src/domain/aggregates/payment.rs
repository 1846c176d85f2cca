//! Payment Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use crate::domain::events::{DomainEvent, PaymentEvent};
use crate::domain::value_objects::Money;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod { Razorpay, Cod, Wallet }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus { #[default] Pending, Successful, Failed, RefundPending, Refunded }

/// Outcome of a status change; replays report `AlreadyApplied` instead of failing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition { Applied, AlreadyApplied }

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Payment {
    id: Uuid,
    order_id: Uuid,
    user_id: Uuid,
    method: PaymentMethod,
    amount: Money,
    status: PaymentStatus,
    gateway_order_id: Option<String>,
    gateway_payment_id: Option<String>,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

impl Payment {
    pub fn for_order(order_id: Uuid, user_id: Uuid, method: PaymentMethod, amount: Money) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(), order_id, user_id, method, amount, status: PaymentStatus::Pending,
            gateway_order_id: None, gateway_payment_id: None, failure_reason: None,
            created_at: now, updated_at: now, events: vec![],
        }
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn order_id(&self) -> Uuid { self.order_id }
    pub fn user_id(&self) -> Uuid { self.user_id }
    pub fn method(&self) -> PaymentMethod { self.method }
    pub fn amount(&self) -> &Money { &self.amount }
    pub fn status(&self) -> PaymentStatus { self.status }
    pub fn gateway_order_id(&self) -> Option<&str> { self.gateway_order_id.as_deref() }
    pub fn gateway_payment_id(&self) -> Option<&str> { self.gateway_payment_id.as_deref() }
    pub fn failure_reason(&self) -> Option<&str> { self.failure_reason.as_deref() }

    pub fn attach_gateway_order(&mut self, gateway_order_id: impl Into<String>) {
        self.gateway_order_id = Some(gateway_order_id.into());
        self.touch();
    }

    /// A capture reported after a failure supersedes it.
    pub fn mark_successful(&mut self, gateway_payment_id: Option<String>) -> Result<Transition, PaymentError> {
        match self.status {
            PaymentStatus::Pending | PaymentStatus::Failed => {
                self.status = PaymentStatus::Successful;
                if gateway_payment_id.is_some() { self.gateway_payment_id = gateway_payment_id; }
                self.touch();
                self.raise_event(DomainEvent::Payment(PaymentEvent::Succeeded { payment_id: self.id, order_id: self.order_id, amount: self.amount.clone() }));
                Ok(Transition::Applied)
            }
            PaymentStatus::Successful | PaymentStatus::RefundPending | PaymentStatus::Refunded
                if gateway_payment_id.is_none() || gateway_payment_id == self.gateway_payment_id => Ok(Transition::AlreadyApplied),
            from => Err(PaymentError::InvalidTransition { from, to: PaymentStatus::Successful }),
        }
    }

    /// A failure reported after the payment already succeeded (or was
    /// refunded since) is ignored.
    pub fn mark_failed(&mut self, reason: impl Into<String>) -> Result<Transition, PaymentError> {
        match self.status {
            PaymentStatus::Pending => {
                let reason = reason.into();
                self.status = PaymentStatus::Failed;
                self.failure_reason = Some(reason.clone());
                self.touch();
                self.raise_event(DomainEvent::Payment(PaymentEvent::Failed { payment_id: self.id, order_id: self.order_id, reason }));
                Ok(Transition::Applied)
            }
            PaymentStatus::Failed | PaymentStatus::Successful | PaymentStatus::RefundPending | PaymentStatus::Refunded => {
                Ok(Transition::AlreadyApplied)
            }
        }
    }

    /// Claims the refund of a captured payment. Only the caller whose commit
    /// of this state wins may move the money back.
    pub fn begin_refund(&mut self) -> Result<Transition, PaymentError> {
        match self.status {
            PaymentStatus::Successful => {
                self.status = PaymentStatus::RefundPending;
                self.touch();
                Ok(Transition::Applied)
            }
            PaymentStatus::RefundPending | PaymentStatus::Refunded => Ok(Transition::AlreadyApplied),
            from => Err(PaymentError::InvalidTransition { from, to: PaymentStatus::RefundPending }),
        }
    }

    pub fn mark_refunded(&mut self) -> Result<Transition, PaymentError> {
        match self.status {
            PaymentStatus::Successful | PaymentStatus::RefundPending => {
                self.status = PaymentStatus::Refunded;
                self.touch();
                self.raise_event(DomainEvent::Payment(PaymentEvent::Refunded { payment_id: self.id, order_id: self.order_id, amount: self.amount.clone() }));
                Ok(Transition::Applied)
            }
            PaymentStatus::Refunded => Ok(Transition::AlreadyApplied),
            from => Err(PaymentError::InvalidTransition { from, to: PaymentStatus::Refunded }),
        }
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaymentError {
    #[error("payment cannot move from {from:?} to {to:?}")]
    InvalidTransition { from: PaymentStatus, to: PaymentStatus },
}
