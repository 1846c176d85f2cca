//! Pathlog Wallet Aggregate

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use crate::domain::value_objects::{Money, MoneyError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletTransactionKind { Credit, Debit }

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WalletTransaction { pub id: Uuid, pub kind: WalletTransactionKind, pub amount: Money, pub reference: String, pub created_at: DateTime<Utc> }

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Wallet {
    user_id: Uuid,
    balance: Money,
    transactions: Vec<WalletTransaction>,
    updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn open(user_id: Uuid, currency: &str) -> Self {
        Self { user_id, balance: Money::zero(currency), transactions: vec![], updated_at: Utc::now() }
    }

    pub fn user_id(&self) -> Uuid { self.user_id }
    pub fn balance(&self) -> &Money { &self.balance }
    pub fn transactions(&self) -> &[WalletTransaction] { &self.transactions }

    pub fn credit(&mut self, amount: &Money, reference: impl Into<String>) -> Result<(), WalletError> {
        if !amount.is_positive() { return Err(WalletError::InvalidAmount); }
        self.balance = self.balance.add(amount)?;
        self.record(WalletTransactionKind::Credit, amount, reference.into());
        Ok(())
    }

    pub fn debit(&mut self, amount: &Money, reference: impl Into<String>) -> Result<(), WalletError> {
        if !amount.is_positive() { return Err(WalletError::InvalidAmount); }
        let remaining = self.balance.sub(amount)?;
        if remaining.amount() < Decimal::ZERO {
            return Err(WalletError::InsufficientBalance { balance: self.balance.clone(), requested: amount.clone() });
        }
        self.balance = remaining;
        self.record(WalletTransactionKind::Debit, amount, reference.into());
        Ok(())
    }

    fn record(&mut self, kind: WalletTransactionKind, amount: &Money, reference: String) {
        let now = Utc::now();
        self.transactions.push(WalletTransaction { id: Uuid::now_v7(), kind, amount: amount.clone(), reference, created_at: now });
        self.updated_at = now;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WalletError {
    #[error("wallet amount must be positive")]
    InvalidAmount,
    #[error("insufficient wallet balance: {balance} available, {requested} requested")]
    InsufficientBalance { balance: Money, requested: Money },
    #[error(transparent)]
    Money(#[from] MoneyError),
}
