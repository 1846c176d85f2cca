//! MedixMall Checkout
//!
//! Turns a user's shopping cart into an order and sees its payment through.
//!
//! ## Features
//! - Per-user carts re-priced from the catalog at checkout
//! - Coupons (percentage or fixed, capped, gated by minimum order)
//! - Atomic order placement with stock reservation
//! - Razorpay, cash on delivery and Pathlog Wallet payments
//! - Idempotent payment confirmation and webhook handling
//! - MedixMall mode: medicine-only catalog and order listings

pub mod api;
pub mod checkout;
pub mod config;
pub mod domain;
pub mod gateway;
pub mod notify;
pub mod store;

use thiserror::Error;
use crate::domain::aggregates::{CartError, CouponError, OrderError, PaymentError, ProductError, WalletError};
use crate::domain::value_objects::MoneyError;

pub use crate::checkout::{CheckoutReceipt, CheckoutRequest, CheckoutService, PaymentVerification};
pub use crate::config::AppConfig;
pub use crate::store::{MemoryStore, PgStore, Store};

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum CheckoutError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("cart is empty")]
    EmptyCart,

    #[error("product is not available: {0}")]
    ProductUnavailable(String),

    #[error("invalid payment signature")]
    InvalidSignature,

    #[error("{0}")]
    Validation(String),

    #[error("conflicting update: {0}")]
    Conflict(String),

    #[error(transparent)]
    Cart(#[from] CartError),

    #[error(transparent)]
    Product(#[from] ProductError),

    #[error(transparent)]
    Coupon(#[from] CouponError),

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error(transparent)]
    Wallet(#[from] WalletError),

    #[error(transparent)]
    Money(#[from] MoneyError),

    #[error(transparent)]
    Gateway(#[from] gateway::GatewayError),

    #[error("storage error: {0}")]
    Storage(#[from] store::StoreError),
}

pub type Result<T> = std::result::Result<T, CheckoutError>;
