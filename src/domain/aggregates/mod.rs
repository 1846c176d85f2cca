//! Aggregates module
pub mod product;
pub mod order;
pub mod cart;
pub mod coupon;
pub mod payment;
pub mod wallet;

pub use product::{Product, ProductError, ProductStatus, ProductType, Variant};
pub use order::{Order, OrderError, OrderStatus, OrderPaymentStatus, LineItem, Address, NewOrder};
pub use cart::{Cart, CartError, CartItem};
pub use coupon::{Coupon, CouponError, DiscountType};
pub use payment::{Payment, PaymentError, PaymentMethod, PaymentStatus, Transition};
pub use wallet::{Wallet, WalletError, WalletTransaction, WalletTransactionKind};
