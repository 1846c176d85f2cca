//! In-process store. One mutex guards everything, so each commit is atomic
//! and isolated the way a database transaction would be.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use uuid::Uuid;
use crate::domain::aggregates::{Cart, Coupon, Order, Payment, Product, Wallet};
use crate::domain::aggregates::coupon::normalize_code;
use crate::domain::value_objects::Money;
use crate::{CheckoutError, Result};
use super::{release_lines, reserve_lines, status_matches, OrderPlacement, OrderUpdate, Placement, Store};

#[derive(Default)]
struct State {
    products: HashMap<Uuid, Product>,
    carts: HashMap<Uuid, Cart>,
    coupons: HashMap<String, Coupon>,
    wallets: HashMap<Uuid, Wallet>,
    orders: HashMap<Uuid, Order>,
    payments: HashMap<Uuid, Payment>,
    webhooks: HashSet<String>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }
}

impl State {
    fn payment_for_order(&self, order_id: Uuid) -> Option<&Payment> {
        self.payments.values().find(|p| p.order_id() == order_id)
    }

    fn involved_products(&self, order: &Order) -> HashMap<Uuid, Product> {
        order.lines().iter()
            .filter_map(|l| self.products.get(&l.product_id).map(|p| (p.id(), p.clone())))
            .collect()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn product(&self, id: Uuid) -> Result<Option<Product>> {
        Ok(self.state.lock().await.products.get(&id).cloned())
    }

    async fn products(&self) -> Result<Vec<Product>> {
        let state = self.state.lock().await;
        let mut products: Vec<Product> = state.products.values().cloned().collect();
        products.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(products)
    }

    async fn save_product(&self, product: &Product) -> Result<()> {
        self.state.lock().await.products.insert(product.id(), product.clone());
        Ok(())
    }

    async fn cart(&self, user_id: Uuid) -> Result<Option<Cart>> {
        Ok(self.state.lock().await.carts.get(&user_id).cloned())
    }

    async fn save_cart(&self, cart: &Cart) -> Result<()> {
        self.state.lock().await.carts.insert(cart.user_id(), cart.clone());
        Ok(())
    }

    async fn coupon(&self, code: &str) -> Result<Option<Coupon>> {
        Ok(self.state.lock().await.coupons.get(&normalize_code(code)).cloned())
    }

    async fn save_coupon(&self, coupon: &Coupon) -> Result<()> {
        self.state.lock().await.coupons.insert(coupon.code().to_string(), coupon.clone());
        Ok(())
    }

    async fn wallet(&self, user_id: Uuid) -> Result<Option<Wallet>> {
        Ok(self.state.lock().await.wallets.get(&user_id).cloned())
    }

    async fn credit_wallet(&self, user_id: Uuid, amount: &Money, reference: &str) -> Result<Wallet> {
        let mut state = self.state.lock().await;
        let mut wallet = state.wallets.get(&user_id).cloned().unwrap_or_else(|| Wallet::open(user_id, amount.currency()));
        wallet.credit(amount, reference)?;
        state.wallets.insert(user_id, wallet.clone());
        Ok(wallet)
    }

    async fn order(&self, id: Uuid) -> Result<Option<Order>> {
        Ok(self.state.lock().await.orders.get(&id).cloned())
    }

    async fn orders_for_user(&self, user_id: Uuid) -> Result<Vec<Order>> {
        let state = self.state.lock().await;
        let mut orders: Vec<Order> = state.orders.values().filter(|o| o.user_id() == user_id).cloned().collect();
        orders.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        Ok(orders)
    }

    async fn order_by_checkout_key(&self, user_id: Uuid, checkout_key: &str) -> Result<Option<Order>> {
        let state = self.state.lock().await;
        Ok(state.orders.values().find(|o| o.user_id() == user_id && o.checkout_key() == checkout_key).cloned())
    }

    async fn payment_for_order(&self, order_id: Uuid) -> Result<Option<Payment>> {
        Ok(self.state.lock().await.payment_for_order(order_id).cloned())
    }

    async fn payment_by_gateway_order(&self, gateway_order_id: &str) -> Result<Option<Payment>> {
        let state = self.state.lock().await;
        Ok(state.payments.values().find(|p| p.gateway_order_id() == Some(gateway_order_id)).cloned())
    }

    async fn place_order(&self, placement: OrderPlacement) -> Result<Placement> {
        let mut state = self.state.lock().await;
        let OrderPlacement { order, payment, wallet_debit, clear_cart } = placement;

        let existing = state.orders.values()
            .find(|o| o.user_id() == order.user_id() && o.checkout_key() == order.checkout_key())
            .cloned();
        if let Some(existing) = existing {
            let payment = state.payment_for_order(existing.id()).cloned().ok_or(CheckoutError::NotFound("payment"))?;
            return Ok(Placement::Existing { order: existing, payment });
        }

        let mut products = state.involved_products(&order);
        reserve_lines(&mut products, order.lines())?;

        let coupon = match order.coupon_code() {
            Some(code) => {
                let mut coupon = state.coupons.get(code).cloned().ok_or(CheckoutError::NotFound("coupon"))?;
                coupon.redeem(order.user_id())?;
                Some(coupon)
            }
            None => None,
        };

        let wallet = match &wallet_debit {
            Some(amount) => {
                let mut wallet = state.wallets.get(&order.user_id()).cloned().unwrap_or_else(|| Wallet::open(order.user_id(), amount.currency()));
                wallet.debit(amount, order.order_number())?;
                Some(wallet)
            }
            None => None,
        };

        state.products.extend(products);
        if let Some(coupon) = coupon { state.coupons.insert(coupon.code().to_string(), coupon); }
        if let Some(wallet) = wallet { state.wallets.insert(wallet.user_id(), wallet); }
        if clear_cart {
            if let Some(cart) = state.carts.get_mut(&order.user_id()) { cart.clear(); }
        }
        state.payments.insert(payment.id(), payment);
        state.orders.insert(order.id(), order);
        Ok(Placement::Created)
    }

    async fn apply_update(&self, update: OrderUpdate) -> Result<bool> {
        let mut state = self.state.lock().await;
        let stored = state.orders.get(&update.order.id()).ok_or(CheckoutError::NotFound("order"))?;
        let stored_payment = update.payment.as_ref().and_then(|p| state.payments.get(&p.id()));
        if !status_matches(stored, stored_payment, &update) {
            return Ok(false);
        }

        let order = &update.order;
        let mut products = HashMap::new();
        if update.release_stock {
            products = state.involved_products(order);
            release_lines(&mut products, order.lines())?;
        }
        let mut coupon = None;
        if update.restore_coupon {
            if let Some(mut c) = order.coupon_code().and_then(|code| state.coupons.get(code).cloned()) {
                c.restore(order.user_id());
                coupon = Some(c);
            }
        }
        let mut wallet = None;
        if let Some(amount) = &update.wallet_credit {
            let mut w = state.wallets.get(&order.user_id()).cloned().unwrap_or_else(|| Wallet::open(order.user_id(), amount.currency()));
            w.credit(amount, order.order_number())?;
            wallet = Some(w);
        }

        state.products.extend(products);
        if let Some(c) = coupon { state.coupons.insert(c.code().to_string(), c); }
        if let Some(w) = wallet { state.wallets.insert(w.user_id(), w); }
        if update.clear_cart {
            if let Some(cart) = state.carts.get_mut(&order.user_id()) { cart.clear(); }
        }
        if let Some(payment) = update.payment { state.payments.insert(payment.id(), payment); }
        state.orders.insert(update.order.id(), update.order);
        Ok(true)
    }

    async fn webhook_seen(&self, event_id: &str) -> Result<bool> {
        Ok(self.state.lock().await.webhooks.contains(event_id))
    }

    async fn record_webhook(&self, event_id: &str) -> Result<bool> {
        Ok(self.state.lock().await.webhooks.insert(event_id.to_string()))
    }
}
