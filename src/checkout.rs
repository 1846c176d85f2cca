//! Checkout pipeline: cart, coupon preview, order placement and payment
//! settlement for all three payment methods.
//!
//! Every state change is computed on the aggregates first and then handed to
//! the store as one commit. Events are taken off the aggregates before the
//! commit and published only once it succeeded.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;
use crate::domain::aggregates::coupon::normalize_code;
use crate::domain::aggregates::{
    Address, Cart, CartItem, Coupon, CouponError, LineItem, NewOrder, Order, OrderError, OrderStatus, Payment, PaymentMethod,
    PaymentStatus, Product, ProductError, ProductType, Transition, Wallet,
};
use crate::domain::events::DomainEvent;
use crate::domain::pricing::{PricingPolicy, Totals};
use crate::domain::value_objects::{Money, Sku};
use crate::gateway::{GatewayOrder, PaymentGateway, WebhookEvent, WebhookOutcome};
use crate::notify::{publish_all, EventPublisher};
use crate::store::{OrderPlacement, OrderUpdate, Placement, Store};
use crate::{CheckoutError, Result};

/// Compare-and-set retries before a settlement gives up with `Conflict`.
const SETTLE_ATTEMPTS: usize = 3;

#[derive(Clone, Debug, Deserialize)]
pub struct CheckoutRequest {
    pub payment_method: PaymentMethod,
    pub coupon_code: Option<String>,
    pub shipping_address: Address,
    /// Client-chosen idempotency key; replaying it returns the first order.
    pub checkout_key: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct CheckoutReceipt {
    pub order: Order,
    pub payment: Payment,
    pub gateway_order: Option<GatewayOrder>,
    pub gateway_key_id: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PaymentVerification {
    pub gateway_order_id: String,
    pub gateway_payment_id: String,
    pub signature: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct CouponPreview {
    pub code: String,
    pub discount: Money,
    pub totals: Totals,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookAck { Processed, Duplicate, Ignored }

/// New catalog entry, as submitted by an admin.
#[derive(Clone, Debug)]
pub struct ProductDraft {
    pub sku: String,
    pub name: String,
    pub description: String,
    pub product_type: ProductType,
    pub price: Decimal,
    pub stock: u32,
    pub variants: Vec<VariantDraft>,
    pub publish: bool,
}

#[derive(Clone, Debug)]
pub struct VariantDraft { pub sku: String, pub name: String, pub price: Decimal, pub stock: u32 }

pub struct CheckoutService {
    store: Arc<dyn Store>,
    gateway: Arc<dyn PaymentGateway>,
    publisher: Arc<dyn EventPublisher>,
    pricing: PricingPolicy,
}

impl CheckoutService {
    pub fn new(store: Arc<dyn Store>, gateway: Arc<dyn PaymentGateway>, publisher: Arc<dyn EventPublisher>, pricing: PricingPolicy) -> Self {
        Self { store, gateway, publisher, pricing }
    }

    // -------------------------------------------------------------------------
    // Catalog
    // -------------------------------------------------------------------------

    /// Active products; MedixMall mode keeps medicines only.
    pub async fn list_products(&self, medixmall: bool) -> Result<Vec<Product>> {
        let products = self.store.products().await?;
        Ok(products.into_iter().filter(|p| p.is_active() && (!medixmall || p.is_medicine())).collect())
    }

    pub async fn create_product(&self, draft: ProductDraft) -> Result<Product> {
        let sku = Sku::new(draft.sku).map_err(|e| CheckoutError::Validation(e.to_string()))?;
        let mut product = Product::create(sku, draft.name, draft.product_type, self.money(draft.price))
            .with_description(draft.description);
        if draft.stock > 0 { product.add_inventory(None, draft.stock)?; }
        for variant in draft.variants {
            let sku = Sku::new(variant.sku).map_err(|e| CheckoutError::Validation(e.to_string()))?;
            let id = product.add_variant(sku, variant.name, self.money(variant.price));
            if variant.stock > 0 { product.add_inventory(Some(id), variant.stock)?; }
        }
        if draft.publish { product.publish()?; }
        let events = product.take_events();
        self.store.save_product(&product).await?;
        tracing::info!(product_id = %product.id(), sku = %product.sku(), "product created");
        publish_all(self.publisher.as_ref(), events).await;
        Ok(product)
    }

    pub async fn restock_product(&self, product_id: Uuid, variant_id: Option<Uuid>, quantity: u32) -> Result<Product> {
        let mut product = self.store.product(product_id).await?.ok_or(CheckoutError::NotFound("product"))?;
        product.add_inventory(variant_id, quantity)?;
        let events = product.take_events();
        self.store.save_product(&product).await?;
        publish_all(self.publisher.as_ref(), events).await;
        Ok(product)
    }

    pub async fn upsert_coupon(&self, mut coupon: Coupon) -> Result<Coupon> {
        if let Some(previous) = self.store.coupon(coupon.code()).await? {
            coupon.carry_usage_from(&previous);
        }
        self.store.save_coupon(&coupon).await?;
        tracing::info!(code = coupon.code(), "coupon saved");
        Ok(coupon)
    }

    // -------------------------------------------------------------------------
    // Cart
    // -------------------------------------------------------------------------

    pub async fn cart(&self, user_id: Uuid) -> Result<Cart> {
        Ok(self.store.cart(user_id).await?.unwrap_or_else(|| Cart::for_user(user_id, &self.pricing.currency)))
    }

    pub async fn add_to_cart(&self, user_id: Uuid, product_id: Uuid, variant_id: Option<Uuid>, quantity: u32) -> Result<Cart> {
        let product = self.active_product(product_id).await?;
        let mut cart = self.cart(user_id).await?;
        let wanted = cart.quantity_of(product_id, variant_id).saturating_add(quantity);
        ensure_stock(&product, variant_id, wanted)?;
        cart.add_item(CartItem {
            product_id,
            variant_id,
            name: product.line_name(variant_id)?,
            sku: product.line_sku(variant_id)?.clone(),
            quantity,
            unit_price: product.unit_price(variant_id)?.clone(),
        })?;
        self.store.save_cart(&cart).await?;
        tracing::debug!(%user_id, %product_id, quantity, "cart item added");
        Ok(cart)
    }

    /// Sets the quantity of a line; zero removes it.
    pub async fn update_cart_item(&self, user_id: Uuid, product_id: Uuid, variant_id: Option<Uuid>, quantity: u32) -> Result<Cart> {
        let mut cart = self.cart(user_id).await?;
        if quantity > 0 {
            let product = self.active_product(product_id).await?;
            ensure_stock(&product, variant_id, quantity)?;
        }
        cart.update_quantity(product_id, variant_id, quantity)?;
        self.store.save_cart(&cart).await?;
        Ok(cart)
    }

    pub async fn remove_from_cart(&self, user_id: Uuid, product_id: Uuid, variant_id: Option<Uuid>) -> Result<Cart> {
        let mut cart = self.cart(user_id).await?;
        cart.remove_item(product_id, variant_id)?;
        self.store.save_cart(&cart).await?;
        Ok(cart)
    }

    pub async fn clear_cart(&self, user_id: Uuid) -> Result<Cart> {
        let mut cart = self.cart(user_id).await?;
        cart.clear();
        self.store.save_cart(&cart).await?;
        Ok(cart)
    }

    // -------------------------------------------------------------------------
    // Coupons and checkout
    // -------------------------------------------------------------------------

    pub async fn validate_coupon(&self, user_id: Uuid, code: &str) -> Result<CouponPreview> {
        let cart = self.cart(user_id).await?;
        if cart.is_empty() { return Err(CheckoutError::EmptyCart); }
        let lines = self.price_lines(&cart).await?;
        let subtotal = self.subtotal(&lines)?;
        let (code, discount) = self.coupon_discount(user_id, code, subtotal.amount()).await?;
        Ok(CouponPreview { code, discount: self.money(discount), totals: self.pricing.quote(subtotal.amount(), discount) })
    }

    pub async fn checkout(&self, user_id: Uuid, request: CheckoutRequest) -> Result<CheckoutReceipt> {
        let checkout_key = match request.checkout_key.as_deref().map(str::trim) {
            Some("") => return Err(CheckoutError::Validation("checkout key must not be blank".into())),
            Some(key) => key.to_string(),
            None => Uuid::new_v4().to_string(),
        };
        if let Some(order) = self.store.order_by_checkout_key(user_id, &checkout_key).await? {
            tracing::info!(order_id = %order.id(), %user_id, "checkout replayed");
            return self.receipt(order).await;
        }

        let cart = self.cart(user_id).await?;
        if cart.is_empty() { return Err(CheckoutError::EmptyCart); }
        let lines = self.price_lines(&cart).await?;
        let subtotal = self.subtotal(&lines)?;
        let (coupon_code, discount) = match request.coupon_code.as_deref().filter(|c| !c.trim().is_empty()) {
            Some(code) => {
                let (code, discount) = self.coupon_discount(user_id, code, subtotal.amount()).await?;
                (Some(code), discount)
            }
            None => (None, Decimal::ZERO),
        };
        let totals = self.pricing.quote(subtotal.amount(), discount);
        if request.payment_method == PaymentMethod::Razorpay && !totals.total.is_positive() {
            return Err(CheckoutError::Validation("nothing to pay online for this order".into()));
        }

        let method = request.payment_method;
        let mut order = Order::place(NewOrder {
            user_id, checkout_key, payment_method: method, lines, totals, coupon_code, shipping_address: request.shipping_address,
        })?;
        let mut payment = Payment::for_order(order.id(), user_id, method, order.total().clone());
        if method == PaymentMethod::Wallet {
            payment.mark_successful(None)?;
        }
        let mut events = order.take_events();
        events.extend(payment.take_events());

        let placement = OrderPlacement {
            order: order.clone(),
            payment: payment.clone(),
            wallet_debit: (method == PaymentMethod::Wallet && order.total().is_positive()).then(|| order.total().clone()),
            clear_cart: method != PaymentMethod::Razorpay,
        };
        if let Placement::Existing { order, payment } = self.store.place_order(placement).await? {
            return Ok(self.receipt_for(order, payment));
        }
        tracing::info!(order_id = %order.id(), order_number = order.order_number(), %user_id, ?method, total = %order.total(), "order placed");

        if method == PaymentMethod::Razorpay {
            match self.gateway.create_order(order.total(), order.order_number()).await {
                Ok(created) => {
                    payment.attach_gateway_order(created.id.clone());
                    let update = OrderUpdate::new(order.clone(), order.status()).with_payment(payment.clone(), PaymentStatus::Pending);
                    if !self.store.apply_update(update).await? {
                        return Err(CheckoutError::Conflict("order changed while creating the gateway order".into()));
                    }
                    tracing::info!(order_id = %order.id(), gateway_order_id = %created.id, "gateway order created");
                }
                Err(error) => {
                    tracing::error!(order_id = %order.id(), %error, "gateway order creation failed, releasing order");
                    self.abandon(order, payment).await?;
                    return Err(error.into());
                }
            }
        }

        publish_all(self.publisher.as_ref(), events).await;
        Ok(self.receipt_for(order, payment))
    }

    /// Client-side confirmation after Razorpay Checkout completes.
    pub async fn verify_payment(&self, user_id: Uuid, verification: PaymentVerification) -> Result<Order> {
        let PaymentVerification { gateway_order_id, gateway_payment_id, signature } = verification;
        if !self.gateway.verify_payment_signature(&gateway_order_id, &gateway_payment_id, &signature) {
            tracing::warn!(%user_id, %gateway_order_id, "payment signature rejected");
            return Err(CheckoutError::InvalidSignature);
        }
        let payment = self.store.payment_by_gateway_order(&gateway_order_id).await?
            .filter(|p| p.user_id() == user_id)
            .ok_or(CheckoutError::NotFound("payment"))?;
        self.settle_success(payment.id(), payment.order_id(), gateway_payment_id).await
    }

    pub async fn handle_webhook(&self, body: &[u8], signature: &str, event_id: Option<&str>) -> Result<WebhookAck> {
        if !self.gateway.verify_webhook_signature(body, signature) {
            tracing::warn!("webhook signature rejected");
            return Err(CheckoutError::InvalidSignature);
        }
        let event: WebhookEvent = serde_json::from_slice(body).map_err(|e| CheckoutError::Validation(format!("malformed webhook: {e}")))?;
        let event_id = event_id.map(str::to_string).unwrap_or_else(|| event.fallback_id());
        if self.store.webhook_seen(&event_id).await? {
            tracing::info!(%event_id, "duplicate webhook");
            return Ok(WebhookAck::Duplicate);
        }

        let (gateway_order_id, settle) = match event.outcome() {
            WebhookOutcome::Ignored => return Ok(WebhookAck::Ignored),
            WebhookOutcome::Captured { gateway_order_id, gateway_payment_id } => (gateway_order_id, Ok(gateway_payment_id)),
            WebhookOutcome::Failed { gateway_order_id, reason, .. } => (gateway_order_id, Err(reason)),
        };
        let Some(payment) = self.store.payment_by_gateway_order(&gateway_order_id).await? else {
            tracing::warn!(%event_id, %gateway_order_id, "webhook for unknown gateway order");
            return Ok(WebhookAck::Ignored);
        };
        match settle {
            Ok(gateway_payment_id) => { self.settle_success(payment.id(), payment.order_id(), gateway_payment_id).await?; }
            Err(reason) => { self.settle_failure(payment.id(), payment.order_id(), reason).await?; }
        }
        self.store.record_webhook(&event_id).await?;
        tracing::info!(%event_id, event = %event.event, "webhook processed");
        Ok(WebhookAck::Processed)
    }

    /// Manual confirmation that cash was collected for a COD order.
    pub async fn confirm_cod_payment(&self, order_id: Uuid) -> Result<Order> {
        for _ in 0..SETTLE_ATTEMPTS {
            let (mut order, mut payment) = self.order_with_payment(order_id).await?;
            if payment.method() != PaymentMethod::Cod {
                return Err(CheckoutError::Validation("order is not cash on delivery".into()));
            }
            let (expected_order, expected_payment) = (order.status(), payment.status());
            if payment.mark_successful(None)? == Transition::AlreadyApplied { return Ok(order); }
            order.mark_paid()?;
            let events = take_events(&mut order, &mut payment);
            let update = OrderUpdate::new(order.clone(), expected_order).with_payment(payment, expected_payment);
            if self.store.apply_update(update).await? {
                tracing::info!(%order_id, "cash on delivery collected");
                publish_all(self.publisher.as_ref(), events).await;
                return Ok(order);
            }
        }
        Err(CheckoutError::Conflict("order kept changing during COD confirmation".into()))
    }

    // -------------------------------------------------------------------------
    // Orders
    // -------------------------------------------------------------------------

    pub async fn list_orders(&self, user_id: Uuid, medixmall: bool) -> Result<Vec<Order>> {
        let orders = self.store.orders_for_user(user_id).await?;
        Ok(orders.into_iter().filter(|o| !medixmall || o.is_medicine_only()).collect())
    }

    pub async fn order(&self, user_id: Uuid, order_id: Uuid) -> Result<Order> {
        self.store.order(order_id).await?.filter(|o| o.user_id() == user_id).ok_or(CheckoutError::NotFound("order"))
    }

    pub async fn cancel_order(&self, user_id: Uuid, order_id: Uuid) -> Result<Order> {
        let (mut order, mut payment) = self.order_with_payment(order_id).await?;
        if order.user_id() != user_id { return Err(CheckoutError::NotFound("order")); }
        let (expected_order, expected_payment) = (order.status(), payment.status());
        order.cancel()?;

        let mut wallet_credit = None;
        let mut gateway_refund = false;
        match (payment.method(), payment.status()) {
            (PaymentMethod::Razorpay, PaymentStatus::Successful) => {
                payment.begin_refund()?;
                gateway_refund = true;
            }
            (method, PaymentStatus::Successful) => {
                payment.mark_refunded()?;
                if method == PaymentMethod::Wallet && payment.amount().is_positive() {
                    wallet_credit = Some(payment.amount().clone());
                }
            }
            (_, PaymentStatus::Pending) => { payment.mark_failed("order cancelled")?; }
            _ => {}
        }

        let events = take_events(&mut order, &mut payment);
        let mut update = OrderUpdate::new(order.clone(), expected_order).with_payment(payment.clone(), expected_payment).releasing();
        if let Some(amount) = wallet_credit { update = update.crediting_wallet(amount); }
        if !self.store.apply_update(update).await? {
            return Err(CheckoutError::Conflict("order changed while cancelling".into()));
        }
        tracing::info!(%order_id, %user_id, "order cancelled");
        publish_all(self.publisher.as_ref(), events).await;
        if gateway_refund {
            self.complete_refund(&order, payment).await?;
        }
        Ok(order)
    }

    pub async fn process_order(&self, order_id: Uuid) -> Result<Order> {
        self.fulfill(order_id, Order::process).await
    }

    pub async fn ship_order(&self, order_id: Uuid, tracking: &str) -> Result<Order> {
        self.fulfill(order_id, |order| order.ship(tracking)).await
    }

    pub async fn deliver_order(&self, order_id: Uuid) -> Result<Order> {
        self.fulfill(order_id, Order::deliver).await
    }

    // -------------------------------------------------------------------------
    // Wallet
    // -------------------------------------------------------------------------

    pub async fn wallet(&self, user_id: Uuid) -> Result<Wallet> {
        Ok(self.store.wallet(user_id).await?.unwrap_or_else(|| Wallet::open(user_id, &self.pricing.currency)))
    }

    pub async fn credit_wallet(&self, user_id: Uuid, amount: Decimal, reference: &str) -> Result<Wallet> {
        let wallet = self.store.credit_wallet(user_id, &self.money(amount), reference).await?;
        tracing::info!(%user_id, %amount, reference, "wallet credited");
        Ok(wallet)
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    async fn settle_success(&self, payment_id: Uuid, order_id: Uuid, gateway_payment_id: String) -> Result<Order> {
        for _ in 0..SETTLE_ATTEMPTS {
            let (mut order, mut payment) = self.order_with_payment(order_id).await?;
            debug_assert_eq!(payment.id(), payment_id);
            let (expected_order, expected_payment) = (order.status(), payment.status());
            if payment.mark_successful(Some(gateway_payment_id.clone()))? == Transition::AlreadyApplied {
                return Ok(order);
            }

            let refunding = order.status() == OrderStatus::Cancelled;
            if refunding {
                payment.begin_refund()?;
            } else {
                order.mark_paid()?;
            }
            let events = take_events(&mut order, &mut payment);
            let mut update = OrderUpdate::new(order.clone(), expected_order).with_payment(payment.clone(), expected_payment);
            if !refunding { update = update.clearing_cart(); }
            if self.store.apply_update(update).await? {
                publish_all(self.publisher.as_ref(), events).await;
                if refunding {
                    tracing::warn!(%order_id, %gateway_payment_id, "payment captured for cancelled order, refunding");
                    self.complete_refund(&order, payment).await?;
                } else {
                    tracing::info!(%order_id, %payment_id, %gateway_payment_id, "payment settled");
                }
                return Ok(order);
            }
            tracing::debug!(%order_id, "settlement lost a race, retrying");
        }
        Err(CheckoutError::Conflict("payment kept changing during settlement".into()))
    }

    async fn settle_failure(&self, payment_id: Uuid, order_id: Uuid, reason: String) -> Result<Order> {
        for _ in 0..SETTLE_ATTEMPTS {
            let (mut order, mut payment) = self.order_with_payment(order_id).await?;
            debug_assert_eq!(payment.id(), payment_id);
            let (expected_order, expected_payment) = (order.status(), payment.status());
            if payment.mark_failed(reason.clone())? == Transition::AlreadyApplied {
                return Ok(order);
            }
            let releases = order.status() == OrderStatus::Pending;
            if releases { order.mark_payment_failed()?; }
            let events = take_events(&mut order, &mut payment);
            let mut update = OrderUpdate::new(order.clone(), expected_order).with_payment(payment, expected_payment);
            if releases { update = update.releasing(); }
            if self.store.apply_update(update).await? {
                tracing::info!(%order_id, %payment_id, %reason, "payment failed");
                publish_all(self.publisher.as_ref(), events).await;
                return Ok(order);
            }
        }
        Err(CheckoutError::Conflict("payment kept changing during settlement".into()))
    }

    /// Sends a claimed refund through the gateway and records it. A gateway
    /// error leaves the payment in `RefundPending` for reconciliation.
    async fn complete_refund(&self, order: &Order, mut payment: Payment) -> Result<()> {
        let order_id = order.id();
        let gateway_payment_id = payment.gateway_payment_id().ok_or(CheckoutError::NotFound("gateway payment"))?.to_string();
        let refund_id = match self.gateway.refund(&gateway_payment_id, payment.amount()).await {
            Ok(refund_id) => refund_id,
            Err(error) => {
                tracing::error!(%order_id, %gateway_payment_id, %error, "gateway refund failed, payment left refund pending");
                return Err(error.into());
            }
        };
        payment.mark_refunded()?;
        let events = payment.take_events();
        let update = OrderUpdate::new(order.clone(), order.status()).with_payment(payment, PaymentStatus::RefundPending);
        if !self.store.apply_update(update).await? {
            tracing::error!(%order_id, %refund_id, "refund issued but payment changed before it was recorded");
            return Err(CheckoutError::Conflict("payment changed while recording its refund".into()));
        }
        tracing::info!(%order_id, %refund_id, "gateway refund issued");
        publish_all(self.publisher.as_ref(), events).await;
        Ok(())
    }

    /// Undoes a placement whose gateway order could not be created.
    async fn abandon(&self, mut order: Order, mut payment: Payment) -> Result<()> {
        let expected = order.status();
        payment.mark_failed("gateway order could not be created")?;
        order.mark_payment_failed()?;
        let events = take_events(&mut order, &mut payment);
        let order_id = order.id();
        let update = OrderUpdate::new(order, expected).with_payment(payment, PaymentStatus::Pending).releasing();
        if !self.store.apply_update(update).await? {
            tracing::error!(%order_id, "abandoned order changed concurrently, stock may need manual release");
            return Ok(());
        }
        publish_all(self.publisher.as_ref(), events).await;
        Ok(())
    }

    async fn fulfill(&self, order_id: Uuid, transition: impl Fn(&mut Order) -> std::result::Result<(), OrderError>) -> Result<Order> {
        let mut order = self.store.order(order_id).await?.ok_or(CheckoutError::NotFound("order"))?;
        let expected = order.status();
        transition(&mut order)?;
        let events = order.take_events();
        if !self.store.apply_update(OrderUpdate::new(order.clone(), expected)).await? {
            return Err(CheckoutError::Conflict("order changed concurrently".into()));
        }
        tracing::info!(%order_id, status = ?order.status(), "order fulfillment updated");
        publish_all(self.publisher.as_ref(), events).await;
        Ok(order)
    }

    async fn order_with_payment(&self, order_id: Uuid) -> Result<(Order, Payment)> {
        let order = self.store.order(order_id).await?.ok_or(CheckoutError::NotFound("order"))?;
        let payment = self.store.payment_for_order(order_id).await?.ok_or(CheckoutError::NotFound("payment"))?;
        Ok((order, payment))
    }

    async fn active_product(&self, product_id: Uuid) -> Result<Product> {
        let product = self.store.product(product_id).await?.ok_or(CheckoutError::NotFound("product"))?;
        if !product.is_active() { return Err(CheckoutError::ProductUnavailable(product.name().to_string())); }
        Ok(product)
    }

    /// Snapshots every cart line at the current catalog price.
    async fn price_lines(&self, cart: &Cart) -> Result<Vec<LineItem>> {
        let mut lines = Vec::with_capacity(cart.item_count());
        for item in cart.items() {
            let product = match self.store.product(item.product_id).await? {
                Some(p) if p.is_active() => p,
                _ => return Err(CheckoutError::ProductUnavailable(item.name.clone())),
            };
            let unit_price = product.unit_price(item.variant_id)?.clone();
            lines.push(LineItem {
                product_id: item.product_id,
                variant_id: item.variant_id,
                name: product.line_name(item.variant_id)?,
                sku: product.line_sku(item.variant_id)?.clone(),
                product_type: product.product_type(),
                quantity: item.quantity,
                total: unit_price.multiply(item.quantity),
                unit_price,
            });
        }
        Ok(lines)
    }

    fn subtotal(&self, lines: &[LineItem]) -> Result<Money> {
        lines.iter().try_fold(Money::zero(&self.pricing.currency), |acc, l| acc.add(&l.total).map_err(CheckoutError::from))
    }

    async fn coupon_discount(&self, user_id: Uuid, code: &str, subtotal: Decimal) -> Result<(String, Decimal)> {
        let coupon = self.store.coupon(&normalize_code(code)).await?.ok_or(CouponError::NotFound)?;
        let discount = coupon.evaluate(user_id, subtotal, Utc::now())?;
        Ok((coupon.code().to_string(), discount))
    }

    async fn receipt(&self, order: Order) -> Result<CheckoutReceipt> {
        let payment = self.store.payment_for_order(order.id()).await?.ok_or(CheckoutError::NotFound("payment"))?;
        Ok(self.receipt_for(order, payment))
    }

    fn receipt_for(&self, order: Order, payment: Payment) -> CheckoutReceipt {
        let gateway_order = payment.gateway_order_id().map(|id| GatewayOrder {
            id: id.to_string(), amount_minor: payment.amount().minor_units(), currency: payment.amount().currency().to_string(),
        });
        CheckoutReceipt { order, payment, gateway_order, gateway_key_id: None }.with_gateway_key(self.gateway.key_id())
    }

    fn money(&self, amount: Decimal) -> Money { Money::new(amount, &self.pricing.currency) }
}

impl CheckoutReceipt {
    fn with_gateway_key(mut self, key_id: &str) -> Self {
        if self.payment.method() == PaymentMethod::Razorpay { self.gateway_key_id = Some(key_id.to_string()); }
        self
    }
}

fn ensure_stock(product: &Product, variant_id: Option<Uuid>, wanted: u32) -> Result<()> {
    let available = product.available(variant_id)?;
    if wanted > available {
        return Err(ProductError::InsufficientInventory { product: product.name().to_string(), requested: wanted, available }.into());
    }
    Ok(())
}

fn take_events(order: &mut Order, payment: &mut Payment) -> Vec<DomainEvent> {
    let mut events = order.take_events();
    events.extend(payment.take_events());
    events
}
