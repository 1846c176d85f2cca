//! Postgres store.
//!
//! Aggregates are kept as JSONB documents next to the columns they are looked
//! up by. Commits lock the rows they touch with `SELECT .. FOR UPDATE` and run
//! inside one transaction.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{Postgres, Transaction};
use std::collections::HashMap;
use uuid::Uuid;
use crate::domain::aggregates::{Cart, Coupon, Order, Payment, Product, Wallet};
use crate::domain::aggregates::coupon::normalize_code;
use crate::domain::value_objects::Money;
use crate::{CheckoutError, Result};
use super::{release_lines, reserve_lines, status_matches, OrderPlacement, OrderUpdate, Placement, Store, StoreError};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> std::result::Result<Self, StoreError> {
        let pool = PgPoolOptions::new().max_connections(10).connect(database_url).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self { Self { pool } }

    async fn lock_products(tx: &mut Transaction<'_, Postgres>, order: &Order) -> Result<HashMap<Uuid, Product>> {
        let mut ids: Vec<Uuid> = order.lines().iter().map(|l| l.product_id).collect();
        ids.sort();
        ids.dedup();
        // Sorted ids keep lock order stable across concurrent checkouts.
        let rows = sqlx::query_scalar::<_, Json<Product>>("SELECT doc FROM products WHERE id = ANY($1) ORDER BY id FOR UPDATE")
            .bind(&ids)
            .fetch_all(&mut **tx)
            .await?;
        Ok(rows.into_iter().map(|Json(p)| (p.id(), p)).collect())
    }

    async fn write_products(tx: &mut Transaction<'_, Postgres>, products: &HashMap<Uuid, Product>) -> Result<()> {
        for product in products.values() {
            sqlx::query("UPDATE products SET doc = $2, updated_at = NOW() WHERE id = $1")
                .bind(product.id())
                .bind(Json(product))
                .execute(&mut **tx)
                .await?;
        }
        Ok(())
    }

    async fn lock_coupon(tx: &mut Transaction<'_, Postgres>, code: &str) -> Result<Option<Coupon>> {
        let row = sqlx::query_scalar::<_, Json<Coupon>>("SELECT doc FROM coupons WHERE code = $1 FOR UPDATE")
            .bind(code)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(row.map(|Json(c)| c))
    }

    async fn write_coupon(tx: &mut Transaction<'_, Postgres>, coupon: &Coupon) -> Result<()> {
        sqlx::query("UPDATE coupons SET doc = $2 WHERE code = $1")
            .bind(coupon.code())
            .bind(Json(coupon))
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn lock_wallet(tx: &mut Transaction<'_, Postgres>, user_id: Uuid, currency: &str) -> Result<Wallet> {
        let row = sqlx::query_scalar::<_, Json<Wallet>>("SELECT doc FROM wallets WHERE user_id = $1 FOR UPDATE")
            .bind(user_id)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(row.map(|Json(w)| w).unwrap_or_else(|| Wallet::open(user_id, currency)))
    }

    async fn write_wallet(tx: &mut Transaction<'_, Postgres>, wallet: &Wallet) -> Result<()> {
        sqlx::query("INSERT INTO wallets (user_id, doc) VALUES ($1, $2) ON CONFLICT (user_id) DO UPDATE SET doc = EXCLUDED.doc")
            .bind(wallet.user_id())
            .bind(Json(wallet))
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn clear_cart(tx: &mut Transaction<'_, Postgres>, user_id: Uuid) -> Result<()> {
        let row = sqlx::query_scalar::<_, Json<Cart>>("SELECT doc FROM carts WHERE user_id = $1 FOR UPDATE")
            .bind(user_id)
            .fetch_optional(&mut **tx)
            .await?;
        if let Some(Json(mut cart)) = row {
            cart.clear();
            sqlx::query("UPDATE carts SET doc = $2 WHERE user_id = $1").bind(user_id).bind(Json(&cart)).execute(&mut **tx).await?;
        }
        Ok(())
    }

    async fn existing_checkout(&self, user_id: Uuid, checkout_key: &str) -> Result<Option<(Order, Payment)>> {
        let Some(order) = self.order_by_checkout_key(user_id, checkout_key).await? else { return Ok(None) };
        let payment = self.payment_for_order(order.id()).await?.ok_or(CheckoutError::NotFound("payment"))?;
        Ok(Some((order, payment)))
    }
}

#[async_trait]
impl Store for PgStore {
    async fn product(&self, id: Uuid) -> Result<Option<Product>> {
        let row = sqlx::query_scalar::<_, Json<Product>>("SELECT doc FROM products WHERE id = $1").bind(id).fetch_optional(&self.pool).await?;
        Ok(row.map(|Json(p)| p))
    }

    async fn products(&self) -> Result<Vec<Product>> {
        let rows = sqlx::query_scalar::<_, Json<Product>>("SELECT doc FROM products ORDER BY name").fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|Json(p)| p).collect())
    }

    async fn save_product(&self, product: &Product) -> Result<()> {
        sqlx::query("INSERT INTO products (id, name, doc, updated_at) VALUES ($1, $2, $3, NOW()) ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, doc = EXCLUDED.doc, updated_at = NOW()")
            .bind(product.id()).bind(product.name()).bind(Json(product))
            .execute(&self.pool).await?;
        Ok(())
    }

    async fn cart(&self, user_id: Uuid) -> Result<Option<Cart>> {
        let row = sqlx::query_scalar::<_, Json<Cart>>("SELECT doc FROM carts WHERE user_id = $1").bind(user_id).fetch_optional(&self.pool).await?;
        Ok(row.map(|Json(c)| c))
    }

    async fn save_cart(&self, cart: &Cart) -> Result<()> {
        sqlx::query("INSERT INTO carts (user_id, doc) VALUES ($1, $2) ON CONFLICT (user_id) DO UPDATE SET doc = EXCLUDED.doc")
            .bind(cart.user_id()).bind(Json(cart))
            .execute(&self.pool).await?;
        Ok(())
    }

    async fn coupon(&self, code: &str) -> Result<Option<Coupon>> {
        let row = sqlx::query_scalar::<_, Json<Coupon>>("SELECT doc FROM coupons WHERE code = $1").bind(normalize_code(code)).fetch_optional(&self.pool).await?;
        Ok(row.map(|Json(c)| c))
    }

    async fn save_coupon(&self, coupon: &Coupon) -> Result<()> {
        sqlx::query("INSERT INTO coupons (code, doc) VALUES ($1, $2) ON CONFLICT (code) DO UPDATE SET doc = EXCLUDED.doc")
            .bind(coupon.code()).bind(Json(coupon))
            .execute(&self.pool).await?;
        Ok(())
    }

    async fn wallet(&self, user_id: Uuid) -> Result<Option<Wallet>> {
        let row = sqlx::query_scalar::<_, Json<Wallet>>("SELECT doc FROM wallets WHERE user_id = $1").bind(user_id).fetch_optional(&self.pool).await?;
        Ok(row.map(|Json(w)| w))
    }

    async fn credit_wallet(&self, user_id: Uuid, amount: &Money, reference: &str) -> Result<Wallet> {
        let mut tx = self.pool.begin().await?;
        let mut wallet = Self::lock_wallet(&mut tx, user_id, amount.currency()).await?;
        wallet.credit(amount, reference)?;
        Self::write_wallet(&mut tx, &wallet).await?;
        tx.commit().await?;
        Ok(wallet)
    }

    async fn order(&self, id: Uuid) -> Result<Option<Order>> {
        let row = sqlx::query_scalar::<_, Json<Order>>("SELECT doc FROM orders WHERE id = $1").bind(id).fetch_optional(&self.pool).await?;
        Ok(row.map(|Json(o)| o))
    }

    async fn orders_for_user(&self, user_id: Uuid) -> Result<Vec<Order>> {
        let rows = sqlx::query_scalar::<_, Json<Order>>("SELECT doc FROM orders WHERE user_id = $1 ORDER BY created_at DESC")
            .bind(user_id).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|Json(o)| o).collect())
    }

    async fn order_by_checkout_key(&self, user_id: Uuid, checkout_key: &str) -> Result<Option<Order>> {
        let row = sqlx::query_scalar::<_, Json<Order>>("SELECT doc FROM orders WHERE user_id = $1 AND checkout_key = $2")
            .bind(user_id).bind(checkout_key).fetch_optional(&self.pool).await?;
        Ok(row.map(|Json(o)| o))
    }

    async fn payment_for_order(&self, order_id: Uuid) -> Result<Option<Payment>> {
        let row = sqlx::query_scalar::<_, Json<Payment>>("SELECT doc FROM payments WHERE order_id = $1").bind(order_id).fetch_optional(&self.pool).await?;
        Ok(row.map(|Json(p)| p))
    }

    async fn payment_by_gateway_order(&self, gateway_order_id: &str) -> Result<Option<Payment>> {
        let row = sqlx::query_scalar::<_, Json<Payment>>("SELECT doc FROM payments WHERE gateway_order_id = $1")
            .bind(gateway_order_id).fetch_optional(&self.pool).await?;
        Ok(row.map(|Json(p)| p))
    }

    async fn place_order(&self, placement: OrderPlacement) -> Result<Placement> {
        let OrderPlacement { order, payment, wallet_debit, clear_cart } = placement;
        if let Some((order, payment)) = self.existing_checkout(order.user_id(), order.checkout_key()).await? {
            return Ok(Placement::Existing { order, payment });
        }

        let mut tx = self.pool.begin().await?;
        let mut products = Self::lock_products(&mut tx, &order).await?;
        reserve_lines(&mut products, order.lines())?;
        Self::write_products(&mut tx, &products).await?;

        if let Some(code) = order.coupon_code() {
            let mut coupon = Self::lock_coupon(&mut tx, code).await?.ok_or(CheckoutError::NotFound("coupon"))?;
            coupon.redeem(order.user_id())?;
            Self::write_coupon(&mut tx, &coupon).await?;
        }

        if let Some(amount) = &wallet_debit {
            let mut wallet = Self::lock_wallet(&mut tx, order.user_id(), amount.currency()).await?;
            wallet.debit(amount, order.order_number())?;
            Self::write_wallet(&mut tx, &wallet).await?;
        }

        let inserted = sqlx::query("INSERT INTO orders (id, user_id, checkout_key, created_at, doc) VALUES ($1, $2, $3, $4, $5)")
            .bind(order.id()).bind(order.user_id()).bind(order.checkout_key()).bind(order.created_at()).bind(Json(&order))
            .execute(&mut *tx)
            .await;
        match inserted {
            Ok(_) => {}
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                // A concurrent request with the same checkout key won the race.
                tx.rollback().await?;
                let (order, payment) = self.existing_checkout(order.user_id(), order.checkout_key()).await?.ok_or(CheckoutError::NotFound("order"))?;
                return Ok(Placement::Existing { order, payment });
            }
            Err(e) => return Err(e.into()),
        }

        sqlx::query("INSERT INTO payments (id, order_id, gateway_order_id, doc) VALUES ($1, $2, $3, $4)")
            .bind(payment.id()).bind(payment.order_id()).bind(payment.gateway_order_id()).bind(Json(&payment))
            .execute(&mut *tx)
            .await?;

        if clear_cart {
            Self::clear_cart(&mut tx, order.user_id()).await?;
        }
        tx.commit().await?;
        Ok(Placement::Created)
    }

    async fn apply_update(&self, update: OrderUpdate) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let stored = sqlx::query_scalar::<_, Json<Order>>("SELECT doc FROM orders WHERE id = $1 FOR UPDATE")
            .bind(update.order.id())
            .fetch_optional(&mut *tx)
            .await?
            .map(|Json(o)| o)
            .ok_or(CheckoutError::NotFound("order"))?;
        let stored_payment = match &update.payment {
            Some(p) => sqlx::query_scalar::<_, Json<Payment>>("SELECT doc FROM payments WHERE id = $1 FOR UPDATE")
                .bind(p.id())
                .fetch_optional(&mut *tx)
                .await?
                .map(|Json(p)| p),
            None => None,
        };
        if !status_matches(&stored, stored_payment.as_ref(), &update) {
            tx.rollback().await?;
            return Ok(false);
        }

        let order = &update.order;
        if update.release_stock {
            let mut products = Self::lock_products(&mut tx, order).await?;
            release_lines(&mut products, order.lines())?;
            Self::write_products(&mut tx, &products).await?;
        }
        if update.restore_coupon {
            if let Some(code) = order.coupon_code() {
                if let Some(mut coupon) = Self::lock_coupon(&mut tx, code).await? {
                    coupon.restore(order.user_id());
                    Self::write_coupon(&mut tx, &coupon).await?;
                }
            }
        }
        if let Some(amount) = &update.wallet_credit {
            let mut wallet = Self::lock_wallet(&mut tx, order.user_id(), amount.currency()).await?;
            wallet.credit(amount, order.order_number())?;
            Self::write_wallet(&mut tx, &wallet).await?;
        }
        if update.clear_cart {
            Self::clear_cart(&mut tx, order.user_id()).await?;
        }
        if let Some(payment) = &update.payment {
            sqlx::query("UPDATE payments SET gateway_order_id = $2, doc = $3 WHERE id = $1")
                .bind(payment.id()).bind(payment.gateway_order_id()).bind(Json(payment))
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query("UPDATE orders SET doc = $2 WHERE id = $1")
            .bind(order.id()).bind(Json(order))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn webhook_seen(&self, event_id: &str) -> Result<bool> {
        let seen = sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM processed_webhooks WHERE event_id = $1)")
            .bind(event_id).fetch_one(&self.pool).await?;
        Ok(seen)
    }

    async fn record_webhook(&self, event_id: &str) -> Result<bool> {
        let result = sqlx::query("INSERT INTO processed_webhooks (event_id, received_at) VALUES ($1, NOW()) ON CONFLICT (event_id) DO NOTHING")
            .bind(event_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}
