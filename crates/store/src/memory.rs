use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{CouponId, OrderId, ProductId, UserId, VariantId, Version};
use domain::{Cart, CartStatus, Coupon, Order, OrderNumber, OrderStatus, Product};
use tokio::sync::RwLock;

use crate::{
    Result, StoreError,
    store::{CartStore, CatalogStore, CouponStore, OrderStore, StockDecrement, UsageIncrement},
};

#[derive(Debug, Default)]
struct OrderTable {
    by_id: HashMap<OrderId, Order>,
    by_number: HashMap<String, OrderId>,
    by_token: HashMap<String, OrderId>,
}

#[derive(Debug, Default)]
struct Faults {
    fail_on_insert: bool,
    insert_delay: Option<Duration>,
    detached_insert_delay: Option<Duration>,
    usage_increment_delay: Option<Duration>,
    fail_on_cart_conversion: bool,
}

/// In-memory store for tests and local runs.
///
/// Each collection sits behind its own lock; every conditional write holds
/// the write lock across its check and its mutation, so it is atomic with
/// respect to other callers.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    products: Arc<RwLock<HashMap<ProductId, Product>>>,
    carts: Arc<RwLock<HashMap<UserId, Cart>>>,
    coupons: Arc<RwLock<HashMap<CouponId, Coupon>>>,
    orders: Arc<RwLock<OrderTable>>,
    faults: Arc<RwLock<Faults>>,
}

fn injected(operation: &str) -> StoreError {
    StoreError::Database(sqlx::Error::Protocol(format!("injected failure: {operation}")))
}

impl InMemoryStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current stock of a product or variant.
    pub async fn stock_level(
        &self,
        product_id: ProductId,
        variant_id: Option<VariantId>,
    ) -> Option<u32> {
        let products = self.products.read().await;
        products
            .get(&product_id)?
            .stock_record(variant_id)
            .map(|record| record.stock)
    }

    /// Current usage count of a coupon.
    pub async fn coupon_usage(&self, id: CouponId) -> Option<u32> {
        self.coupons.read().await.get(&id).map(|c| c.usage_count)
    }

    /// Returns the total number of orders stored.
    pub async fn order_count(&self) -> usize {
        self.orders.read().await.by_id.len()
    }

    pub async fn cart_status(&self, user_id: UserId) -> Option<CartStatus> {
        self.carts.read().await.get(&user_id).map(|c| c.status)
    }

    /// Makes every order insert fail with a database error.
    pub async fn set_fail_on_insert(&self, fail: bool) {
        self.faults.write().await.fail_on_insert = fail;
    }

    /// Delays every order insert before it touches the table.
    pub async fn set_insert_delay(&self, delay: Option<Duration>) {
        self.faults.write().await.insert_delay = delay;
    }

    /// Delays every order insert on a background task, so the insert still
    /// commits after the caller stops waiting for it.
    pub async fn set_detached_insert_delay(&self, delay: Option<Duration>) {
        self.faults.write().await.detached_insert_delay = delay;
    }

    /// Delays the reply of every coupon usage increment after the increment
    /// has been applied.
    pub async fn set_usage_increment_delay(&self, delay: Option<Duration>) {
        self.faults.write().await.usage_increment_delay = delay;
    }

    pub async fn set_fail_on_cart_conversion(&self, fail: bool) {
        self.faults.write().await.fail_on_cart_conversion = fail;
    }

    async fn commit_order(&self, order: &Order) -> Result<Version> {
        let mut table = self.orders.write().await;
        let number = order.order_number().as_str().to_string();
        if table.by_number.contains_key(&number) {
            return Err(StoreError::DuplicateOrderNumber(number));
        }
        if let Some(token) = order.request_token()
            && table.by_token.contains_key(token)
        {
            return Err(StoreError::DuplicateRequestToken(token.to_string()));
        }

        let version = Version::first();
        let mut stored = order.clone();
        stored.set_version(version);

        table.by_number.insert(number, order.id());
        if let Some(token) = order.request_token() {
            table.by_token.insert(token.to_string(), order.id());
        }
        table.by_id.insert(order.id(), stored);
        Ok(version)
    }
}

#[async_trait]
impl CatalogStore for InMemoryStore {
    async fn get_product(&self, id: ProductId) -> Result<Option<Product>> {
        Ok(self.products.read().await.get(&id).cloned())
    }

    async fn save_product(&self, product: &Product) -> Result<()> {
        self.products
            .write()
            .await
            .insert(product.id, product.clone());
        Ok(())
    }

    async fn try_decrement_stock(
        &self,
        product_id: ProductId,
        variant_id: Option<VariantId>,
        quantity: u32,
    ) -> Result<StockDecrement> {
        let mut products = self.products.write().await;
        let record = products
            .get_mut(&product_id)
            .and_then(|p| p.stock_record_mut(variant_id))
            .ok_or_else(|| {
                StoreError::not_found("Stock record", stock_key(product_id, variant_id))
            })?;

        Ok(match record.take(quantity) {
            Ok(remaining) => StockDecrement::Applied { remaining },
            Err(available) => StockDecrement::Insufficient { available },
        })
    }

    async fn restock(
        &self,
        product_id: ProductId,
        variant_id: Option<VariantId>,
        quantity: u32,
    ) -> Result<u32> {
        let mut products = self.products.write().await;
        let record = products
            .get_mut(&product_id)
            .and_then(|p| p.stock_record_mut(variant_id))
            .ok_or_else(|| {
                StoreError::not_found("Stock record", stock_key(product_id, variant_id))
            })?;
        Ok(record.put_back(quantity))
    }
}

#[async_trait]
impl CartStore for InMemoryStore {
    async fn get_cart(&self, user_id: UserId) -> Result<Option<Cart>> {
        Ok(self.carts.read().await.get(&user_id).cloned())
    }

    async fn save_cart(&self, cart: &Cart) -> Result<()> {
        self.carts.write().await.insert(cart.user_id, cart.clone());
        Ok(())
    }

    async fn convert_cart(&self, user_id: UserId) -> Result<()> {
        if self.faults.read().await.fail_on_cart_conversion {
            return Err(injected("convert_cart"));
        }
        if let Some(cart) = self.carts.write().await.get_mut(&user_id) {
            cart.convert();
        }
        Ok(())
    }
}

#[async_trait]
impl CouponStore for InMemoryStore {
    async fn find_coupon(&self, code: &str) -> Result<Option<Coupon>> {
        let code = Coupon::normalize_code(code);
        Ok(self
            .coupons
            .read()
            .await
            .values()
            .find(|c| c.code == code)
            .cloned())
    }

    async fn save_coupon(&self, coupon: &Coupon) -> Result<()> {
        self.coupons.write().await.insert(coupon.id, coupon.clone());
        Ok(())
    }

    async fn try_increment_usage(&self, id: CouponId) -> Result<UsageIncrement> {
        let usage_count = {
            let mut coupons = self.coupons.write().await;
            let coupon = coupons
                .get_mut(&id)
                .ok_or_else(|| StoreError::not_found("Coupon", id))?;

            if coupon.is_exhausted() {
                return Ok(UsageIncrement::LimitReached);
            }
            coupon.usage_count += 1;
            coupon.usage_count
        };

        let delay = self.faults.read().await.usage_increment_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(UsageIncrement::Applied { usage_count })
    }

    async fn release_usage(&self, id: CouponId) -> Result<()> {
        let mut coupons = self.coupons.write().await;
        let coupon = coupons
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("Coupon", id))?;
        coupon.usage_count = coupon.usage_count.saturating_sub(1);
        Ok(())
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn insert_order(&self, order: &Order) -> Result<Version> {
        let (delay, detached_delay) = {
            let faults = self.faults.read().await;
            if faults.fail_on_insert {
                return Err(injected("insert_order"));
            }
            (faults.insert_delay, faults.detached_insert_delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(delay) = detached_delay {
            let store = self.clone();
            let order = order.clone();
            let commit = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                store.commit_order(&order).await
            });
            return commit
                .await
                .map_err(|e| StoreError::Database(sqlx::Error::Protocol(e.to_string())))?;
        }
        self.commit_order(order).await
    }

    async fn find_by_order_number(&self, order_number: &OrderNumber) -> Result<Option<Order>> {
        let table = self.orders.read().await;
        Ok(table
            .by_number
            .get(order_number.as_str())
            .and_then(|id| table.by_id.get(id))
            .cloned())
    }

    async fn find_by_request_token(&self, token: &str) -> Result<Option<Order>> {
        let table = self.orders.read().await;
        Ok(table
            .by_token
            .get(token)
            .and_then(|id| table.by_id.get(id))
            .cloned())
    }

    async fn save_order(&self, order: &Order) -> Result<Version> {
        let mut table = self.orders.write().await;
        let stored = table
            .by_id
            .get_mut(&order.id())
            .ok_or_else(|| StoreError::not_found("Order", order.order_number()))?;

        if stored.version() != order.version() {
            return Err(StoreError::Conflict {
                entity: format!("order {}", order.order_number()),
                expected: order.version(),
                actual: stored.version(),
            });
        }

        let version = order.version().next();
        let mut updated = order.clone();
        updated.set_version(version);
        *stored = updated;
        Ok(version)
    }

    async fn count_active_orders(&self, user_id: UserId) -> Result<u64> {
        let table = self.orders.read().await;
        let count = table
            .by_id
            .values()
            .filter(|o| o.is_owned_by(user_id) && o.status() != OrderStatus::Cancelled)
            .count();
        Ok(count as u64)
    }
}

fn stock_key(product_id: ProductId, variant_id: Option<VariantId>) -> String {
    match variant_id {
        Some(variant_id) => format!("{product_id}/{variant_id}"),
        None => product_id.to_string(),
    }
}
