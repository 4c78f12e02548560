use async_trait::async_trait;
use common::{CouponId, ProductId, UserId, VariantId, Version};
use domain::{Cart, Coupon, Order, OrderNumber, Product};

use crate::Result;

/// Outcome of a conditional stock decrement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockDecrement {
    /// Stock was taken. Untracked records report their unchanged level.
    Applied { remaining: u32 },
    /// Fewer units than requested were on hand; nothing was taken.
    Insufficient { available: u32 },
}

/// Outcome of a conditional coupon usage increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageIncrement {
    Applied { usage_count: u32 },
    /// The usage limit was already reached; the count is unchanged.
    LimitReached,
}

/// Read access to the catalog and atomic stock mutation.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Loads a product with its current stock levels.
    async fn get_product(&self, id: ProductId) -> Result<Option<Product>>;

    /// Inserts or replaces a product, including its stock levels.
    async fn save_product(&self, product: &Product) -> Result<()>;

    /// Takes `quantity` units if and only if they are on hand.
    ///
    /// The check and the decrement happen as one operation. Fails with
    /// `NotFound` if the product or variant does not exist.
    async fn try_decrement_stock(
        &self,
        product_id: ProductId,
        variant_id: Option<VariantId>,
        quantity: u32,
    ) -> Result<StockDecrement>;

    /// Returns `quantity` units to stock and reports the new level.
    async fn restock(
        &self,
        product_id: ProductId,
        variant_id: Option<VariantId>,
        quantity: u32,
    ) -> Result<u32>;
}

/// Persisted carts of authenticated users.
#[async_trait]
pub trait CartStore: Send + Sync {
    async fn get_cart(&self, user_id: UserId) -> Result<Option<Cart>>;

    async fn save_cart(&self, cart: &Cart) -> Result<()>;

    /// Marks the user's cart converted and empties it. A missing cart is not an error.
    async fn convert_cart(&self, user_id: UserId) -> Result<()>;
}

/// Coupon definitions and their shared usage counters.
#[async_trait]
pub trait CouponStore: Send + Sync {
    /// Looks a coupon up by code, case-insensitively.
    async fn find_coupon(&self, code: &str) -> Result<Option<Coupon>>;

    async fn save_coupon(&self, coupon: &Coupon) -> Result<()>;

    /// Increments usage if and only if the limit has not been reached.
    async fn try_increment_usage(&self, id: CouponId) -> Result<UsageIncrement>;

    /// Gives back one use. Never drops below zero.
    async fn release_usage(&self, id: CouponId) -> Result<()>;
}

/// Orders, unique by id, order number, and request token.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Inserts a new order and returns its first version.
    ///
    /// Fails with `DuplicateOrderNumber` or `DuplicateRequestToken` when
    /// another order already holds either value.
    async fn insert_order(&self, order: &Order) -> Result<Version>;

    async fn find_by_order_number(&self, order_number: &OrderNumber) -> Result<Option<Order>>;

    async fn find_by_request_token(&self, token: &str) -> Result<Option<Order>>;

    /// Replaces a stored order if it is still at `order.version()`.
    ///
    /// Returns the new version, or `Conflict` if the order changed meanwhile.
    async fn save_order(&self, order: &Order) -> Result<Version>;

    /// Counts the user's orders that were not cancelled.
    async fn count_active_orders(&self, user_id: UserId) -> Result<u64>;
}

/// Everything the order pipeline persists.
pub trait CommerceStore: CatalogStore + CartStore + CouponStore + OrderStore {}

// Blanket implementation for every type that provides all four stores
impl<T: CatalogStore + CartStore + CouponStore + OrderStore + ?Sized> CommerceStore for T {}
