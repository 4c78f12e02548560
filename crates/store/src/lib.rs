//! Persistence for the order pipeline.
//!
//! Every write that guards a shared counter (stock, coupon usage, order
//! number uniqueness, order version) is a single conditional operation in the
//! backing store, so concurrent callers can never oversell, over-redeem, or
//! overwrite each other.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use store::{
    CartStore, CatalogStore, CommerceStore, CouponStore, OrderStore, StockDecrement,
    UsageIncrement,
};
