//! Shared identifier and versioning types for the commerce workspace.

mod types;

pub use types::{CouponId, OrderId, ProductId, UserId, VariantId, Version};
