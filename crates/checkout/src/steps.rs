//! Order placement saga constants.

/// The saga type identifier for order placement.
pub const SAGA_TYPE: &str = "OrderPlacement";

/// Step name: Re-price the requested lines from the catalog.
pub const STEP_RESOLVE_ITEMS: &str = "resolve_items";

/// Step name: Check the coupon without consuming it.
pub const STEP_VALIDATE_COUPON: &str = "validate_coupon";

/// Step name: Compute the price breakdown.
pub const STEP_COMPUTE_PRICING: &str = "compute_pricing";

/// Step name: Decrement stock for every line.
pub const STEP_RESERVE_INVENTORY: &str = "reserve_inventory";

/// Step name: Consume one coupon use.
pub const STEP_REDEEM_COUPON: &str = "redeem_coupon";

/// Step name: Insert the order.
pub const STEP_PERSIST_ORDER: &str = "persist_order";

/// Step name: Mark the customer's cart converted.
pub const STEP_CONVERT_CART: &str = "convert_cart";

/// Step name: Send the confirmation.
pub const STEP_NOTIFY: &str = "notify";

/// Returns true if the step changes shared state and must be undone when a
/// later step fails.
pub fn is_compensable(step: &str) -> bool {
    matches!(step, STEP_RESERVE_INVENTORY | STEP_REDEEM_COUPON)
}
