//! Checkout tuning knobs.

use std::time::Duration;

use domain::PricingConfig;

/// Whether a lifecycle transition puts the order's units back on the shelf.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestockPolicy {
    pub on_cancel: bool,
    pub on_return: bool,
}

impl RestockPolicy {
    /// Returns true if reaching `status` should restock under this policy.
    pub fn applies_to(&self, status: domain::OrderStatus) -> bool {
        match status {
            domain::OrderStatus::Cancelled => self.on_cancel,
            domain::OrderStatus::Returned => self.on_return,
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    pub pricing: PricingConfig,
    pub restock: RestockPolicy,
    /// Upper bound on each side-effecting placement step.
    pub step_timeout: Duration,
    /// How many order numbers to try before giving up on a placement.
    pub max_order_number_attempts: u32,
    pub max_line_quantity: u32,
    /// After an insert times out, how many times to look for the order
    /// before treating the insert as lost.
    pub persist_rechecks: u32,
    pub persist_recheck_interval: Duration,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            pricing: PricingConfig::default(),
            restock: RestockPolicy::default(),
            step_timeout: Duration::from_millis(5_000),
            max_order_number_attempts: 5,
            max_line_quantity: 100,
            persist_rechecks: 3,
            persist_recheck_interval: Duration::from_millis(500),
        }
    }
}
