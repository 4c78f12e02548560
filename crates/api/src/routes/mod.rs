//! HTTP route handlers.

pub mod cart;
pub mod coupons;
pub mod health;
pub mod metrics;
pub mod orders;

use checkout::{LoggingNotificationSender, OrderAssembler, OrderLifecycle};

/// Shared application state accessible from all handlers.
pub struct AppState<S> {
    pub assembler: OrderAssembler<S, LoggingNotificationSender>,
    pub lifecycle: OrderLifecycle<S, LoggingNotificationSender>,
}
