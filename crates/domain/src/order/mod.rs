//! Order aggregate and its lifecycle.

mod aggregate;
mod state;
mod value_objects;

pub use aggregate::{NewOrder, Order};
pub use state::OrderStatus;
pub use value_objects::{
    Actor, Customer, OrderNumber, Payment, PaymentMethod, PaymentStatus, ShippingDetails,
    TrackingEntry, TransitionEffects, TransitionRequest,
};

use thiserror::Error;

use crate::pricing::PricingError;

/// Errors that can occur during order operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    /// The requested status is not reachable from the current one.
    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    /// Order has no items.
    #[error("Order has no items")]
    NoItems,

    /// The stored totals do not describe the lines.
    #[error(transparent)]
    Pricing(#[from] PricingError),

    /// Shipping or coupon figures disagree with the price breakdown.
    #[error("Order totals are inconsistent: {0}")]
    Inconsistent(&'static str),
}
