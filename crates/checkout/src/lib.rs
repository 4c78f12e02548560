//! Order placement and fulfillment services.
//!
//! [`OrderAssembler`] turns a checkout request into a persisted order,
//! running each step under a deadline and undoing stock and coupon changes
//! when a later step fails. [`OrderLifecycle`] moves persisted orders through
//! their statuses.

pub mod assembler;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod request;
pub mod services;
pub mod state;
pub mod steps;

pub use assembler::{
    CartAdjustment, CartValidation, CouponPreview, OrderAssembler, OrderNumberGenerator, Placed,
    RemovalReason,
};
pub use config::{CheckoutConfig, RestockPolicy};
pub use error::{CheckoutError, Result};
pub use lifecycle::{OrderLifecycle, Requester, TimelineEntry, TrackingView};
pub use request::PlaceOrder;
pub use services::{
    AppliedCoupon, CouponRedeemer, InMemoryNotificationSender, InventoryReservor,
    LoggingNotificationSender, Notification, NotificationSender, Reservation,
};
pub use state::{Placement, PlacementState};
