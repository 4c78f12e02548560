//! Collaborators used by the placement and lifecycle steps.

pub mod coupon;
pub mod inventory;
pub mod notification;

pub use coupon::{AppliedCoupon, CouponRedeemer};
pub use inventory::{InventoryReservor, Reservation, ReservedLine, check_availability};
pub use notification::{
    InMemoryNotificationSender, LoggingNotificationSender, Notification, NotificationSender,
};
