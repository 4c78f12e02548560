//! Domain layer for the order placement pipeline.
//!
//! This crate is free of I/O. It provides:
//! - `Money` and `Rate` arithmetic in integer minor units
//! - catalog, cart, and coupon documents with their business rules
//! - the pricing engine that turns trusted line items into a `PriceBreakdown`
//! - the `Order` aggregate and its lifecycle state machine

pub mod address;
pub mod cart;
pub mod catalog;
pub mod coupon;
pub mod error;
pub mod line_item;
pub mod money;
pub mod order;
pub mod pricing;

pub use address::{Address, BillingAddress};
pub use cart::{Cart, CartLine, CartStatus, merge_lines};
pub use catalog::{Availability, Product, StockRecord, Variant};
pub use coupon::{Coupon, CouponError, CouponSnapshot, DiscountRule, UserRestrictions};
pub use error::{FieldError, ValidationErrors};
pub use line_item::{LineItem, ProductSnapshot};
pub use money::{Money, Rate};
pub use order::{
    Actor, Customer, NewOrder, Order, OrderError, OrderNumber, OrderStatus, Payment,
    PaymentMethod, PaymentStatus, ShippingDetails, TrackingEntry, TransitionEffects,
    TransitionRequest,
};
pub use pricing::{
    ByDestination, CountryTax, Destination, Lane, PriceBreakdown, PricingConfig, PricingEngine,
    PricingError, ShippingMethod, ShippingQuote, ShippingTable, TaxTable,
};
