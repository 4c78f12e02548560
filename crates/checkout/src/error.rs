//! Checkout error types.

use common::{ProductId, VariantId};
use domain::{CouponError, OrderError, OrderStatus, PricingError, ValidationErrors};
use store::StoreError;
use thiserror::Error;

/// Errors that can occur while placing or managing orders.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// The request is malformed; every offending field is listed.
    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    /// The product is missing, inactive, or the variant does not exist.
    #[error("Product {product_id} is not available")]
    ProductUnavailable { product_id: ProductId },

    #[error("Insufficient stock for {product}: {available} available, {requested} requested")]
    InsufficientStock {
        product_id: ProductId,
        variant_id: Option<VariantId>,
        product: String,
        available: u32,
        requested: u32,
    },

    #[error("{product} is out of stock")]
    OutOfStock {
        product_id: ProductId,
        variant_id: Option<VariantId>,
        product: String,
        requested: u32,
    },

    #[error(transparent)]
    Coupon(#[from] CouponError),

    /// Prices on the lines or the breakdown do not add up.
    #[error("Price integrity violation: {0}")]
    PriceIntegrity(String),

    /// The shipping method is not offered for the destination.
    #[error("{0}")]
    ShippingUnavailable(String),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    /// Every generated order number collided with an existing one.
    #[error("Could not allocate a unique order number after {attempts} attempts")]
    DuplicateOrderNumber { attempts: u32 },

    #[error("Cart is empty")]
    EmptyCart,

    /// A placement step did not finish within the configured timeout.
    #[error("Step '{step}' timed out")]
    Timeout { step: &'static str },

    /// The caller may not act on this order.
    #[error("Not allowed: {0}")]
    Forbidden(&'static str),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl CheckoutError {
    /// Short label used as the `reason` on failure metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            CheckoutError::Validation(_) => "validation",
            CheckoutError::ProductUnavailable { .. } => "product_unavailable",
            CheckoutError::InsufficientStock { .. } => "insufficient_stock",
            CheckoutError::OutOfStock { .. } => "out_of_stock",
            CheckoutError::Coupon(_) => "coupon",
            CheckoutError::PriceIntegrity(_) => "price_integrity",
            CheckoutError::ShippingUnavailable(_) => "shipping_unavailable",
            CheckoutError::InvalidTransition { .. } => "invalid_transition",
            CheckoutError::OrderNotFound(_) => "order_not_found",
            CheckoutError::DuplicateOrderNumber { .. } => "duplicate_order_number",
            CheckoutError::EmptyCart => "empty_cart",
            CheckoutError::Timeout { .. } => "timeout",
            CheckoutError::Forbidden(_) => "forbidden",
            CheckoutError::Store(_) => "store",
        }
    }
}

impl From<PricingError> for CheckoutError {
    fn from(err: PricingError) -> Self {
        match err {
            PricingError::Integrity(msg) => CheckoutError::PriceIntegrity(msg),
            PricingError::ShippingUnavailable { .. } => {
                CheckoutError::Validation(ValidationErrors::single(
                    "shipping_method",
                    err.to_string(),
                ))
            }
            PricingError::NoItems => CheckoutError::EmptyCart,
        }
    }
}

impl From<OrderError> for CheckoutError {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::InvalidTransition { from, to } => {
                CheckoutError::InvalidTransition { from, to }
            }
            OrderError::NoItems => CheckoutError::EmptyCart,
            OrderError::Pricing(pricing) => pricing.into(),
            OrderError::Inconsistent(msg) => CheckoutError::PriceIntegrity(msg.to_string()),
        }
    }
}

/// Convenience type alias for checkout results.
pub type Result<T> = std::result::Result<T, CheckoutError>;

#[cfg(test)]
mod tests {
    use domain::{Destination, ShippingMethod};

    use super::*;

    #[test]
    fn test_pricing_errors_map_to_checkout_errors() {
        let err: CheckoutError = PricingError::Integrity("bad".to_string()).into();
        assert!(matches!(err, CheckoutError::PriceIntegrity(_)));

        let err: CheckoutError = PricingError::ShippingUnavailable {
            method: ShippingMethod::Pickup,
            destination: Destination::International,
        }
        .into();
        match err {
            CheckoutError::Validation(errors) => {
                assert_eq!(errors.errors()[0].field, "shipping_method");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_order_errors_map_to_checkout_errors() {
        let err: CheckoutError = OrderError::InvalidTransition {
            from: OrderStatus::Delivered,
            to: OrderStatus::Processing,
        }
        .into();
        assert_eq!(err.reason(), "invalid_transition");
        assert_eq!(
            err.to_string(),
            "Invalid status transition from delivered to processing"
        );
    }
}
