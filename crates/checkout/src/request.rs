//! Placement requests and their validation.

use domain::{
    Address, BillingAddress, CartLine, Customer, PaymentMethod, ShippingMethod, ValidationErrors,
};

/// A request to place an order.
///
/// Carries no prices: every price is resolved from the catalog.
#[derive(Debug, Clone)]
pub struct PlaceOrder {
    /// Idempotency key; a repeated key returns the order it first produced.
    pub request_token: Option<String>,
    pub customer: Customer,
    /// Explicit lines. `None` checks out the registered customer's cart.
    pub items: Option<Vec<CartLine>>,
    pub shipping_address: Address,
    pub billing: BillingAddress,
    pub shipping_method: ShippingMethod,
    pub payment_method: PaymentMethod,
    pub coupon_code: Option<String>,
    pub notes: Option<String>,
}

impl PlaceOrder {
    /// Creates a request for explicit lines with same-as-shipping billing.
    pub fn new(
        customer: Customer,
        items: Vec<CartLine>,
        shipping_address: Address,
        shipping_method: ShippingMethod,
        payment_method: PaymentMethod,
    ) -> Self {
        Self {
            request_token: None,
            customer,
            items: Some(items),
            shipping_address,
            billing: BillingAddress::SameAsShipping,
            shipping_method,
            payment_method,
            coupon_code: None,
            notes: None,
        }
    }

    /// Creates a request that checks out the customer's persisted cart.
    pub fn from_cart(
        customer: Customer,
        shipping_address: Address,
        shipping_method: ShippingMethod,
        payment_method: PaymentMethod,
    ) -> Self {
        Self {
            items: None,
            ..Self::new(
                customer,
                Vec::new(),
                shipping_address,
                shipping_method,
                payment_method,
            )
        }
    }

    pub fn with_coupon(mut self, code: impl Into<String>) -> Self {
        self.coupon_code = Some(code.into());
        self
    }

    pub fn with_request_token(mut self, token: impl Into<String>) -> Self {
        self.request_token = Some(token.into());
        self
    }

    pub fn with_billing(mut self, billing: BillingAddress) -> Self {
        self.billing = billing;
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// The coupon code, if one was given and is not blank.
    pub fn coupon_code(&self) -> Option<&str> {
        self.coupon_code
            .as_deref()
            .map(str::trim)
            .filter(|code| !code.is_empty())
    }

    /// The request token namespaced by customer.
    ///
    /// Registered customers are keyed by user id, guests by their lower-cased
    /// email, so a key reused by another customer never matches this one.
    pub fn scoped_request_token(&self) -> Option<String> {
        let token = self.request_token.as_deref()?.trim();
        let scope = match &self.customer {
            Customer::Registered { user_id, .. } => format!("user:{user_id}"),
            Customer::Guest { email, .. } => format!("guest:{}", email.trim().to_lowercase()),
        };
        Some(format!("{scope}:{token}"))
    }

    /// Records every problem with the request.
    pub fn validate_into(&self, max_line_quantity: u32, errors: &mut ValidationErrors) {
        match &self.customer {
            Customer::Guest { email, phone } => {
                if !email.contains('@') {
                    errors.push("customer.email", "is not a valid email address");
                }
                errors.require("customer.phone", phone);
                if self.items.is_none() {
                    errors.push("items", "is required for guest checkout");
                }
            }
            Customer::Registered { .. } => {}
        }

        if let Some(items) = &self.items {
            validate_lines(items, max_line_quantity, errors);
        }

        self.shipping_address.validate("shipping_address", errors);
        if let BillingAddress::Separate { address } = &self.billing {
            address.validate("billing_address", errors);
        }
        if let Some(token) = &self.request_token
            && token.trim().is_empty()
        {
            errors.push("request_token", "must not be blank");
        }
    }

    pub fn validate(&self, max_line_quantity: u32) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        self.validate_into(max_line_quantity, &mut errors);
        errors.into_result()
    }
}

/// Checks that there is at least one line and every quantity is in range.
pub fn validate_lines(lines: &[CartLine], max_line_quantity: u32, errors: &mut ValidationErrors) {
    validate_indexed_lines(lines, 0.., max_line_quantity, errors);
}

/// Like [`validate_lines`], reporting each line under the client index
/// `indices` yields for it.
pub fn validate_indexed_lines(
    lines: &[CartLine],
    indices: impl IntoIterator<Item = usize>,
    max_line_quantity: u32,
    errors: &mut ValidationErrors,
) {
    if lines.is_empty() {
        errors.push("items", "must contain at least one item");
    }
    for (line, i) in lines.iter().zip(indices) {
        if line.quantity == 0 || line.quantity > max_line_quantity {
            errors.push(
                format!("items[{i}].quantity"),
                format!("must be between 1 and {max_line_quantity}"),
            );
        }
    }
}
