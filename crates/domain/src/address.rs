//! Postal addresses used for shipping, billing, and tax lookup.

use serde::{Deserialize, Serialize};

use crate::error::ValidationErrors;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub full_name: String,
    pub phone: String,
    #[serde(default)]
    pub email: Option<String>,
    pub line1: String,
    #[serde(default)]
    pub line2: Option<String>,
    pub city: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    /// ISO 3166-1 alpha-2 country code.
    pub country: String,
}

impl Address {
    /// Returns the upper-cased country code.
    pub fn country_code(&self) -> String {
        self.country.trim().to_ascii_uppercase()
    }

    /// Records every problem with this address under `prefix`.
    pub fn validate(&self, prefix: &str, errors: &mut ValidationErrors) {
        errors.require(format!("{prefix}.full_name"), &self.full_name);
        errors.require(format!("{prefix}.phone"), &self.phone);
        errors.require(format!("{prefix}.line1"), &self.line1);
        errors.require(format!("{prefix}.city"), &self.city);

        let country = self.country.trim();
        if country.len() != 2 || !country.chars().all(|c| c.is_ascii_alphabetic()) {
            errors.push(
                format!("{prefix}.country"),
                "must be a two-letter ISO country code",
            );
        }
        if let Some(email) = &self.email
            && !email.contains('@')
        {
            errors.push(format!("{prefix}.email"), "is not a valid email address");
        }
    }
}

/// Billing address of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BillingAddress {
    SameAsShipping,
    Separate { address: Address },
}

impl BillingAddress {
    /// Resolves the effective billing address.
    pub fn resolve<'a>(&'a self, shipping: &'a Address) -> &'a Address {
        match self {
            BillingAddress::SameAsShipping => shipping,
            BillingAddress::Separate { address } => address,
        }
    }
}
