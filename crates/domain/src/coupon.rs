//! Coupon documents and their redemption rules.

use chrono::{DateTime, Utc};
use common::{CouponId, UserId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::money::{Money, Rate};

/// Errors raised while defining or redeeming a coupon.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CouponError {
    /// No active coupon has this code.
    #[error("Coupon {code} was not found")]
    NotFound { code: String },

    /// The coupon's start date is in the future.
    #[error("Coupon {code} is not active yet")]
    NotYetActive { code: String },

    #[error("Coupon {code} has expired")]
    Expired { code: String },

    /// The usage limit has been reached.
    #[error("Coupon {code} has reached its usage limit")]
    Exhausted { code: String },

    #[error("Coupon {code} requires a minimum purchase of {minimum}, subtotal is {subtotal}")]
    MinimumPurchaseNotMet {
        code: String,
        minimum: Money,
        subtotal: Money,
    },

    /// The customer does not satisfy the coupon's user restrictions.
    #[error("Coupon {code} cannot be used by this customer: {reason}")]
    NotEligible { code: String, reason: &'static str },

    /// The coupon definition itself is invalid.
    #[error("Invalid coupon definition: {0}")]
    InvalidDefinition(&'static str),
}

/// How a coupon reduces the subtotal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiscountRule {
    /// A fixed amount off, never more than the subtotal.
    Flat { amount: Money },
    /// A percentage of the subtotal, optionally capped.
    Percent {
        percent: u8,
        #[serde(default)]
        max_discount: Option<Money>,
    },
}

impl DiscountRule {
    fn validate(&self) -> Result<(), CouponError> {
        match self {
            DiscountRule::Flat { amount } if amount.is_negative() => Err(
                CouponError::InvalidDefinition("flat discount must not be negative"),
            ),
            DiscountRule::Percent { percent, .. } if *percent > 100 => Err(
                CouponError::InvalidDefinition("percent discount must be at most 100"),
            ),
            DiscountRule::Percent {
                max_discount: Some(cap),
                ..
            } if cap.is_negative() => Err(CouponError::InvalidDefinition(
                "maximum discount must not be negative",
            )),
            _ => Ok(()),
        }
    }

    /// Computes the discount for a subtotal.
    ///
    /// The result is never negative and never exceeds the subtotal.
    pub fn discount_for(&self, subtotal: Money) -> Money {
        let subtotal = subtotal.clamp_non_negative();
        let raw = match *self {
            DiscountRule::Flat { amount } => amount,
            DiscountRule::Percent {
                percent,
                max_discount,
            } => {
                let discount = subtotal.apply_rate(Rate::from_percent(u32::from(percent)));
                match max_discount {
                    Some(cap) => discount.min(cap),
                    None => discount,
                }
            }
        };
        raw.clamp_non_negative().min(subtotal)
    }
}

/// Who may redeem a coupon.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRestrictions {
    /// Only customers without prior non-cancelled orders.
    #[serde(default)]
    pub first_order_only: bool,
    /// When non-empty, only these users.
    #[serde(default)]
    pub allowed_users: Vec<UserId>,
}

impl UserRestrictions {
    pub fn is_restricted(&self) -> bool {
        self.first_order_only || !self.allowed_users.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coupon {
    pub id: CouponId,
    /// Upper-cased, trimmed code. Unique.
    pub code: String,
    #[serde(default)]
    pub name: Option<String>,
    pub rule: DiscountRule,
    #[serde(default)]
    pub min_purchase: Money,
    #[serde(default)]
    pub usage_count: u32,
    #[serde(default)]
    pub usage_limit: Option<u32>,
    #[serde(default)]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    #[serde(default)]
    pub restrictions: UserRestrictions,
}

impl Coupon {
    /// Creates an active, unlimited coupon.
    pub fn new(code: &str, rule: DiscountRule) -> Result<Self, CouponError> {
        rule.validate()?;
        let code = Self::normalize_code(code);
        if code.is_empty() {
            return Err(CouponError::InvalidDefinition("code must not be empty"));
        }
        Ok(Self {
            id: CouponId::new(),
            code,
            name: None,
            rule,
            min_purchase: Money::zero(),
            usage_count: 0,
            usage_limit: None,
            starts_at: None,
            expires_at: None,
            is_active: true,
            restrictions: UserRestrictions::default(),
        })
    }

    pub fn with_usage_limit(mut self, limit: u32) -> Self {
        self.usage_limit = Some(limit);
        self
    }

    pub fn with_min_purchase(mut self, min_purchase: Money) -> Self {
        self.min_purchase = min_purchase;
        self
    }

    pub fn with_window(
        mut self,
        starts_at: Option<DateTime<Utc>>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        self.starts_at = starts_at;
        self.expires_at = expires_at;
        self
    }

    pub fn with_restrictions(mut self, restrictions: UserRestrictions) -> Self {
        self.restrictions = restrictions;
        self
    }

    /// Normalizes a customer-entered code for lookup.
    pub fn normalize_code(code: &str) -> String {
        code.trim().to_uppercase()
    }

    pub fn is_exhausted(&self) -> bool {
        self.usage_limit
            .is_some_and(|limit| self.usage_count >= limit)
    }

    /// Checks everything that does not depend on the customer's history.
    ///
    /// Order: active, started, expired, exhausted, minimum purchase.
    pub fn check_redeemable(&self, subtotal: Money, now: DateTime<Utc>) -> Result<(), CouponError> {
        let code = || self.code.clone();
        if !self.is_active {
            return Err(CouponError::NotFound { code: code() });
        }
        if self.starts_at.is_some_and(|start| start > now) {
            return Err(CouponError::NotYetActive { code: code() });
        }
        if self.expires_at.is_some_and(|end| end < now) {
            return Err(CouponError::Expired { code: code() });
        }
        if self.is_exhausted() {
            return Err(CouponError::Exhausted { code: code() });
        }
        if subtotal < self.min_purchase {
            return Err(CouponError::MinimumPurchaseNotMet {
                code: code(),
                minimum: self.min_purchase,
                subtotal,
            });
        }
        Ok(())
    }

    /// Checks the user restrictions.
    ///
    /// `prior_orders` is the customer's count of non-cancelled orders; it is
    /// only consulted for first-order-only coupons. Guests never satisfy a
    /// restricted coupon.
    pub fn check_eligibility(
        &self,
        user_id: Option<UserId>,
        prior_orders: u64,
    ) -> Result<(), CouponError> {
        if !self.restrictions.is_restricted() {
            return Ok(());
        }
        let not_eligible = |reason| CouponError::NotEligible {
            code: self.code.clone(),
            reason,
        };
        let Some(user_id) = user_id else {
            return Err(not_eligible("sign in to use this coupon"));
        };
        if !self.restrictions.allowed_users.is_empty()
            && !self.restrictions.allowed_users.contains(&user_id)
        {
            return Err(not_eligible("coupon is limited to selected customers"));
        }
        if self.restrictions.first_order_only && prior_orders > 0 {
            return Err(not_eligible("coupon is valid on the first order only"));
        }
        Ok(())
    }

    /// Captures the coupon as applied to an order.
    pub fn snapshot(&self, applied_discount: Money) -> CouponSnapshot {
        CouponSnapshot {
            coupon_id: self.id,
            code: self.code.clone(),
            rule: self.rule,
            applied_discount,
        }
    }
}

/// The coupon as it was applied to an order. Not a live reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponSnapshot {
    pub coupon_id: CouponId,
    pub code: String,
    pub rule: DiscountRule,
    pub applied_discount: Money,
}
