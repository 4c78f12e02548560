//! Coupon validation and redemption.

use chrono::{DateTime, Utc};
use common::{CouponId, UserId};
use domain::{Coupon, CouponError, CouponSnapshot, Money};
use store::{CouponStore, OrderStore, UsageIncrement};

use crate::error::Result;

/// A coupon that passed validation, with the discount it grants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedCoupon {
    pub coupon: Coupon,
    pub discount: Money,
}

impl AppliedCoupon {
    pub fn snapshot(&self) -> CouponSnapshot {
        self.coupon.snapshot(self.discount)
    }
}

/// Checks coupons against a subtotal and consumes their shared usage counter.
#[derive(Debug, Clone)]
pub struct CouponRedeemer<S> {
    store: S,
}

impl<S: CouponStore + OrderStore> CouponRedeemer<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Validates `code` for this subtotal and customer. Does not consume a use.
    ///
    /// Checks run in this order: found and active, started, expired,
    /// exhausted, minimum purchase, user restrictions.
    #[tracing::instrument(skip(self))]
    pub async fn validate(
        &self,
        code: &str,
        subtotal: Money,
        user_id: Option<UserId>,
        now: DateTime<Utc>,
    ) -> Result<AppliedCoupon> {
        let coupon = self
            .store
            .find_coupon(code)
            .await?
            .ok_or_else(|| CouponError::NotFound {
                code: Coupon::normalize_code(code),
            })?;

        coupon.check_redeemable(subtotal, now)?;

        let prior_orders = match user_id {
            Some(user_id) if coupon.restrictions.first_order_only => {
                self.store.count_active_orders(user_id).await?
            }
            _ => 0,
        };
        coupon.check_eligibility(user_id, prior_orders)?;

        let discount = coupon.rule.discount_for(subtotal);
        Ok(AppliedCoupon { coupon, discount })
    }

    /// Consumes one use of a validated coupon.
    ///
    /// Fails with `Exhausted` if the limit was reached since validation.
    #[tracing::instrument(skip(self, applied), fields(code = %applied.coupon.code))]
    pub async fn redeem(&self, applied: &AppliedCoupon) -> Result<()> {
        match self.store.try_increment_usage(applied.coupon.id).await? {
            UsageIncrement::Applied { usage_count } => {
                metrics::counter!("coupon_redemptions_total").increment(1);
                tracing::debug!(usage_count, "coupon redeemed");
                Ok(())
            }
            UsageIncrement::LimitReached => Err(CouponError::Exhausted {
                code: applied.coupon.code.clone(),
            }
            .into()),
        }
    }

    /// Gives back a use consumed by [`CouponRedeemer::redeem`].
    #[tracing::instrument(skip(self))]
    pub async fn release(&self, coupon_id: CouponId) -> Result<()> {
        self.store.release_usage(coupon_id).await?;
        Ok(())
    }
}
