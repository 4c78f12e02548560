//! Value objects for the order domain.

use chrono::{DateTime, Utc};
use common::UserId;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::OrderStatus;
use crate::money::Money;
use crate::pricing::ShippingMethod;

/// Human-readable order identifier, e.g. `ORD-20240315143005-0421`.
///
/// Made of the placement time to the second and a random four-digit suffix.
/// Uniqueness is enforced by the order store, which rejects duplicates so the
/// caller can generate another number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderNumber(String);

impl OrderNumber {
    const PREFIX: &'static str = "ORD";
    const SUFFIX_RANGE: u32 = 10_000;

    /// Generates a number for an order placed at `at`.
    pub fn generate(at: DateTime<Utc>) -> Self {
        let suffix = rand::rng().random_range(0..Self::SUFFIX_RANGE);
        Self::from_parts(at, suffix)
    }

    /// Builds a number from its parts. The suffix is reduced into range.
    pub fn from_parts(at: DateTime<Utc>, suffix: u32) -> Self {
        Self(format!(
            "{}-{}-{:04}",
            Self::PREFIX,
            at.format("%Y%m%d%H%M%S"),
            suffix % Self::SUFFIX_RANGE
        ))
    }

    /// Wraps an order number received from a caller.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into().trim().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who placed the order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Customer {
    Registered {
        user_id: UserId,
        #[serde(default)]
        email: Option<String>,
    },
    Guest {
        email: String,
        phone: String,
    },
}

impl Customer {
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Customer::Registered { user_id, .. } => Some(*user_id),
            Customer::Guest { .. } => None,
        }
    }

    pub fn email(&self) -> Option<&str> {
        match self {
            Customer::Registered { email, .. } => email.as_deref(),
            Customer::Guest { email, .. } => Some(email),
        }
    }
}

/// Who performed a lifecycle step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Actor {
    System,
    Customer {
        #[serde(default)]
        user_id: Option<UserId>,
    },
    Admin {
        #[serde(default)]
        user_id: Option<UserId>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    CashOnDelivery,
    Card,
    MobileWallet,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::CashOnDelivery => "cash_on_delivery",
            PaymentMethod::Card => "card",
            PaymentMethod::MobileWallet => "mobile_wallet",
        }
    }
}

impl std::str::FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cash_on_delivery" | "cod" => Ok(PaymentMethod::CashOnDelivery),
            "card" => Ok(PaymentMethod::Card),
            "mobile_wallet" => Ok(PaymentMethod::MobileWallet),
            other => Err(format!("unknown payment method '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
    Refunded,
}

/// Payment bookkeeping. No gateway is involved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    #[serde(default)]
    pub refund_amount: Option<Money>,
    #[serde(default)]
    pub refunded_at: Option<DateTime<Utc>>,
}

impl Payment {
    pub fn new(method: PaymentMethod) -> Self {
        Self {
            method,
            status: PaymentStatus::Pending,
            refund_amount: None,
            refunded_at: None,
        }
    }

    /// Marks the payment collected. A refunded payment stays refunded.
    pub(crate) fn complete(&mut self) {
        if self.status != PaymentStatus::Refunded {
            self.status = PaymentStatus::Completed;
        }
    }

    pub(crate) fn refund(&mut self, amount: Money, at: DateTime<Utc>) {
        self.status = PaymentStatus::Refunded;
        self.refund_amount = Some(amount);
        self.refunded_at = Some(at);
    }
}

/// Shipping state of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingDetails {
    pub method: ShippingMethod,
    pub cost: Money,
    pub estimated_delivery: DateTime<Utc>,
    #[serde(default)]
    pub tracking_number: Option<String>,
    #[serde(default)]
    pub carrier: Option<String>,
    #[serde(default)]
    pub actual_delivery: Option<DateTime<Utc>>,
}

/// One entry of the append-only order timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingEntry {
    pub status: OrderStatus,
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub note: Option<String>,
    pub actor: Actor,
}

/// A request to move an order to another status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionRequest {
    pub target: OrderStatus,
    pub actor: Actor,
    pub note: Option<String>,
    /// Used when the target is `Shipped`.
    pub tracking_number: Option<String>,
    /// Used when the target is `Shipped`.
    pub carrier: Option<String>,
    /// Used when the target is `Cancelled` or `Returned`.
    pub reason: Option<String>,
}

impl TransitionRequest {
    pub fn new(target: OrderStatus, actor: Actor) -> Self {
        Self {
            target,
            actor,
            note: None,
            tracking_number: None,
            carrier: None,
            reason: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_tracking(
        mut self,
        tracking_number: impl Into<String>,
        carrier: Option<String>,
    ) -> Self {
        self.tracking_number = Some(tracking_number.into());
        self.carrier = carrier;
        self
    }
}

/// Obligations derived from a successful transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionEffects {
    pub from: OrderStatus,
    pub to: OrderStatus,
    /// Amount marked refunded by this transition, if any.
    pub refunded: Option<Money>,
    /// True when the order's lines may be returned to stock.
    pub releases_inventory: bool,
}
