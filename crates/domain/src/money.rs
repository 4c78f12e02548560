//! Money and rate arithmetic in integer minor units.

use serde::{Deserialize, Serialize};

/// Money amount represented in minor units to avoid floating point issues.
///
/// Serialized as a bare integer (e.g. `16000` for 160.00).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money {
    cents: i64,
}

impl Money {
    /// Creates a new Money amount from minor units.
    pub fn from_cents(cents: i64) -> Self {
        Self { cents }
    }

    /// Creates a new Money amount from whole major units.
    pub fn from_major(units: i64) -> Self {
        Self {
            cents: units.saturating_mul(100),
        }
    }

    /// Returns zero money.
    pub fn zero() -> Self {
        Self { cents: 0 }
    }

    /// Returns the amount in minor units.
    pub fn cents(&self) -> i64 {
        self.cents
    }

    /// Returns the whole major-unit portion.
    pub fn major(&self) -> i64 {
        self.cents / 100
    }

    /// Returns the minor-unit remainder.
    pub fn cents_part(&self) -> i64 {
        self.cents.abs() % 100
    }

    pub fn is_positive(&self) -> bool {
        self.cents > 0
    }

    pub fn is_zero(&self) -> bool {
        self.cents == 0
    }

    pub fn is_negative(&self) -> bool {
        self.cents < 0
    }

    /// Multiplies by a quantity.
    pub fn multiply(&self, quantity: u32) -> Money {
        Money {
            cents: self.cents.saturating_mul(i64::from(quantity)),
        }
    }

    /// Applies a rate, rounding half away from zero to the nearest minor unit.
    pub fn apply_rate(&self, rate: Rate) -> Money {
        let scaled = i128::from(self.cents) * i128::from(rate.bps());
        let half = i128::from(Rate::SCALE / 2);
        let rounded = if scaled >= 0 {
            (scaled + half) / i128::from(Rate::SCALE)
        } else {
            (scaled - half) / i128::from(Rate::SCALE)
        };
        Money {
            cents: i64::try_from(rounded).unwrap_or(i64::MAX),
        }
    }

    /// Returns zero when the amount is negative.
    pub fn clamp_non_negative(self) -> Money {
        if self.is_negative() { Money::zero() } else { self }
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.cents < 0 {
            write!(f, "-{}.{:02}", self.major().abs(), self.cents_part())
        } else {
            write!(f, "{}.{:02}", self.major(), self.cents_part())
        }
    }
}

impl std::ops::Add for Money {
    type Output = Money;

    fn add(self, rhs: Self) -> Self::Output {
        Money {
            cents: self.cents.saturating_add(rhs.cents),
        }
    }
}

impl std::ops::Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Self) -> Self::Output {
        Money {
            cents: self.cents.saturating_sub(rhs.cents),
        }
    }
}

impl std::ops::AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl std::ops::SubAssign for Money {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

/// A proportional rate expressed in basis points (1/100 of a percent).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Rate(u32);

impl Rate {
    /// Basis points in 100%.
    pub const SCALE: u32 = 10_000;

    pub fn from_bps(bps: u32) -> Self {
        Self(bps)
    }

    /// Creates a rate from a whole percentage (5 => 5%).
    pub fn from_percent(percent: u32) -> Self {
        Self(percent.saturating_mul(100))
    }

    pub fn zero() -> Self {
        Self(0)
    }

    pub fn bps(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for Rate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:02}%", self.0 / 100, self.0 % 100)
    }
}
