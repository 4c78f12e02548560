//! Pricing engine.
//!
//! Turns trusted line items, a shipping method, a destination, and an optional
//! coupon rule into a `PriceBreakdown`. Pure computation, no I/O.
//!
//! ```text
//! subtotal        = Σ line_total             (already at effective prices)
//! item_discount   = Σ (unit − effective) × q (reported, not subtracted again)
//! coupon_discount = rule(subtotal)
//! tax             = subtotal × rate(country, state)
//! total           = max(0, subtotal − coupon_discount + shipping_cost + tax)
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::address::Address;
use crate::coupon::DiscountRule;
use crate::line_item::LineItem;
use crate::money::{Money, Rate};

/// Errors raised by the pricing engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PricingError {
    /// Values on the lines or the breakdown do not add up.
    ///
    /// This means something upstream tampered with trusted prices; the order
    /// must be aborted.
    #[error("Price integrity violation: {0}")]
    Integrity(String),

    /// The shipping method is not offered for this destination.
    #[error("Shipping method {method} is not available for {destination} delivery")]
    ShippingUnavailable {
        method: ShippingMethod,
        destination: Destination,
    },

    #[error("Cannot price an order without items")]
    NoItems,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShippingMethod {
    Standard,
    Express,
    Pickup,
}

impl ShippingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShippingMethod::Standard => "standard",
            ShippingMethod::Express => "express",
            ShippingMethod::Pickup => "pickup",
        }
    }
}

impl std::fmt::Display for ShippingMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ShippingMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(ShippingMethod::Standard),
            "express" => Ok(ShippingMethod::Express),
            "pickup" => Ok(ShippingMethod::Pickup),
            other => Err(format!("unknown shipping method '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    Domestic,
    International,
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Destination::Domestic => "domestic",
            Destination::International => "international",
        })
    }
}

/// A value per destination. `None` means the lane is not offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByDestination<T> {
    pub domestic: Option<T>,
    pub international: Option<T>,
}

impl<T: Copy> ByDestination<T> {
    pub fn get(&self, destination: Destination) -> Option<T> {
        match destination {
            Destination::Domestic => self.domestic,
            Destination::International => self.international,
        }
    }
}

/// Cost and transit time of one shipping lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lane {
    pub cost: Money,
    pub transit_days: u32,
}

impl Lane {
    pub fn new(cost: Money, transit_days: u32) -> Self {
        Self { cost, transit_days }
    }
}

/// Shipping rate table keyed by method and destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingTable {
    /// Country code treated as domestic.
    pub home_country: String,
    pub standard: ByDestination<Lane>,
    pub express: ByDestination<Lane>,
    pub pickup: ByDestination<Lane>,
    /// Standard shipping is free at or above this subtotal.
    pub free_standard_threshold: Money,
    /// Express costs `express_discounted` at or above this subtotal.
    pub express_discount_threshold: Money,
    pub express_discounted: ByDestination<Money>,
}

/// The shipping charge for one order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingQuote {
    pub method: ShippingMethod,
    pub destination: Destination,
    pub cost: Money,
    pub transit_days: u32,
}

impl ShippingTable {
    pub fn destination(&self, address: &Address) -> Destination {
        if address.country_code() == self.home_country.to_ascii_uppercase() {
            Destination::Domestic
        } else {
            Destination::International
        }
    }

    /// Quotes shipping for a method, destination address, and subtotal.
    pub fn quote(
        &self,
        method: ShippingMethod,
        address: &Address,
        subtotal: Money,
    ) -> Result<ShippingQuote, PricingError> {
        let destination = self.destination(address);
        let lanes = match method {
            ShippingMethod::Standard => &self.standard,
            ShippingMethod::Express => &self.express,
            ShippingMethod::Pickup => &self.pickup,
        };
        let lane = lanes
            .get(destination)
            .ok_or(PricingError::ShippingUnavailable {
                method,
                destination,
            })?;

        let cost = match method {
            ShippingMethod::Standard if subtotal >= self.free_standard_threshold => Money::zero(),
            ShippingMethod::Express if subtotal >= self.express_discount_threshold => self
                .express_discounted
                .get(destination)
                .unwrap_or(lane.cost),
            _ => lane.cost,
        };

        Ok(ShippingQuote {
            method,
            destination,
            cost: cost.clamp_non_negative(),
            transit_days: lane.transit_days,
        })
    }
}

impl Default for ShippingTable {
    fn default() -> Self {
        Self {
            home_country: "BD".to_string(),
            standard: ByDestination {
                domestic: Some(Lane::new(Money::from_major(50), 5)),
                international: Some(Lane::new(Money::from_major(1500), 14)),
            },
            express: ByDestination {
                domestic: Some(Lane::new(Money::from_major(120), 2)),
                international: Some(Lane::new(Money::from_major(2500), 7)),
            },
            pickup: ByDestination {
                domestic: Some(Lane::new(Money::zero(), 1)),
                international: None,
            },
            free_standard_threshold: Money::from_major(1000),
            express_discount_threshold: Money::from_major(5000),
            express_discounted: ByDestination {
                domestic: Some(Money::from_major(60)),
                international: Some(Money::from_major(1800)),
            },
        }
    }
}

/// Tax rates of one country.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountryTax {
    pub default_rate: Rate,
    /// Keyed by lower-cased state name.
    #[serde(default)]
    pub states: HashMap<String, Rate>,
}

/// Tax rates keyed by upper-cased ISO country code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxTable {
    pub countries: HashMap<String, CountryTax>,
}

impl TaxTable {
    /// Looks up the rate for an address.
    ///
    /// Unknown states fall back to the country default; unknown countries
    /// are not taxed.
    pub fn rate_for(&self, address: &Address) -> Rate {
        let Some(country) = self.countries.get(&address.country_code()) else {
            return Rate::zero();
        };
        address
            .state
            .as_deref()
            .map(|s| s.trim().to_lowercase())
            .and_then(|s| country.states.get(&s).copied())
            .unwrap_or(country.default_rate)
    }
}

impl Default for TaxTable {
    fn default() -> Self {
        let bangladesh = CountryTax {
            default_rate: Rate::from_percent(5),
            states: HashMap::from([
                ("dhaka".to_string(), Rate::from_percent(5)),
                ("chattogram".to_string(), Rate::from_percent(5)),
            ]),
        };
        Self {
            countries: HashMap::from([("BD".to_string(), bangladesh)]),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingConfig {
    pub shipping: ShippingTable,
    pub tax: TaxTable,
}

/// Money totals of an order. Always derived from the lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBreakdown {
    pub subtotal: Money,
    pub item_discount: Money,
    pub coupon_discount: Money,
    pub shipping_cost: Money,
    pub tax: Money,
    pub total: Money,
}

impl PriceBreakdown {
    /// Re-derives the total from the other components.
    pub fn expected_total(&self) -> Money {
        (self.subtotal - self.coupon_discount + self.shipping_cost + self.tax).clamp_non_negative()
    }

    /// Checks this breakdown against the lines it claims to describe.
    pub fn verify(&self, items: &[LineItem]) -> Result<(), PricingError> {
        let subtotal = verified_subtotal(items)?;
        if subtotal != self.subtotal {
            return Err(PricingError::Integrity(format!(
                "subtotal {} does not match line totals {}",
                self.subtotal, subtotal
            )));
        }
        if self.coupon_discount.is_negative()
            || self.coupon_discount > self.subtotal
            || self.shipping_cost.is_negative()
            || self.tax.is_negative()
        {
            return Err(PricingError::Integrity(
                "breakdown contains an out-of-range component".to_string(),
            ));
        }
        if self.total != self.expected_total() {
            return Err(PricingError::Integrity(format!(
                "total {} does not match recomputed total {}",
                self.total,
                self.expected_total()
            )));
        }
        Ok(())
    }
}

/// Sums line totals after checking every line is internally consistent.
fn verified_subtotal(items: &[LineItem]) -> Result<Money, PricingError> {
    let mut subtotal = Money::zero();
    for (index, item) in items.iter().enumerate() {
        if item.effective_unit_price > item.unit_price || item.effective_unit_price.is_negative() {
            return Err(PricingError::Integrity(format!(
                "line {index}: effective price {} is outside 0..={}",
                item.effective_unit_price, item.unit_price
            )));
        }
        let expected = item.effective_unit_price.multiply(item.quantity);
        if item.line_total != expected {
            return Err(PricingError::Integrity(format!(
                "line {index}: total {} does not match {} x {}",
                item.line_total, item.effective_unit_price, item.quantity
            )));
        }
        subtotal += item.line_total;
    }
    Ok(subtotal)
}

/// Stateless pricing engine over a rate configuration.
#[derive(Debug, Clone, Default)]
pub struct PricingEngine {
    config: PricingConfig,
}

impl PricingEngine {
    pub fn new(config: PricingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PricingConfig {
        &self.config
    }

    /// Subtotal of trusted lines, with the per-line integrity check.
    pub fn subtotal(&self, items: &[LineItem]) -> Result<Money, PricingError> {
        verified_subtotal(items)
    }

    pub fn quote_shipping(
        &self,
        method: ShippingMethod,
        address: &Address,
        subtotal: Money,
    ) -> Result<ShippingQuote, PricingError> {
        self.config.shipping.quote(method, address, subtotal)
    }

    /// Computes the full breakdown.
    pub fn compute(
        &self,
        items: &[LineItem],
        method: ShippingMethod,
        address: &Address,
        coupon: Option<&DiscountRule>,
    ) -> Result<PriceBreakdown, PricingError> {
        if items.is_empty() {
            return Err(PricingError::NoItems);
        }
        let subtotal = verified_subtotal(items)?;
        let item_discount = items.iter().map(LineItem::item_discount).sum();
        let coupon_discount = coupon
            .map(|rule| rule.discount_for(subtotal))
            .unwrap_or_default();
        let shipping_cost = self.quote_shipping(method, address, subtotal)?.cost;
        let tax = subtotal.apply_rate(self.config.tax.rate_for(address));

        let mut breakdown = PriceBreakdown {
            subtotal,
            item_discount,
            coupon_discount,
            shipping_cost,
            tax,
            total: Money::zero(),
        };
        breakdown.total = breakdown.expected_total();
        breakdown.verify(items)?;
        Ok(breakdown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::fixtures::dhaka;
    use crate::catalog::Product;

    fn shirt_line(quantity: u32) -> LineItem {
        let product = Product::new("Shirt", Money::from_major(100), 10)
            .with_discount_price(Money::from_major(80));
        LineItem::from_catalog(&product, None, quantity).unwrap()
    }

    fn abroad() -> Address {
        let mut address = dhaka();
        address.country = "DE".to_string();
        address.state = None;
        address
    }

    #[test]
    fn happy_path_breakdown() {
        let engine = PricingEngine::default();
        let breakdown = engine
            .compute(&[shirt_line(2)], ShippingMethod::Standard, &dhaka(), None)
            .unwrap();

        assert_eq!(breakdown.subtotal, Money::from_major(160));
        assert_eq!(breakdown.item_discount, Money::from_major(40));
        assert_eq!(breakdown.coupon_discount, Money::zero());
        assert_eq!(breakdown.shipping_cost, Money::from_major(50));
        assert_eq!(breakdown.tax, Money::from_major(8));
        assert_eq!(breakdown.total, Money::from_major(218));
    }

    #[test]
    fn pricing_is_deterministic() {
        let engine = PricingEngine::default();
        let items = [shirt_line(3)];
        let rule = DiscountRule::Percent {
            percent: 15,
            max_discount: None,
        };
        let a = engine
            .compute(&items, ShippingMethod::Express, &dhaka(), Some(&rule))
            .unwrap();
        let b = engine
            .compute(&items, ShippingMethod::Express, &dhaka(), Some(&rule))
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn coupon_over_cap_is_limited() {
        let product = Product::new("Lamp", Money::from_major(1000), 5);
        let items = [LineItem::from_catalog(&product, None, 1).unwrap()];
        let rule = DiscountRule::Percent {
            percent: 50,
            max_discount: Some(Money::from_major(100)),
        };
        let breakdown = PricingEngine::default()
            .compute(&items, ShippingMethod::Standard, &dhaka(), Some(&rule))
            .unwrap();

        assert_eq!(breakdown.coupon_discount, Money::from_major(100));
        // 1000 - 100 + free shipping + 50 tax
        assert_eq!(breakdown.shipping_cost, Money::zero());
        assert_eq!(breakdown.total, Money::from_major(950));
    }

    #[test]
    fn total_is_never_negative() {
        let product = Product::new("Sticker", Money::from_major(10), 5);
        let items = [LineItem::from_catalog(&product, None, 1).unwrap()];
        let rule = DiscountRule::Flat {
            amount: Money::from_major(10_000),
        };
        let breakdown = PricingEngine::default()
            .compute(&items, ShippingMethod::Pickup, &dhaka(), Some(&rule))
            .unwrap();

        assert_eq!(breakdown.coupon_discount, breakdown.subtotal);
        assert!(!breakdown.total.is_negative());
    }

    #[test]
    fn free_standard_shipping_at_threshold() {
        let table = ShippingTable::default();
        let quote = table
            .quote(ShippingMethod::Standard, &dhaka(), Money::from_major(1000))
            .unwrap();
        assert!(quote.cost.is_zero());
        let quote = table
            .quote(ShippingMethod::Standard, &dhaka(), Money::from_cents(99_999))
            .unwrap();
        assert_eq!(quote.cost, Money::from_major(50));
    }

    #[test]
    fn express_discount_above_threshold() {
        let table = ShippingTable::default();
        let normal = table
            .quote(ShippingMethod::Express, &abroad(), Money::from_major(100))
            .unwrap();
        let discounted = table
            .quote(ShippingMethod::Express, &abroad(), Money::from_major(5000))
            .unwrap();
        assert_eq!(normal.cost, Money::from_major(2500));
        assert_eq!(discounted.cost, Money::from_major(1800));
        assert_eq!(discounted.destination, Destination::International);
    }

    #[test]
    fn pickup_is_domestic_only() {
        let err = ShippingTable::default()
            .quote(ShippingMethod::Pickup, &abroad(), Money::from_major(10))
            .unwrap_err();
        assert!(matches!(err, PricingError::ShippingUnavailable { .. }));
    }

    #[test]
    fn tax_falls_back_to_country_default() {
        let table = TaxTable::default();
        let mut address = dhaka();
        address.state = Some("Unknown Division".to_string());
        assert_eq!(table.rate_for(&address), Rate::from_percent(5));
        assert_eq!(table.rate_for(&abroad()), Rate::zero());
    }

    #[test]
    fn tampered_line_total_is_an_integrity_error() {
        let mut line = shirt_line(2);
        line.line_total = Money::from_major(1);
        let err = PricingEngine::default()
            .compute(&[line], ShippingMethod::Standard, &dhaka(), None)
            .unwrap_err();
        assert!(matches!(err, PricingError::Integrity(_)));
    }

    #[test]
    fn tampered_effective_price_is_an_integrity_error() {
        let mut line = shirt_line(1);
        line.effective_unit_price = Money::from_major(150);
        line.line_total = Money::from_major(150);
        assert!(matches!(
            PricingEngine::default().subtotal(&[line]),
            Err(PricingError::Integrity(_))
        ));
    }

    #[test]
    fn verify_detects_edited_total() {
        let items = [shirt_line(2)];
        let mut breakdown = PricingEngine::default()
            .compute(&items, ShippingMethod::Standard, &dhaka(), None)
            .unwrap();
        breakdown.total = Money::from_major(1);
        assert!(breakdown.verify(&items).is_err());
    }

    #[test]
    fn empty_order_cannot_be_priced() {
        assert_eq!(
            PricingEngine::default().compute(&[], ShippingMethod::Standard, &dhaka(), None),
            Err(PricingError::NoItems)
        );
    }

    #[test]
    fn shipping_method_parses_case_insensitively() {
        assert_eq!("Express".parse::<ShippingMethod>(), Ok(ShippingMethod::Express));
        assert!("drone".parse::<ShippingMethod>().is_err());
    }
}
