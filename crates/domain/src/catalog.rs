//! Catalog documents as seen by the order pipeline.
//!
//! Products are owned by the catalog; the pipeline only reads prices and
//! availability from them and mutates stock through the store's conditional
//! decrement.

use std::collections::BTreeMap;

use common::{ProductId, VariantId};
use serde::{Deserialize, Serialize};

use crate::money::Money;

/// Inventory counter carried by a product or one of its variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRecord {
    /// Units on hand. Never negative.
    pub stock: u32,
    /// When false, quantity checks are bypassed entirely.
    pub track_inventory: bool,
}

/// Outcome of checking a requested quantity against a stock record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    /// Inventory is not tracked for this record.
    Untracked,
    /// Enough units are on hand.
    InStock { available: u32 },
    /// Some units are on hand, but fewer than requested.
    Insufficient { available: u32 },
    /// Nothing is on hand.
    OutOfStock,
}

impl StockRecord {
    pub fn tracked(stock: u32) -> Self {
        Self {
            stock,
            track_inventory: true,
        }
    }

    pub fn untracked() -> Self {
        Self {
            stock: 0,
            track_inventory: false,
        }
    }

    /// Classifies a request for `requested` units.
    pub fn availability(&self, requested: u32) -> Availability {
        if !self.track_inventory {
            Availability::Untracked
        } else if self.stock >= requested {
            Availability::InStock {
                available: self.stock,
            }
        } else if self.stock == 0 {
            Availability::OutOfStock
        } else {
            Availability::Insufficient {
                available: self.stock,
            }
        }
    }

    /// Removes `quantity` units if they are available.
    ///
    /// Returns the remaining stock, or the current stock as the error when the
    /// request cannot be met. Untracked records are never decremented.
    pub fn take(&mut self, quantity: u32) -> Result<u32, u32> {
        if !self.track_inventory {
            return Ok(self.stock);
        }
        if self.stock < quantity {
            return Err(self.stock);
        }
        self.stock -= quantity;
        Ok(self.stock)
    }

    /// Returns `quantity` units to stock.
    pub fn put_back(&mut self, quantity: u32) -> u32 {
        if self.track_inventory {
            self.stock = self.stock.saturating_add(quantity);
        }
        self.stock
    }
}

/// A purchasable variation of a product (size, colour, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub id: VariantId,
    pub name: String,
    #[serde(default)]
    pub sku: Option<String>,
    /// Overrides the product price when present.
    #[serde(default)]
    pub price: Option<Money>,
    #[serde(default)]
    pub discount_price: Option<Money>,
    pub is_active: bool,
    pub inventory: StockRecord,
}

/// A catalog product with its variants keyed by stable id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    pub price: Money,
    #[serde(default)]
    pub discount_price: Option<Money>,
    pub is_active: bool,
    pub inventory: StockRecord,
    #[serde(default)]
    pub variants: BTreeMap<VariantId, Variant>,
}

impl Product {
    /// Creates an active product with tracked stock and no variants.
    pub fn new(name: impl Into<String>, price: Money, stock: u32) -> Self {
        let name = name.into();
        let slug = slugify(&name);
        Self {
            id: ProductId::new(),
            name,
            slug,
            image: None,
            category: None,
            price,
            discount_price: None,
            is_active: true,
            inventory: StockRecord::tracked(stock),
            variants: BTreeMap::new(),
        }
    }

    pub fn with_discount_price(mut self, discount_price: Money) -> Self {
        self.discount_price = Some(discount_price);
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Adds a variant and returns its id.
    pub fn add_variant(&mut self, variant: Variant) -> VariantId {
        let id = variant.id;
        self.variants.insert(id, variant);
        id
    }

    pub fn variant(&self, id: VariantId) -> Option<&Variant> {
        self.variants.get(&id)
    }

    pub fn variant_mut(&mut self, id: VariantId) -> Option<&mut Variant> {
        self.variants.get_mut(&id)
    }

    /// Returns true if the product is sold through variants.
    pub fn has_variants(&self) -> bool {
        !self.variants.is_empty()
    }

    /// Returns true if the product (and the variant, when given) can be sold.
    pub fn is_available(&self, variant_id: Option<VariantId>) -> bool {
        if !self.is_active {
            return false;
        }
        match variant_id {
            Some(id) => self.variant(id).is_some_and(|v| v.is_active),
            None => true,
        }
    }

    /// Returns the stock record that governs the given selection.
    pub fn stock_record(&self, variant_id: Option<VariantId>) -> Option<&StockRecord> {
        match variant_id {
            Some(id) => self.variant(id).map(|v| &v.inventory),
            None => Some(&self.inventory),
        }
    }

    pub fn stock_record_mut(&mut self, variant_id: Option<VariantId>) -> Option<&mut StockRecord> {
        match variant_id {
            Some(id) => self.variant_mut(id).map(|v| &mut v.inventory),
            None => Some(&mut self.inventory),
        }
    }

    /// Returns `(unit_price, unit_discount_price)` for the given selection.
    ///
    /// A variant with its own price carries its own discount; otherwise the
    /// variant inherits the product's discount.
    pub fn unit_prices(&self, variant_id: Option<VariantId>) -> Option<(Money, Option<Money>)> {
        match variant_id {
            None => Some((self.price, self.discount_price)),
            Some(id) => {
                let variant = self.variant(id)?;
                Some(match variant.price {
                    Some(price) => (price, variant.discount_price),
                    None => (
                        self.price,
                        variant.discount_price.or(self.discount_price),
                    ),
                })
            }
        }
    }
}

impl Variant {
    /// Creates an active variant with tracked stock inheriting the product price.
    pub fn new(name: impl Into<String>, stock: u32) -> Self {
        Self {
            id: VariantId::new(),
            name: name.into(),
            sku: None,
            price: None,
            discount_price: None,
            is_active: true,
            inventory: StockRecord::tracked(stock),
        }
    }

    pub fn with_price(mut self, price: Money) -> Self {
        self.price = Some(price);
        self
    }
}

fn slugify(name: &str) -> String {
    name.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(str::to_ascii_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn availability_classification() {
        let record = StockRecord::tracked(3);
        assert_eq!(record.availability(2), Availability::InStock { available: 3 });
        assert_eq!(record.availability(10), Availability::Insufficient { available: 3 });
        assert_eq!(StockRecord::tracked(0).availability(1), Availability::OutOfStock);
        assert_eq!(StockRecord::untracked().availability(1000), Availability::Untracked);
    }

    #[test]
    fn take_is_conditional() {
        let mut record = StockRecord::tracked(5);
        assert_eq!(record.take(3), Ok(2));
        assert_eq!(record.take(3), Err(2));
        assert_eq!(record.stock, 2);
        assert_eq!(record.put_back(3), 5);
    }

    #[test]
    fn untracked_stock_is_never_decremented() {
        let mut record = StockRecord::untracked();
        assert_eq!(record.take(50), Ok(0));
        assert_eq!(record.put_back(50), 0);
    }

    #[test]
    fn variant_price_resolution() {
        let mut product = Product::new("Cotton Shirt", Money::from_major(100), 0)
            .with_discount_price(Money::from_major(80));
        let inherit = product.add_variant(Variant::new("M", 4));
        let own = product.add_variant(Variant::new("XL", 2).with_price(Money::from_major(120)));

        assert_eq!(
            product.unit_prices(Some(inherit)),
            Some((Money::from_major(100), Some(Money::from_major(80))))
        );
        assert_eq!(product.unit_prices(Some(own)), Some((Money::from_major(120), None)));
        assert_eq!(product.unit_prices(Some(VariantId::new())), None);
    }

    #[test]
    fn inactive_variant_is_unavailable() {
        let mut product = Product::new("Mug", Money::from_major(10), 1);
        let mut variant = Variant::new("Blue", 1);
        variant.is_active = false;
        let id = product.add_variant(variant);

        assert!(!product.is_available(Some(id)));
        assert!(product.is_available(None));
        product.is_active = false;
        assert!(!product.is_available(None));
    }

    #[test]
    fn slug_from_name() {
        assert_eq!(
            Product::new("Cotton  Shirt (Blue)", Money::zero(), 0).slug,
            "cotton-shirt-blue"
        );
    }
}
