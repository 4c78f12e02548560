//! Priced order lines.

use common::{ProductId, VariantId};
use serde::{Deserialize, Serialize};

use crate::catalog::Product;
use crate::money::Money;

/// Display data copied from the product at order time.
///
/// Kept on the line so the order still renders after the product changes or
/// is deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub name: String,
    #[serde(default)]
    pub variant_name: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    pub slug: String,
}

/// One priced line of an order.
///
/// Lines are only built from catalog documents (`LineItem::from_catalog`), so
/// every price on a line comes from the source of truth, never from a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub(crate) product_id: ProductId,
    pub(crate) variant_id: Option<VariantId>,
    pub(crate) quantity: u32,
    pub(crate) unit_price: Money,
    pub(crate) unit_discount_price: Option<Money>,
    pub(crate) effective_unit_price: Money,
    pub(crate) line_total: Money,
    pub(crate) product: ProductSnapshot,
}

impl LineItem {
    /// Prices `quantity` units of a product selection from the catalog.
    ///
    /// Returns None if the variant does not belong to the product.
    pub fn from_catalog(
        product: &Product,
        variant_id: Option<VariantId>,
        quantity: u32,
    ) -> Option<Self> {
        let (unit_price, unit_discount_price) = product.unit_prices(variant_id)?;
        let effective_unit_price = effective_price(unit_price, unit_discount_price);
        let variant_name = variant_id
            .and_then(|id| product.variant(id))
            .map(|v| v.name.clone());

        Some(Self {
            product_id: product.id,
            variant_id,
            quantity,
            unit_price,
            unit_discount_price,
            effective_unit_price,
            line_total: effective_unit_price.multiply(quantity),
            product: ProductSnapshot {
                name: product.name.clone(),
                variant_name,
                image: product.image.clone(),
                category: product.category.clone(),
                slug: product.slug.clone(),
            },
        })
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn variant_id(&self) -> Option<VariantId> {
        self.variant_id
    }

    pub fn quantity(&self) -> u32 {
        self.quantity
    }

    pub fn unit_price(&self) -> Money {
        self.unit_price
    }

    pub fn unit_discount_price(&self) -> Option<Money> {
        self.unit_discount_price
    }

    pub fn effective_unit_price(&self) -> Money {
        self.effective_unit_price
    }

    pub fn line_total(&self) -> Money {
        self.line_total
    }

    pub fn product(&self) -> &ProductSnapshot {
        &self.product
    }

    /// Savings from the catalog discount on this line.
    pub fn item_discount(&self) -> Money {
        (self.unit_price - self.effective_unit_price).multiply(self.quantity)
    }
}

/// The discount price wins only when it is a real reduction.
fn effective_price(unit_price: Money, discount_price: Option<Money>) -> Money {
    match discount_price {
        Some(discount) if !discount.is_negative() && discount < unit_price => discount,
        _ => unit_price,
    }
}
