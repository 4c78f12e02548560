//! Persisted shopping cart of an authenticated user.

use chrono::{DateTime, Utc};
use common::{ProductId, UserId, VariantId};
use serde::{Deserialize, Serialize};

/// Whether the cart is still being filled or has become an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CartStatus {
    #[default]
    Active,
    Converted,
}

/// A requested product selection. Carries no price: prices always come from
/// the catalog at checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: ProductId,
    #[serde(default)]
    pub variant_id: Option<VariantId>,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    pub user_id: UserId,
    pub items: Vec<CartLine>,
    #[serde(default)]
    pub status: CartStatus,
    pub updated_at: DateTime<Utc>,
}

impl Cart {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            items: Vec::new(),
            status: CartStatus::Active,
            updated_at: Utc::now(),
        }
    }

    /// Adds a line, merging with an existing line for the same selection.
    pub fn add(&mut self, product_id: ProductId, variant_id: Option<VariantId>, quantity: u32) {
        match self
            .items
            .iter_mut()
            .find(|l| l.product_id == product_id && l.variant_id == variant_id)
        {
            Some(line) => line.quantity = line.quantity.saturating_add(quantity),
            None => self.items.push(CartLine {
                product_id,
                variant_id,
                quantity,
            }),
        }
        self.updated_at = Utc::now();
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Marks the cart converted and empties it.
    pub fn convert(&mut self) {
        self.items.clear();
        self.status = CartStatus::Converted;
        self.updated_at = Utc::now();
    }
}

/// Merges lines that select the same product and variant, keeping first-seen order.
pub fn merge_lines(lines: &[CartLine]) -> Vec<CartLine> {
    let mut merged: Vec<CartLine> = Vec::with_capacity(lines.len());
    for line in lines {
        match merged
            .iter_mut()
            .find(|m| m.product_id == line.product_id && m.variant_id == line.variant_id)
        {
            Some(existing) => existing.quantity = existing.quantity.saturating_add(line.quantity),
            None => merged.push(*line),
        }
    }
    merged
}
