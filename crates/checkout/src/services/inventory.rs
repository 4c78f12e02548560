//! Stock reservation against the catalog store.

use common::{ProductId, VariantId};
use domain::{Availability, LineItem, Product};
use store::{CatalogStore, StockDecrement, StoreError};

use crate::error::{CheckoutError, Result};

/// One decrement that has been applied to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservedLine {
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub quantity: u32,
}

/// The decrements applied by one placement, in the order they were taken.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reservation {
    lines: Vec<ReservedLine>,
}

impl Reservation {
    pub fn lines(&self) -> &[ReservedLine] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn units(&self) -> u32 {
        self.lines.iter().map(|l| l.quantity).sum()
    }
}

/// Display name used in stock errors, e.g. `Kurta (XL)`.
fn display_name(name: &str, variant_name: Option<&str>) -> String {
    match variant_name {
        Some(variant) => format!("{name} ({variant})"),
        None => name.to_string(),
    }
}

fn shortfall(
    product_id: ProductId,
    variant_id: Option<VariantId>,
    product: String,
    available: u32,
    requested: u32,
) -> CheckoutError {
    if available == 0 {
        CheckoutError::OutOfStock {
            product_id,
            variant_id,
            product,
            requested,
        }
    } else {
        CheckoutError::InsufficientStock {
            product_id,
            variant_id,
            product,
            available,
            requested,
        }
    }
}

/// Checks a selection against a loaded product without touching stock.
pub fn check_availability(
    product: &Product,
    variant_id: Option<VariantId>,
    requested: u32,
) -> Result<()> {
    let unavailable = || CheckoutError::ProductUnavailable {
        product_id: product.id,
    };
    if !product.is_available(variant_id) {
        return Err(unavailable());
    }
    let record = product.stock_record(variant_id).ok_or_else(unavailable)?;
    let name = || {
        display_name(
            &product.name,
            variant_id
                .and_then(|id| product.variant(id))
                .map(|v| v.name.as_str()),
        )
    };
    match record.availability(requested) {
        Availability::Untracked | Availability::InStock { .. } => Ok(()),
        Availability::OutOfStock => Err(shortfall(product.id, variant_id, name(), 0, requested)),
        Availability::Insufficient { available } => Err(shortfall(
            product.id,
            variant_id,
            name(),
            available,
            requested,
        )),
    }
}

/// Reserves and releases stock through the store's atomic conditional decrement.
#[derive(Debug, Clone)]
pub struct InventoryReservor<S> {
    store: S,
}

impl<S: CatalogStore> InventoryReservor<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Decrements stock for every line, recording each applied decrement.
    ///
    /// If any line cannot be reserved, the lines already taken are put back
    /// before the error is returned, leaving `reservation` empty.
    #[tracing::instrument(skip(self, items, reservation), fields(lines = items.len()))]
    pub async fn reserve(&self, items: &[LineItem], reservation: &mut Reservation) -> Result<()> {
        for item in items {
            let outcome = self
                .store
                .try_decrement_stock(item.product_id(), item.variant_id(), item.quantity())
                .await;

            let failure = match outcome {
                Ok(StockDecrement::Applied { remaining }) => {
                    tracing::debug!(product_id = %item.product_id(), remaining, "stock reserved");
                    reservation.lines.push(ReservedLine {
                        product_id: item.product_id(),
                        variant_id: item.variant_id(),
                        quantity: item.quantity(),
                    });
                    continue;
                }
                Ok(StockDecrement::Insufficient { available }) => {
                    let snapshot = item.product();
                    shortfall(
                        item.product_id(),
                        item.variant_id(),
                        display_name(&snapshot.name, snapshot.variant_name.as_deref()),
                        available,
                        item.quantity(),
                    )
                }
                Err(StoreError::NotFound { .. }) => CheckoutError::ProductUnavailable {
                    product_id: item.product_id(),
                },
                Err(e) => e.into(),
            };

            if let Err(e) = self.release(reservation).await {
                tracing::error!(error = %e, "failed to roll back partial reservation");
            }
            return Err(failure);
        }
        Ok(())
    }

    /// Puts every reserved line back, newest first.
    ///
    /// Every line is attempted; lines that fail stay in the reservation and
    /// the first error is returned.
    #[tracing::instrument(skip(self, reservation), fields(lines = reservation.lines.len()))]
    pub async fn release(&self, reservation: &mut Reservation) -> Result<()> {
        let mut first_error = None;
        let mut kept = Vec::new();
        while let Some(line) = reservation.lines.pop() {
            if let Err(e) = self
                .store
                .restock(line.product_id, line.variant_id, line.quantity)
                .await
            {
                tracing::error!(product_id = %line.product_id, error = %e, "restock failed");
                kept.push(line);
                first_error.get_or_insert(e);
            }
        }
        kept.reverse();
        reservation.lines = kept;
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Returns the units of delivered or cancelled lines to stock.
    #[tracing::instrument(skip(self, items), fields(lines = items.len()))]
    pub async fn restock_items(&self, items: &[LineItem]) -> Result<()> {
        let mut reservation = Reservation {
            lines: items
                .iter()
                .map(|item| ReservedLine {
                    product_id: item.product_id(),
                    variant_id: item.variant_id(),
                    quantity: item.quantity(),
                })
                .collect(),
        };
        self.release(&mut reservation).await
    }
}

#[cfg(test)]
mod tests {
    use domain::{Money, Variant};
    use store::InMemoryStore;

    use super::*;

    async fn stocked(store: &InMemoryStore, name: &str, stock: u32) -> Product {
        let product = Product::new(name, Money::from_major(10), stock);
        store.save_product(&product).await.unwrap();
        product
    }

    fn line(product: &Product, quantity: u32) -> LineItem {
        LineItem::from_catalog(product, None, quantity).unwrap()
    }

    #[tokio::test]
    async fn test_reserve_and_release() {
        let store = InMemoryStore::new();
        let tea = stocked(&store, "Tea", 5).await;
        let reservor = InventoryReservor::new(store.clone());

        let mut reservation = Reservation::default();
        reservor
            .reserve(&[line(&tea, 2)], &mut reservation)
            .await
            .unwrap();
        assert_eq!(reservation.units(), 2);
        assert_eq!(store.stock_level(tea.id, None).await, Some(3));

        reservor.release(&mut reservation).await.unwrap();
        assert!(reservation.is_empty());
        assert_eq!(store.stock_level(tea.id, None).await, Some(5));
    }

    #[tokio::test]
    async fn test_partial_failure_rolls_back() {
        let store = InMemoryStore::new();
        let tea = stocked(&store, "Tea", 5).await;
        let mug = stocked(&store, "Mug", 3).await;
        let reservor = InventoryReservor::new(store.clone());

        let mut reservation = Reservation::default();
        let err = reservor
            .reserve(&[line(&tea, 2), line(&mug, 10)], &mut reservation)
            .await
            .unwrap_err();

        match err {
            CheckoutError::InsufficientStock {
                product_id,
                variant_id,
                product,
                available,
                requested,
            } => {
                assert_eq!(product_id, mug.id);
                assert_eq!(variant_id, None);
                assert_eq!(product, "Mug");
                assert_eq!(available, 3);
                assert_eq!(requested, 10);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(reservation.is_empty());
        assert_eq!(store.stock_level(tea.id, None).await, Some(5));
        assert_eq!(store.stock_level(mug.id, None).await, Some(3));
    }

    #[tokio::test]
    async fn test_zero_stock_is_out_of_stock() {
        let store = InMemoryStore::new();
        let tea = stocked(&store, "Tea", 0).await;
        let reservor = InventoryReservor::new(store);

        let err = reservor
            .reserve(&[line(&tea, 1)], &mut Reservation::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CheckoutError::OutOfStock { product_id, product, requested: 1, .. }
                if product_id == tea.id && product == "Tea"
        ));
    }

    #[tokio::test]
    async fn test_missing_product_is_unavailable() {
        let store = InMemoryStore::new();
        let ghost = Product::new("Ghost", Money::from_major(1), 1);
        let reservor = InventoryReservor::new(store);

        let err = reservor
            .reserve(&[line(&ghost, 1)], &mut Reservation::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CheckoutError::ProductUnavailable { product_id } if product_id == ghost.id
        ));
    }

    #[tokio::test]
    async fn test_restock_items() {
        let store = InMemoryStore::new();
        let tea = stocked(&store, "Tea", 1).await;
        let reservor = InventoryReservor::new(store.clone());

        reservor.restock_items(&[line(&tea, 4)]).await.unwrap();
        assert_eq!(store.stock_level(tea.id, None).await, Some(5));
    }

    #[test]
    fn test_check_availability() {
        let mut product = Product::new("Kurta", Money::from_major(900), 2);
        let xl = product.add_variant(Variant::new("XL", 0));

        assert!(check_availability(&product, None, 2).is_ok());
        assert!(matches!(
            check_availability(&product, None, 3),
            Err(CheckoutError::InsufficientStock { available: 2, requested: 3, .. })
        ));
        assert!(matches!(
            check_availability(&product, Some(xl), 1),
            Err(CheckoutError::OutOfStock { variant_id: Some(v), product, .. })
                if v == xl && product == "Kurta (XL)"
        ));
        assert!(matches!(
            check_availability(&product, Some(VariantId::new()), 1),
            Err(CheckoutError::ProductUnavailable { .. })
        ));

        product.is_active = false;
        assert!(matches!(
            check_availability(&product, None, 1),
            Err(CheckoutError::ProductUnavailable { .. })
        ));
    }
}
