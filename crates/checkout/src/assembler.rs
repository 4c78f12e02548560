//! Order placement: resolves, prices, reserves, and persists an order as a
//! sequence of steps, undoing the side effects of completed steps when a
//! later one fails.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use common::UserId;
use domain::{
    Availability, CartLine, DiscountRule, LineItem, Money, NewOrder, Order, OrderNumber,
    PricingEngine, ValidationErrors, merge_lines,
};
use serde::Serialize;
use store::{CommerceStore, StoreError};

use crate::config::CheckoutConfig;
use crate::error::{CheckoutError, Result};
use crate::request::{PlaceOrder, validate_indexed_lines};
use crate::services::{
    AppliedCoupon, CouponRedeemer, InventoryReservor, NotificationSender, check_availability,
};
use crate::state::Placement;
use crate::steps::{
    SAGA_TYPE, STEP_COMPUTE_PRICING, STEP_CONVERT_CART, STEP_NOTIFY, STEP_PERSIST_ORDER,
    STEP_REDEEM_COUPON, STEP_RESERVE_INVENTORY, STEP_RESOLVE_ITEMS, STEP_VALIDATE_COUPON,
};

/// Source of order numbers.
pub trait OrderNumberGenerator: Send + Sync {
    fn generate(&self, at: DateTime<Utc>) -> OrderNumber;
}

impl<F> OrderNumberGenerator for F
where
    F: Fn(DateTime<Utc>) -> OrderNumber + Send + Sync,
{
    fn generate(&self, at: DateTime<Utc>) -> OrderNumber {
        self(at)
    }
}

/// Result of a placement.
#[derive(Debug, Clone)]
pub struct Placed {
    pub order: Order,
    /// False when the request token had already produced this order.
    pub created: bool,
}

/// Why a cart line was dropped during cart validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalReason {
    Unavailable,
    OutOfStock,
    InvalidQuantity,
}

/// A change made to a cart line during cart validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CartAdjustment {
    Removed {
        product_id: common::ProductId,
        variant_id: Option<common::VariantId>,
        reason: RemovalReason,
    },
    Clamped {
        product_id: common::ProductId,
        variant_id: Option<common::VariantId>,
        requested: u32,
        quantity: u32,
    },
}

/// The cart after validation against the catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CartValidation {
    pub items: Vec<CartLine>,
    pub adjustments: Vec<CartAdjustment>,
    pub subtotal: Money,
}

/// The discount a coupon would grant, without consuming a use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CouponPreview {
    pub code: String,
    pub rule: DiscountRule,
    pub subtotal: Money,
    pub discount: Money,
}

/// Merged lines with the index of the first client line behind each.
struct RequestedLines {
    lines: Vec<CartLine>,
    origins: Vec<usize>,
    from_cart: bool,
}

impl RequestedLines {
    fn merge(raw: &[CartLine], from_cart: bool) -> Self {
        let lines = merge_lines(raw);
        let origins = lines
            .iter()
            .map(|merged| {
                raw.iter()
                    .position(|l| {
                        l.product_id == merged.product_id && l.variant_id == merged.variant_id
                    })
                    .unwrap_or_default()
            })
            .collect();
        Self {
            lines,
            origins,
            from_cart,
        }
    }
}

enum Persisted {
    Created(Order),
    /// Another placement with the same request token won the insert.
    Replayed(Order),
}

/// Assembles and persists orders.
///
/// Prices always come from the catalog. Stock and coupon usage are consumed
/// through the store's conditional writes, and are given back if the order
/// cannot be persisted.
pub struct OrderAssembler<S, N> {
    store: S,
    inventory: InventoryReservor<S>,
    coupons: CouponRedeemer<S>,
    pricing: PricingEngine,
    notifier: Arc<N>,
    numbers: Arc<dyn OrderNumberGenerator>,
    config: CheckoutConfig,
}

impl<S, N> OrderAssembler<S, N>
where
    S: CommerceStore + Clone + 'static,
    N: NotificationSender + 'static,
{
    pub fn new(store: S, notifier: N, config: CheckoutConfig) -> Self {
        Self {
            inventory: InventoryReservor::new(store.clone()),
            coupons: CouponRedeemer::new(store.clone()),
            pricing: PricingEngine::new(config.pricing.clone()),
            store,
            notifier: Arc::new(notifier),
            numbers: Arc::new(OrderNumber::generate),
            config,
        }
    }

    /// Replaces the order number source.
    pub fn with_order_numbers(mut self, numbers: impl OrderNumberGenerator + 'static) -> Self {
        self.numbers = Arc::new(numbers);
        self
    }

    pub fn config(&self) -> &CheckoutConfig {
        &self.config
    }

    /// Places an order.
    ///
    /// A request whose token already produced an order returns that order
    /// with `created == false` and no side effects.
    #[tracing::instrument(
        skip(self, request),
        fields(saga_type = SAGA_TYPE, guest = request.customer.user_id().is_none())
    )]
    pub async fn place_order(&self, request: PlaceOrder) -> Result<Placed> {
        let started = Instant::now();
        let result = self.run_placement(request).await;
        let duration = started.elapsed().as_secs_f64();
        metrics::histogram!("order_placement_duration_seconds").record(duration);

        match &result {
            Ok(placed) if placed.created => {
                metrics::counter!("orders_placed_total").increment(1);
                tracing::info!(
                    order_number = %placed.order.order_number(),
                    total = %placed.order.total(),
                    duration,
                    "order placed"
                );
            }
            Ok(placed) => {
                tracing::info!(
                    order_number = %placed.order.order_number(),
                    "request token replayed, returning existing order"
                );
            }
            Err(e) => {
                metrics::counter!("order_placement_failures_total", "reason" => e.reason())
                    .increment(1);
                if matches!(e, CheckoutError::PriceIntegrity(_) | CheckoutError::Store(_)) {
                    tracing::error!(error = %e, "order placement failed");
                } else {
                    tracing::warn!(error = %e, "order placement rejected");
                }
            }
        }
        result
    }

    async fn run_placement(&self, request: PlaceOrder) -> Result<Placed> {
        request.validate(self.config.max_line_quantity)?;

        let request_token = request.scoped_request_token();
        if let Some(token) = &request_token
            && let Some(order) = self.store.find_by_request_token(token).await?
        {
            return Ok(Placed {
                order,
                created: false,
            });
        }

        let user_id = request.customer.user_id();
        let requested = self
            .requested_lines(request.items.as_deref(), user_id)
            .await?;
        let now = Utc::now();

        let mut placement = Placement::new();
        placement.start();

        // Step 1: Resolve items from the catalog
        let items = match self
            .step(STEP_RESOLVE_ITEMS, self.resolve_items(&requested))
            .await
        {
            Ok(items) => items,
            Err(e) => return Err(self.abort(&mut placement, STEP_RESOLVE_ITEMS, e).await),
        };
        placement.step_completed(STEP_RESOLVE_ITEMS);

        // Step 2: Validate the coupon without consuming it
        let applied = match request.coupon_code() {
            Some(code) => {
                let validated = match self.pricing.subtotal(&items) {
                    Ok(subtotal) => {
                        self.step(
                            STEP_VALIDATE_COUPON,
                            self.coupons.validate(code, subtotal, user_id, now),
                        )
                        .await
                    }
                    Err(e) => Err(e.into()),
                };
                match validated {
                    Ok(applied) => Some(applied),
                    Err(e) => {
                        return Err(self.abort(&mut placement, STEP_VALIDATE_COUPON, e).await);
                    }
                }
            }
            None => None,
        };
        placement.step_completed(STEP_VALIDATE_COUPON);

        // Step 3: Price
        tracing::info!(step = STEP_COMPUTE_PRICING, "saga step started");
        let method = request.shipping_method;
        let address = &request.shipping_address;
        let rule = applied.as_ref().map(|a| &a.coupon.rule);
        let priced = self
            .pricing
            .compute(&items, method, address, rule)
            .and_then(|pricing| {
                let quote = self.pricing.quote_shipping(method, address, pricing.subtotal)?;
                Ok((pricing, quote))
            });
        let (pricing, quote) = match priced {
            Ok(priced) => priced,
            Err(e) => {
                return Err(self
                    .abort(&mut placement, STEP_COMPUTE_PRICING, e.into())
                    .await);
            }
        };
        placement.step_completed(STEP_COMPUTE_PRICING);

        // Step 4: Reserve inventory
        let reserved = self
            .step(
                STEP_RESERVE_INVENTORY,
                self.inventory.reserve(&items, placement.reservation_mut()),
            )
            .await;
        if let Err(e) = reserved {
            return Err(self.abort(&mut placement, STEP_RESERVE_INVENTORY, e).await);
        }
        placement.step_completed(STEP_RESERVE_INVENTORY);

        // Step 5: Redeem the coupon
        if let Some(applied) = &applied {
            match self
                .step(STEP_REDEEM_COUPON, self.coupons.redeem(applied))
                .await
            {
                Ok(()) => placement.coupon_redeemed(applied.coupon.id),
                Err(e) => {
                    // A timed out increment may still have been applied.
                    if matches!(e, CheckoutError::Timeout { .. }) {
                        placement.coupon_redeemed(applied.coupon.id);
                    }
                    return Err(self.abort(&mut placement, STEP_REDEEM_COUPON, e).await);
                }
            }
        }
        placement.step_completed(STEP_REDEEM_COUPON);

        // Step 6: Persist the order
        let new_order = NewOrder {
            request_token,
            customer: request.customer,
            items,
            shipping_address: request.shipping_address,
            billing: request.billing,
            payment_method: request.payment_method,
            pricing,
            coupon: applied.as_ref().map(AppliedCoupon::snapshot),
            shipping: quote,
            notes: request.notes,
        };
        let order = match self.persist(new_order, now).await {
            Ok(Persisted::Created(order)) => order,
            Ok(Persisted::Replayed(order)) => {
                self.compensate(
                    &mut placement,
                    STEP_PERSIST_ORDER,
                    "request token already used".to_string(),
                )
                .await;
                return Ok(Placed {
                    order,
                    created: false,
                });
            }
            Err(e) => return Err(self.abort(&mut placement, STEP_PERSIST_ORDER, e).await),
        };
        placement.step_completed(STEP_PERSIST_ORDER);
        placement.complete();

        // Step 7: Convert the cart
        if requested.from_cart && let Some(user_id) = user_id {
            let converted = self
                .step(STEP_CONVERT_CART, async {
                    self.store
                        .convert_cart(user_id)
                        .await
                        .map_err(CheckoutError::from)
                })
                .await;
            if let Err(e) = converted {
                tracing::warn!(%user_id, error = %e, "failed to convert cart after placement");
            }
        }

        // Step 8: Notify
        self.notify(&order);

        Ok(Placed {
            order,
            created: true,
        })
    }

    /// Runs one step under the configured timeout.
    async fn step<T, F>(&self, step: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tracing::info!(step, "saga step started");
        match tokio::time::timeout(self.config.step_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    step,
                    timeout_ms = self.config.step_timeout.as_millis() as u64,
                    "saga step timed out"
                );
                Err(CheckoutError::Timeout { step })
            }
        }
    }

    /// Records the failure, undoes completed side effects, and hands the
    /// error back.
    async fn abort(
        &self,
        placement: &mut Placement,
        step: &'static str,
        error: CheckoutError,
    ) -> CheckoutError {
        self.compensate(placement, step, error.to_string()).await;
        error
    }

    /// Undoes side-effecting steps in reverse order of completion.
    ///
    /// Failures here are logged and counted; they never replace the error
    /// that triggered compensation.
    #[tracing::instrument(skip(self, placement, reason))]
    async fn compensate(&self, placement: &mut Placement, step: &'static str, reason: String) {
        placement.step_failed(step, reason);
        let to_undo = placement.steps_to_compensate();
        if !to_undo.is_empty() {
            metrics::counter!("saga_compensations_total").increment(1);
        }

        for completed in to_undo {
            let outcome = match completed {
                STEP_REDEEM_COUPON => match placement.redeemed_coupon() {
                    Some(coupon_id) => self.coupons.release(coupon_id).await,
                    None => Ok(()),
                },
                STEP_RESERVE_INVENTORY => {
                    self.inventory.release(placement.reservation_mut()).await
                }
                _ => Ok(()),
            };
            match outcome {
                Ok(()) => tracing::info!(step = completed, "compensation step completed"),
                Err(e) => {
                    metrics::counter!("saga_compensation_failures_total", "step" => completed)
                        .increment(1);
                    tracing::error!(step = completed, error = %e, "compensation step failed");
                }
            }
        }

        placement.fail();
        tracing::warn!(
            failed_step = step,
            reason = placement.failure_reason().unwrap_or("unknown"),
            "placement failed"
        );
    }

    /// Inserts the order, regenerating the order number on collision.
    async fn persist(&self, new_order: NewOrder, now: DateTime<Utc>) -> Result<Persisted> {
        let attempts = self.config.max_order_number_attempts.max(1);
        for attempt in 1..=attempts {
            let mut order = Order::place(new_order.clone(), self.numbers.generate(now), now)?;

            let inserted = self
                .step(STEP_PERSIST_ORDER, async {
                    self.store
                        .insert_order(&order)
                        .await
                        .map_err(CheckoutError::from)
                })
                .await;

            match inserted {
                Ok(version) => {
                    order.set_version(version);
                    return Ok(Persisted::Created(order));
                }
                Err(CheckoutError::Store(StoreError::DuplicateOrderNumber(number))) => {
                    tracing::warn!(%number, attempt, "order number taken, regenerating");
                }
                Err(CheckoutError::Store(StoreError::DuplicateRequestToken(token))) => {
                    return match self.store.find_by_request_token(&token).await? {
                        Some(existing) => Ok(Persisted::Replayed(existing)),
                        None => Err(StoreError::DuplicateRequestToken(token).into()),
                    };
                }
                Err(CheckoutError::Timeout { step }) => {
                    return match self.find_timed_out_insert(&order).await? {
                        Some(stored) => Ok(Persisted::Created(stored)),
                        None => Err(CheckoutError::Timeout { step }),
                    };
                }
                Err(e) => return Err(e),
            }
        }
        Err(CheckoutError::DuplicateOrderNumber { attempts })
    }

    /// Looks for an order whose insert timed out on our side but may still
    /// commit on the store's side.
    async fn find_timed_out_insert(&self, order: &Order) -> Result<Option<Order>> {
        let rechecks = self.config.persist_rechecks.max(1);
        for recheck in 1..=rechecks {
            if let Some(stored) = self
                .store
                .find_by_order_number(order.order_number())
                .await?
                && stored.id() == order.id()
            {
                tracing::info!(
                    order_number = %order.order_number(),
                    recheck,
                    "timed out insert found committed"
                );
                return Ok(Some(stored));
            }
            if recheck < rechecks {
                tokio::time::sleep(self.config.persist_recheck_interval).await;
            }
        }
        Ok(None)
    }

    fn notify(&self, order: &Order) {
        tracing::info!(step = STEP_NOTIFY, "saga step started");
        let notifier = Arc::clone(&self.notifier);
        let order = order.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.send_order_confirmation(&order).await {
                metrics::counter!("notification_failures_total").increment(1);
                tracing::warn!(
                    order_number = %order.order_number(),
                    error = %e,
                    "order confirmation failed"
                );
            }
        });
    }

    /// The lines to check out: explicit lines, or the registered customer's cart.
    async fn requested_lines(
        &self,
        items: Option<&[CartLine]>,
        user_id: Option<UserId>,
    ) -> Result<RequestedLines> {
        let (raw, from_cart) = match (items, user_id) {
            (Some(items), _) => (items.to_vec(), false),
            (None, Some(user_id)) => {
                let cart = self
                    .store
                    .get_cart(user_id)
                    .await?
                    .filter(|cart| !cart.is_empty())
                    .ok_or(CheckoutError::EmptyCart)?;
                (cart.items, true)
            }
            (None, None) => {
                return Err(
                    ValidationErrors::single("items", "is required for guest checkout").into(),
                );
            }
        };

        let requested = RequestedLines::merge(&raw, from_cart);
        let mut errors = ValidationErrors::new();
        validate_indexed_lines(
            &requested.lines,
            requested.origins.iter().copied(),
            self.config.max_line_quantity,
            &mut errors,
        );
        errors.into_result()?;
        Ok(requested)
    }

    /// Re-prices every line from the catalog and checks availability.
    async fn resolve_items(&self, requested: &RequestedLines) -> Result<Vec<LineItem>> {
        let mut items = Vec::with_capacity(requested.lines.len());
        let mut errors = ValidationErrors::new();

        for (line, i) in requested.lines.iter().zip(&requested.origins) {
            let unavailable = CheckoutError::ProductUnavailable {
                product_id: line.product_id,
            };
            let Some(product) = self.store.get_product(line.product_id).await? else {
                return Err(unavailable);
            };
            if product.has_variants() && line.variant_id.is_none() {
                errors.push(format!("items[{i}].variant_id"), "is required for this product");
                continue;
            }
            check_availability(&product, line.variant_id, line.quantity)?;
            let item = LineItem::from_catalog(&product, line.variant_id, line.quantity)
                .ok_or(unavailable)?;
            items.push(item);
        }

        errors.into_result()?;
        Ok(items)
    }

    /// Re-checks the customer's cart against the catalog.
    ///
    /// Unavailable lines are removed, lines above the stock on hand are
    /// clamped, and the adjusted cart is saved.
    #[tracing::instrument(skip(self))]
    pub async fn validate_cart(&self, user_id: UserId) -> Result<CartValidation> {
        let Some(mut cart) = self.store.get_cart(user_id).await? else {
            return Ok(CartValidation::default());
        };

        let mut kept = Vec::with_capacity(cart.items.len());
        let mut items = Vec::with_capacity(cart.items.len());
        let mut adjustments = Vec::new();

        for line in merge_lines(&cart.items) {
            let removed = |reason| CartAdjustment::Removed {
                product_id: line.product_id,
                variant_id: line.variant_id,
                reason,
            };
            if line.quantity == 0 {
                adjustments.push(removed(RemovalReason::InvalidQuantity));
                continue;
            }
            let product = self
                .store
                .get_product(line.product_id)
                .await?
                .filter(|p| p.is_available(line.variant_id))
                .filter(|p| !p.has_variants() || line.variant_id.is_some());
            let Some((product, record)) = product
                .as_ref()
                .and_then(|p| p.stock_record(line.variant_id).map(|r| (p, r)))
            else {
                adjustments.push(removed(RemovalReason::Unavailable));
                continue;
            };

            let mut quantity = line.quantity.min(self.config.max_line_quantity);
            match record.availability(quantity) {
                Availability::OutOfStock => {
                    adjustments.push(removed(RemovalReason::OutOfStock));
                    continue;
                }
                Availability::Insufficient { available } => quantity = available,
                Availability::Untracked | Availability::InStock { .. } => {}
            }

            let Some(item) = LineItem::from_catalog(product, line.variant_id, quantity) else {
                adjustments.push(removed(RemovalReason::Unavailable));
                continue;
            };
            if quantity != line.quantity {
                adjustments.push(CartAdjustment::Clamped {
                    product_id: line.product_id,
                    variant_id: line.variant_id,
                    requested: line.quantity,
                    quantity,
                });
            }
            items.push(item);
            kept.push(CartLine { quantity, ..line });
        }

        let subtotal = self.pricing.subtotal(&items)?;
        if kept != cart.items {
            cart.items = kept.clone();
            cart.updated_at = Utc::now();
            self.store.save_cart(&cart).await?;
        }
        if !adjustments.is_empty() {
            tracing::info!(adjustments = adjustments.len(), "cart adjusted");
        }

        Ok(CartValidation {
            items: kept,
            adjustments,
            subtotal,
        })
    }

    /// Computes the discount `code` would grant on the given lines, or on the
    /// customer's cart when no lines are given. Usage is not consumed.
    #[tracing::instrument(skip(self, items))]
    pub async fn preview_coupon(
        &self,
        code: &str,
        items: Option<Vec<CartLine>>,
        user_id: Option<UserId>,
    ) -> Result<CouponPreview> {
        let requested = self.requested_lines(items.as_deref(), user_id).await?;
        let items = self.resolve_items(&requested).await?;
        let subtotal = self.pricing.subtotal(&items)?;
        let applied = self
            .coupons
            .validate(code, subtotal, user_id, Utc::now())
            .await?;

        Ok(CouponPreview {
            code: applied.coupon.code,
            rule: applied.coupon.rule,
            subtotal,
            discount: applied.discount,
        })
    }
}
