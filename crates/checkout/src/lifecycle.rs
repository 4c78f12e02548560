//! Status changes after placement.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::UserId;
use domain::{Actor, Order, OrderNumber, OrderStatus, ShippingMethod, TransitionRequest};
use serde::Serialize;
use store::{CatalogStore, OrderStore};

use crate::config::RestockPolicy;
use crate::error::{CheckoutError, Result};
use crate::services::{InventoryReservor, NotificationSender};

/// Who is asking to cancel an order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Requester {
    pub user_id: Option<UserId>,
    /// Contact email given by a guest.
    pub email: Option<String>,
}

impl Requester {
    pub fn user(user_id: UserId) -> Self {
        Self {
            user_id: Some(user_id),
            email: None,
        }
    }

    pub fn guest(email: impl Into<String>) -> Self {
        Self {
            user_id: None,
            email: Some(email.into()),
        }
    }

    /// Registered orders belong to their user; guest orders to whoever knows
    /// the guest email.
    fn owns(&self, order: &Order) -> bool {
        match order.customer().user_id() {
            Some(owner) => self.user_id == Some(owner),
            None => match (order.customer().email(), self.email.as_deref()) {
                (Some(expected), Some(given)) => expected.trim().eq_ignore_ascii_case(given.trim()),
                _ => false,
            },
        }
    }
}

/// One public timeline entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimelineEntry {
    pub status: OrderStatus,
    pub at: DateTime<Utc>,
    pub note: Option<String>,
}

/// What anyone holding an order number may see. No prices or addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackingView {
    pub order_number: OrderNumber,
    pub status: OrderStatus,
    pub shipping_method: ShippingMethod,
    pub placed_at: DateTime<Utc>,
    pub estimated_delivery: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub tracking_number: Option<String>,
    pub carrier: Option<String>,
    pub timeline: Vec<TimelineEntry>,
}

impl From<&Order> for TrackingView {
    fn from(order: &Order) -> Self {
        let shipping = order.shipping();
        Self {
            order_number: order.order_number().clone(),
            status: order.status(),
            shipping_method: shipping.method,
            placed_at: order.placed_at(),
            estimated_delivery: shipping.estimated_delivery,
            delivered_at: order.delivered_at(),
            tracking_number: shipping.tracking_number.clone(),
            carrier: shipping.carrier.clone(),
            timeline: order
                .tracking()
                .iter()
                .map(|entry| TimelineEntry {
                    status: entry.status,
                    at: entry.at,
                    note: entry.note.clone(),
                })
                .collect(),
        }
    }
}

/// Applies status transitions to persisted orders.
///
/// Every change is saved with a version check, so two concurrent transitions
/// of the same order cannot both succeed.
pub struct OrderLifecycle<S, N> {
    store: S,
    inventory: InventoryReservor<S>,
    notifier: Arc<N>,
    restock: RestockPolicy,
}

impl<S, N> OrderLifecycle<S, N>
where
    S: CatalogStore + OrderStore + Clone + 'static,
    N: NotificationSender + 'static,
{
    pub fn new(store: S, notifier: N, restock: RestockPolicy) -> Self {
        Self {
            inventory: InventoryReservor::new(store.clone()),
            store,
            notifier: Arc::new(notifier),
            restock,
        }
    }

    pub async fn get_order(&self, order_number: &OrderNumber) -> Result<Order> {
        self.store
            .find_by_order_number(order_number)
            .await?
            .ok_or_else(|| CheckoutError::OrderNotFound(order_number.to_string()))
    }

    /// Moves an order to another status on behalf of staff.
    #[tracing::instrument(skip(self, request), fields(target = %request.target))]
    pub async fn transition(
        &self,
        order_number: &OrderNumber,
        request: TransitionRequest,
    ) -> Result<Order> {
        let order = self.get_order(order_number).await?;
        self.apply(order, request).await
    }

    /// Cancels an order on behalf of its customer.
    ///
    /// Fails with `Forbidden` unless the requester owns the order, and with
    /// `InvalidTransition` once the order can no longer be cancelled.
    #[tracing::instrument(skip(self, requester, reason))]
    pub async fn cancel_by_customer(
        &self,
        order_number: &OrderNumber,
        requester: &Requester,
        reason: Option<String>,
    ) -> Result<Order> {
        let order = self.get_order(order_number).await?;
        if !requester.owns(&order) {
            return Err(CheckoutError::Forbidden("order belongs to another customer"));
        }

        let mut request = TransitionRequest::new(
            OrderStatus::Cancelled,
            Actor::Customer {
                user_id: requester.user_id,
            },
        );
        request.reason = reason.filter(|r| !r.trim().is_empty());
        self.apply(order, request).await
    }

    /// Public tracking information for an order.
    pub async fn track(&self, order_number: &OrderNumber) -> Result<TrackingView> {
        let order = self.get_order(order_number).await?;
        Ok(TrackingView::from(&order))
    }

    async fn apply(&self, mut order: Order, request: TransitionRequest) -> Result<Order> {
        let effects = order.transition(request, Utc::now())?;
        let version = self.store.save_order(&order).await?;
        order.set_version(version);

        metrics::counter!("order_transitions_total", "to" => effects.to.as_str()).increment(1);
        tracing::info!(
            order_number = %order.order_number(),
            from = %effects.from,
            to = %effects.to,
            refunded = ?effects.refunded,
            "order status changed"
        );

        if effects.releases_inventory
            && self.restock.applies_to(effects.to)
            && let Err(e) = self.inventory.restock_items(order.items()).await
        {
            tracing::error!(
                order_number = %order.order_number(),
                error = %e,
                "failed to restock order lines"
            );
        }

        self.notify(&order);
        Ok(order)
    }

    fn notify(&self, order: &Order) {
        let notifier = Arc::clone(&self.notifier);
        let order = order.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.send_status_update(&order).await {
                metrics::counter!("notification_failures_total").increment(1);
                tracing::warn!(
                    order_number = %order.order_number(),
                    error = %e,
                    "status update notification failed"
                );
            }
        });
    }
}
