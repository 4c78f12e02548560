//! Order aggregate implementation.

use chrono::{DateTime, Duration, Utc};
use common::{OrderId, UserId, Version};
use serde::{Deserialize, Serialize};

use super::{
    Actor, Customer, OrderError, OrderNumber, OrderStatus, Payment, PaymentMethod,
    PaymentStatus, ShippingDetails, TrackingEntry, TransitionEffects, TransitionRequest,
};
use crate::address::{Address, BillingAddress};
use crate::coupon::CouponSnapshot;
use crate::line_item::LineItem;
use crate::money::Money;
use crate::pricing::{PriceBreakdown, ShippingQuote};

/// Everything needed to place an order, already priced.
#[derive(Debug, Clone)]
pub struct NewOrder {
    /// Idempotency key supplied by the caller, if any.
    pub request_token: Option<String>,
    pub customer: Customer,
    pub items: Vec<LineItem>,
    pub shipping_address: Address,
    pub billing: BillingAddress,
    pub payment_method: PaymentMethod,
    pub pricing: PriceBreakdown,
    pub coupon: Option<CouponSnapshot>,
    pub shipping: ShippingQuote,
    pub notes: Option<String>,
}

/// Order aggregate root.
///
/// Created by [`Order::place`] and afterwards changed only through
/// [`Order::transition`]. Lines and totals are frozen at placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    order_number: OrderNumber,

    /// Current version for optimistic concurrency.
    #[serde(default)]
    version: Version,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    request_token: Option<String>,

    customer: Customer,
    items: Vec<LineItem>,
    shipping_address: Address,
    billing: BillingAddress,
    payment: Payment,
    pricing: PriceBreakdown,
    #[serde(default)]
    coupon: Option<CouponSnapshot>,
    shipping: ShippingDetails,
    status: OrderStatus,
    tracking: Vec<TrackingEntry>,
    #[serde(default)]
    notes: Option<String>,

    placed_at: DateTime<Utc>,
    #[serde(default)]
    confirmed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    shipped_at: Option<DateTime<Utc>>,
    #[serde(default)]
    delivered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    cancelled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    returned_at: Option<DateTime<Utc>>,
    #[serde(default)]
    cancellation_reason: Option<String>,
    #[serde(default)]
    return_reason: Option<String>,
    updated_at: DateTime<Utc>,
}

impl Order {
    /// Builds a pending order from a priced request.
    ///
    /// The breakdown is re-verified against the lines, and the shipping and
    /// coupon figures must match it.
    pub fn place(
        new: NewOrder,
        order_number: OrderNumber,
        now: DateTime<Utc>,
    ) -> Result<Self, OrderError> {
        if new.items.is_empty() {
            return Err(OrderError::NoItems);
        }
        new.pricing.verify(&new.items)?;
        if new.shipping.cost != new.pricing.shipping_cost {
            return Err(OrderError::Inconsistent("shipping cost differs from quote"));
        }
        let applied = new
            .coupon
            .as_ref()
            .map(|c| c.applied_discount)
            .unwrap_or_default();
        if applied != new.pricing.coupon_discount {
            return Err(OrderError::Inconsistent("coupon discount differs from snapshot"));
        }

        let actor = Actor::Customer {
            user_id: new.customer.user_id(),
        };

        Ok(Self {
            id: OrderId::new(),
            order_number,
            version: Version::initial(),
            request_token: new.request_token,
            customer: new.customer,
            items: new.items,
            shipping_address: new.shipping_address,
            billing: new.billing,
            payment: Payment::new(new.payment_method),
            pricing: new.pricing,
            coupon: new.coupon,
            shipping: ShippingDetails {
                method: new.shipping.method,
                cost: new.shipping.cost,
                estimated_delivery: now + Duration::days(i64::from(new.shipping.transit_days)),
                tracking_number: None,
                carrier: None,
                actual_delivery: None,
            },
            status: OrderStatus::Pending,
            tracking: vec![TrackingEntry {
                status: OrderStatus::Pending,
                at: now,
                note: Some("Order placed".to_string()),
                actor,
            }],
            notes: new.notes,
            placed_at: now,
            confirmed_at: None,
            shipped_at: None,
            delivered_at: None,
            cancelled_at: None,
            returned_at: None,
            cancellation_reason: None,
            return_reason: None,
            updated_at: now,
        })
    }

    /// Moves the order to `request.target`, applying that status's side effects.
    ///
    /// On error the order is left untouched.
    pub fn transition(
        &mut self,
        request: TransitionRequest,
        now: DateTime<Utc>,
    ) -> Result<TransitionEffects, OrderError> {
        let from = self.status;
        let to = request.target;
        if !from.can_transition_to(to) {
            return Err(OrderError::InvalidTransition { from, to });
        }

        let mut refunded = None;
        match to {
            OrderStatus::Pending | OrderStatus::Processing | OrderStatus::OutForDelivery => {}
            OrderStatus::Confirmed => self.confirmed_at = Some(now),
            OrderStatus::Shipped => {
                self.shipped_at = Some(now);
                if request.tracking_number.is_some() {
                    self.shipping.tracking_number = request.tracking_number.clone();
                }
                if request.carrier.is_some() {
                    self.shipping.carrier = request.carrier.clone();
                }
            }
            OrderStatus::Delivered => {
                self.delivered_at = Some(now);
                self.shipping.actual_delivery = Some(now);
                if self.payment.method == PaymentMethod::CashOnDelivery {
                    self.payment.complete();
                }
            }
            OrderStatus::Cancelled => {
                self.cancelled_at = Some(now);
                self.cancellation_reason = request.reason.clone();
                if matches!(
                    self.payment.status,
                    PaymentStatus::Completed | PaymentStatus::Processing
                ) {
                    self.payment.refund(self.pricing.total, now);
                    refunded = Some(self.pricing.total);
                }
            }
            OrderStatus::Returned => {
                self.returned_at = Some(now);
                self.return_reason = request.reason.clone();
                self.payment.refund(self.pricing.total, now);
                refunded = Some(self.pricing.total);
            }
        }

        self.tracking.push(TrackingEntry {
            status: to,
            at: now,
            note: request.note.or(request.reason),
            actor: request.actor,
        });
        self.status = to;
        self.updated_at = now;

        Ok(TransitionEffects {
            from,
            to,
            refunded,
            releases_inventory: to.releases_inventory(),
        })
    }

    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn order_number(&self) -> &OrderNumber {
        &self.order_number
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    pub fn request_token(&self) -> Option<&str> {
        self.request_token.as_deref()
    }

    pub fn customer(&self) -> &Customer {
        &self.customer
    }

    /// Returns true if the order belongs to this registered user.
    pub fn is_owned_by(&self, user_id: UserId) -> bool {
        self.customer.user_id() == Some(user_id)
    }

    pub fn items(&self) -> &[LineItem] {
        &self.items
    }

    pub fn shipping_address(&self) -> &Address {
        &self.shipping_address
    }

    pub fn billing_address(&self) -> &Address {
        self.billing.resolve(&self.shipping_address)
    }

    pub fn payment(&self) -> &Payment {
        &self.payment
    }

    pub fn pricing(&self) -> &PriceBreakdown {
        &self.pricing
    }

    pub fn total(&self) -> Money {
        self.pricing.total
    }

    pub fn coupon(&self) -> Option<&CouponSnapshot> {
        self.coupon.as_ref()
    }

    pub fn shipping(&self) -> &ShippingDetails {
        &self.shipping
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn tracking(&self) -> &[TrackingEntry] {
        &self.tracking
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn placed_at(&self) -> DateTime<Utc> {
        self.placed_at
    }

    pub fn confirmed_at(&self) -> Option<DateTime<Utc>> {
        self.confirmed_at
    }

    pub fn shipped_at(&self) -> Option<DateTime<Utc>> {
        self.shipped_at
    }

    pub fn delivered_at(&self) -> Option<DateTime<Utc>> {
        self.delivered_at
    }

    pub fn cancelled_at(&self) -> Option<DateTime<Utc>> {
        self.cancelled_at
    }

    pub fn returned_at(&self) -> Option<DateTime<Utc>> {
        self.returned_at
    }

    pub fn cancellation_reason(&self) -> Option<&str> {
        self.cancellation_reason.as_deref()
    }

    pub fn return_reason(&self) -> Option<&str> {
        self.return_reason.as_deref()
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Where order notifications go: the customer's email, else the shipping contact.
    pub fn recipient_email(&self) -> Option<&str> {
        self.customer
            .email()
            .or(self.shipping_address.email.as_deref())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::address::fixtures::dhaka;
    use crate::catalog::Product;
    use crate::pricing::{PricingEngine, ShippingMethod};

    pub fn new_order(customer: Customer, payment_method: PaymentMethod) -> NewOrder {
        let product = Product::new("Shirt", Money::from_major(100), 10)
            .with_discount_price(Money::from_major(80));
        let items = vec![LineItem::from_catalog(&product, None, 2).unwrap()];
        let engine = PricingEngine::default();
        let address = dhaka();
        let pricing = engine
            .compute(&items, ShippingMethod::Standard, &address, None)
            .unwrap();
        let shipping = engine
            .quote_shipping(ShippingMethod::Standard, &address, pricing.subtotal)
            .unwrap();

        NewOrder {
            request_token: None,
            customer,
            items,
            shipping_address: address,
            billing: BillingAddress::SameAsShipping,
            payment_method,
            pricing,
            coupon: None,
            shipping,
            notes: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::new_order;
    use super::*;

    fn registered() -> (UserId, Customer) {
        let user_id = UserId::new();
        (
            user_id,
            Customer::Registered {
                user_id,
                email: None,
            },
        )
    }

    fn place(payment_method: PaymentMethod) -> Order {
        let (_, customer) = registered();
        Order::place(
            new_order(customer, payment_method),
            OrderNumber::new("ORD-1"),
            Utc::now(),
        )
        .unwrap()
    }

    fn admin() -> Actor {
        Actor::Admin { user_id: None }
    }

    fn advance(order: &mut Order, to: OrderStatus) -> TransitionEffects {
        order
            .transition(TransitionRequest::new(to, admin()), Utc::now())
            .unwrap()
    }

    #[test]
    fn test_place_order() {
        let (user_id, customer) = registered();
        let order = Order::place(
            new_order(customer, PaymentMethod::CashOnDelivery),
            OrderNumber::new("ORD-1"),
            Utc::now(),
        )
        .unwrap();

        assert_eq!(order.status(), OrderStatus::Pending);
        assert_eq!(order.total(), Money::from_major(218));
        assert_eq!(order.tracking().len(), 1);
        assert_eq!(order.payment().status, PaymentStatus::Pending);
        assert!(order.is_owned_by(user_id));
        assert!(!order.is_owned_by(UserId::new()));
        assert_eq!(order.recipient_email(), Some("rahim@example.com"));
        assert_eq!(
            order.shipping().estimated_delivery - order.placed_at(),
            Duration::days(5)
        );
    }

    #[test]
    fn test_place_rejects_tampered_total() {
        let (_, customer) = registered();
        let mut new = new_order(customer, PaymentMethod::Card);
        new.pricing.total = Money::from_major(1);

        let result = Order::place(new, OrderNumber::new("ORD-1"), Utc::now());
        assert!(matches!(result, Err(OrderError::Pricing(_))));
    }

    #[test]
    fn test_place_rejects_mismatched_shipping() {
        let (_, customer) = registered();
        let mut new = new_order(customer, PaymentMethod::Card);
        new.shipping.cost = Money::from_major(7);

        let result = Order::place(new, OrderNumber::new("ORD-1"), Utc::now());
        assert!(matches!(result, Err(OrderError::Inconsistent(_))));
    }

    #[test]
    fn test_place_rejects_empty_order() {
        let (_, customer) = registered();
        let mut new = new_order(customer, PaymentMethod::Card);
        new.items.clear();

        let result = Order::place(new, OrderNumber::new("ORD-1"), Utc::now());
        assert_eq!(result.unwrap_err(), OrderError::NoItems);
    }

    #[test]
    fn test_full_lifecycle_completes_cash_payment() {
        let mut order = place(PaymentMethod::CashOnDelivery);

        advance(&mut order, OrderStatus::Confirmed);
        advance(&mut order, OrderStatus::Processing);
        order
            .transition(
                TransitionRequest::new(OrderStatus::Shipped, admin())
                    .with_tracking("TRK-1", Some("Pathao".to_string())),
                Utc::now(),
            )
            .unwrap();
        advance(&mut order, OrderStatus::OutForDelivery);
        advance(&mut order, OrderStatus::Delivered);

        assert_eq!(order.status(), OrderStatus::Delivered);
        assert!(order.confirmed_at().is_some());
        assert!(order.shipped_at().is_some());
        assert!(order.delivered_at().is_some());
        assert_eq!(order.shipping().tracking_number.as_deref(), Some("TRK-1"));
        assert_eq!(order.shipping().carrier.as_deref(), Some("Pathao"));
        assert!(order.shipping().actual_delivery.is_some());
        assert_eq!(order.payment().status, PaymentStatus::Completed);
        assert_eq!(order.tracking().len(), 6);
    }

    #[test]
    fn test_card_payment_not_completed_on_delivery() {
        let mut order = place(PaymentMethod::Card);
        for to in [
            OrderStatus::Confirmed,
            OrderStatus::Processing,
            OrderStatus::Shipped,
            OrderStatus::Delivered,
        ] {
            advance(&mut order, to);
        }
        assert_eq!(order.payment().status, PaymentStatus::Pending);
    }

    #[test]
    fn test_cancel_pending_without_payment_has_no_refund() {
        let mut order = place(PaymentMethod::CashOnDelivery);
        let effects = order
            .transition(
                TransitionRequest::new(OrderStatus::Cancelled, Actor::Customer { user_id: None })
                    .with_reason("changed my mind"),
                Utc::now(),
            )
            .unwrap();

        assert_eq!(effects.from, OrderStatus::Pending);
        assert_eq!(effects.refunded, None);
        assert!(effects.releases_inventory);
        assert_eq!(order.cancellation_reason(), Some("changed my mind"));
        assert_eq!(
            order.tracking().last().and_then(|t| t.note.as_deref()),
            Some("changed my mind")
        );
        assert_eq!(order.payment().status, PaymentStatus::Pending);
    }

    #[test]
    fn test_cancel_with_collected_payment_refunds_total() {
        let mut order = place(PaymentMethod::Card);
        order.payment.status = PaymentStatus::Completed;

        let effects = advance(&mut order, OrderStatus::Cancelled);

        assert_eq!(effects.refunded, Some(Money::from_major(218)));
        assert_eq!(order.payment().status, PaymentStatus::Refunded);
        assert_eq!(order.payment().refund_amount, Some(Money::from_major(218)));
        assert!(order.payment().refunded_at.is_some());
    }

    #[test]
    fn test_return_refunds_and_stays_refunded() {
        let mut order = place(PaymentMethod::CashOnDelivery);
        for to in [
            OrderStatus::Confirmed,
            OrderStatus::Processing,
            OrderStatus::Shipped,
            OrderStatus::Delivered,
            OrderStatus::Returned,
        ] {
            advance(&mut order, to);
        }

        assert_eq!(order.payment().status, PaymentStatus::Refunded);
        assert!(order.returned_at().is_some());
        assert!(order.status().is_terminal());
    }

    #[test]
    fn test_invalid_transition_leaves_order_untouched() {
        let mut order = place(PaymentMethod::CashOnDelivery);
        for to in [
            OrderStatus::Confirmed,
            OrderStatus::Processing,
            OrderStatus::Shipped,
        ] {
            advance(&mut order, to);
        }
        let before = order.clone();

        let err = order
            .transition(
                TransitionRequest::new(OrderStatus::Cancelled, admin()),
                Utc::now(),
            )
            .unwrap_err();

        assert_eq!(
            err,
            OrderError::InvalidTransition {
                from: OrderStatus::Shipped,
                to: OrderStatus::Cancelled,
            }
        );
        assert_eq!(order, before);
    }

    #[test]
    fn test_terminal_status_rejects_everything() {
        let mut order = place(PaymentMethod::CashOnDelivery);
        advance(&mut order, OrderStatus::Cancelled);

        for to in OrderStatus::ALL {
            assert!(
                order
                    .transition(TransitionRequest::new(to, admin()), Utc::now())
                    .is_err()
            );
        }
    }

    #[test]
    fn test_serde_round_trip_preserves_order() {
        let order = place(PaymentMethod::MobileWallet);
        let json = serde_json::to_value(&order).unwrap();
        assert_eq!(json["status"], "pending");
        assert_eq!(json["pricing"]["total"], 21800);

        let back: Order = serde_json::from_value(json).unwrap();
        assert_eq!(back, order);
    }
}
