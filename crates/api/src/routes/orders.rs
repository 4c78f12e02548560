//! Order placement, cancellation, status and tracking endpoints.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use chrono::{DateTime, Utc};
use checkout::{PlaceOrder, Requester, TrackingView};
use common::{OrderId, ProductId, VariantId, Version};
use domain::{
    Actor, Address, BillingAddress, CartLine, CouponSnapshot, Customer, Order, OrderNumber,
    OrderStatus, PaymentMethod, PaymentStatus, PriceBreakdown, ShippingMethod, TransitionRequest,
    ValidationErrors,
};
use serde::{Deserialize, Serialize};
use store::CommerceStore;

use super::AppState;
use crate::error::ApiError;
use crate::identity::Identity;

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

// -- Request types --

#[derive(Debug, Deserialize)]
pub struct PlaceOrderRequest {
    /// Omitted by registered customers checking out their cart.
    #[serde(default)]
    pub items: Option<Vec<CartLine>>,
    pub shipping_address: Address,
    #[serde(default)]
    pub same_as_shipping: Option<bool>,
    #[serde(default)]
    pub billing_address: Option<Address>,
    pub shipping_method: String,
    pub payment_method: String,
    #[serde(default)]
    pub coupon_code: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    /// Contact details for guest checkout. Ignored for registered customers.
    #[serde(default)]
    pub guest: Option<GuestContact>,
}

#[derive(Debug, Deserialize)]
pub struct GuestContact {
    pub email: String,
    pub phone: String,
}

impl PlaceOrderRequest {
    /// Turns the body into a placement request, reporting every malformed
    /// field at once.
    fn into_command(
        self,
        identity: &Identity,
        request_token: Option<String>,
        max_line_quantity: u32,
    ) -> Result<PlaceOrder, ApiError> {
        let mut errors = ValidationErrors::new();

        let shipping_method = self
            .shipping_method
            .parse::<ShippingMethod>()
            .unwrap_or_else(|e| {
                errors.push("shipping_method", e);
                ShippingMethod::Standard
            });
        let payment_method = self
            .payment_method
            .parse::<PaymentMethod>()
            .unwrap_or_else(|e| {
                errors.push("payment_method", e);
                PaymentMethod::CashOnDelivery
            });

        let billing = match (self.same_as_shipping, self.billing_address) {
            (Some(true), _) | (None, None) => BillingAddress::SameAsShipping,
            (_, Some(address)) => BillingAddress::Separate { address },
            (Some(false), None) => {
                errors.push(
                    "billing_address",
                    "is required when billing differs from shipping",
                );
                BillingAddress::SameAsShipping
            }
        };

        let customer = match (identity.user_id, self.guest) {
            (Some(user_id), _) => Customer::Registered {
                user_id,
                email: identity.email.clone(),
            },
            (None, Some(contact)) => Customer::Guest {
                email: contact.email.trim().to_string(),
                phone: contact.phone.trim().to_string(),
            },
            (None, None) => Customer::Guest {
                email: String::new(),
                phone: String::new(),
            },
        };

        let command = PlaceOrder {
            request_token,
            customer,
            items: self.items,
            shipping_address: self.shipping_address,
            billing,
            shipping_method,
            payment_method,
            coupon_code: self.coupon_code,
            notes: self.notes.filter(|n| !n.trim().is_empty()),
        };

        if errors.is_empty() {
            return Ok(command);
        }
        command.validate_into(max_line_quantity, &mut errors);
        Err(ApiError::Validation(errors))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelOrderRequest {
    #[serde(default)]
    pub reason: Option<String>,
    /// Guest orders are cancelled by presenting the email they were placed with.
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub tracking_number: Option<String>,
    #[serde(default)]
    pub carrier: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

// -- Response types --

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub id: OrderId,
    pub order_number: OrderNumber,
    pub version: Version,
    pub status: OrderStatus,
    pub items: Vec<OrderItemResponse>,
    pub pricing: PriceBreakdown,
    pub coupon: Option<CouponSnapshot>,
    pub shipping_method: ShippingMethod,
    pub estimated_delivery: DateTime<Utc>,
    pub tracking_number: Option<String>,
    pub carrier: Option<String>,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub shipping_address: Address,
    pub billing_address: Address,
    pub notes: Option<String>,
    pub placed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct OrderItemResponse {
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub name: String,
    pub variant_name: Option<String>,
    pub quantity: u32,
    pub unit_price: domain::Money,
    pub discount_price: Option<domain::Money>,
    pub line_total: domain::Money,
}

impl From<&Order> for OrderResponse {
    fn from(order: &Order) -> Self {
        let shipping = order.shipping();
        Self {
            id: order.id(),
            order_number: order.order_number().clone(),
            version: order.version(),
            status: order.status(),
            items: order
                .items()
                .iter()
                .map(|item| OrderItemResponse {
                    product_id: item.product_id(),
                    variant_id: item.variant_id(),
                    name: item.product().name.clone(),
                    variant_name: item.product().variant_name.clone(),
                    quantity: item.quantity(),
                    unit_price: item.unit_price(),
                    discount_price: item.unit_discount_price(),
                    line_total: item.line_total(),
                })
                .collect(),
            pricing: *order.pricing(),
            coupon: order.coupon().cloned(),
            shipping_method: shipping.method,
            estimated_delivery: shipping.estimated_delivery,
            tracking_number: shipping.tracking_number.clone(),
            carrier: shipping.carrier.clone(),
            payment_method: order.payment().method,
            payment_status: order.payment().status,
            shipping_address: order.shipping_address().clone(),
            billing_address: order.billing_address().clone(),
            notes: order.notes().map(str::to_string),
            placed_at: order.placed_at(),
            updated_at: order.updated_at(),
        }
    }
}

// -- Handlers --

/// POST /orders: places an order.
///
/// Returns 201 for a new order and 200 when the `Idempotency-Key` header
/// repeats a request that already produced an order.
pub async fn place<S: CommerceStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    identity: Identity,
    headers: HeaderMap,
    payload: Result<Json<PlaceOrderRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError> {
    let Json(req) = payload?;
    let request_token = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .map(|value| {
            value
                .to_str()
                .map(str::to_string)
                .map_err(|_| ApiError::BadRequest("Malformed Idempotency-Key header".to_string()))
        })
        .transpose()?;

    let max_line_quantity = state.assembler.config().max_line_quantity;
    let command = req.into_command(&identity, request_token, max_line_quantity)?;
    let placed = state.assembler.place_order(command).await?;

    let status = if placed.created {
        StatusCode::CREATED
    } else {
        metrics::counter!("order_placement_replays_total").increment(1);
        StatusCode::OK
    };
    Ok((status, Json(OrderResponse::from(&placed.order))))
}

/// PATCH /orders/{order_number}/cancel: customer cancellation.
pub async fn cancel<S: CommerceStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(order_number): Path<String>,
    identity: Identity,
    body: Bytes,
) -> Result<Json<OrderResponse>, ApiError> {
    let req: CancelOrderRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CancelOrderRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid request body: {e}")))?
    };

    let requester = match (identity.user_id, req.email.or(identity.email)) {
        (Some(user_id), _) => Requester::user(user_id),
        (None, Some(email)) => Requester::guest(email),
        (None, None) => Requester::default(),
    };

    let order = state
        .lifecycle
        .cancel_by_customer(&OrderNumber::new(order_number), &requester, req.reason)
        .await?;
    Ok(Json(OrderResponse::from(&order)))
}

/// PUT /orders/{order_number}/status: staff transition.
pub async fn update_status<S: CommerceStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(order_number): Path<String>,
    identity: Identity,
    payload: Result<Json<UpdateStatusRequest>, JsonRejection>,
) -> Result<Json<OrderResponse>, ApiError> {
    identity.require_admin()?;
    let Json(req) = payload?;

    let target = req
        .status
        .parse::<OrderStatus>()
        .map_err(|e| ValidationErrors::single("status", e))?;

    let mut request = TransitionRequest::new(
        target,
        Actor::Admin {
            user_id: identity.user_id,
        },
    );
    request.note = req.note;
    request.reason = req.reason;
    if let Some(tracking_number) = req.tracking_number {
        request = request.with_tracking(tracking_number, req.carrier);
    } else {
        request.carrier = req.carrier;
    }

    let order = state
        .lifecycle
        .transition(&OrderNumber::new(order_number), request)
        .await?;
    Ok(Json(OrderResponse::from(&order)))
}

/// GET /orders/track/{order_number}: public tracking view.
pub async fn track<S: CommerceStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(order_number): Path<String>,
) -> Result<Json<TrackingView>, ApiError> {
    let view = state.lifecycle.track(&OrderNumber::new(order_number)).await?;
    Ok(Json(view))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(json: serde_json::Value) -> PlaceOrderRequest {
        serde_json::from_value(json).unwrap()
    }

    fn body(extra: serde_json::Value) -> serde_json::Value {
        let mut body = serde_json::json!({
            "items": [{ "product_id": ProductId::new(), "quantity": 1 }],
            "shipping_address": {
                "full_name": "Rafiq Islam",
                "phone": "+8801700000000",
                "line1": "House 12, Road 5",
                "city": "Dhaka",
                "country": "BD"
            },
            "shipping_method": "standard",
            "payment_method": "cash_on_delivery"
        });
        if let (Some(target), Some(extra)) = (body.as_object_mut(), extra.as_object()) {
            for (key, value) in extra {
                target.insert(key.clone(), value.clone());
            }
        }
        body
    }

    #[test]
    fn test_registered_identity_overrides_guest_contact() {
        let user = common::UserId::new();
        let identity = Identity {
            user_id: Some(user),
            ..Identity::default()
        };
        let command = request(body(serde_json::json!({
            "guest": { "email": "someone@example.com", "phone": "1" }
        })))
        .into_command(&identity, Some("key-1".to_string()), 100)
        .unwrap();

        assert_eq!(command.customer.user_id(), Some(user));
        assert_eq!(command.request_token.as_deref(), Some("key-1"));
        assert_eq!(command.billing, BillingAddress::SameAsShipping);
    }

    #[test]
    fn test_unknown_methods_are_reported_with_other_field_errors() {
        let result = request(body(serde_json::json!({
            "shipping_method": "drone",
            "payment_method": "barter",
            "same_as_shipping": false,
        })))
        .into_command(&Identity::default(), None, 100);

        let Err(ApiError::Validation(errors)) = result else {
            panic!("expected validation errors");
        };
        let fields: Vec<&str> = errors.errors().iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"shipping_method"));
        assert!(fields.contains(&"payment_method"));
        assert!(fields.contains(&"billing_address"));
        assert!(fields.contains(&"customer.email"));
        assert!(fields.contains(&"customer.phone"));
    }

    #[test]
    fn test_separate_billing_address() {
        let identity = Identity {
            user_id: Some(common::UserId::new()),
            ..Identity::default()
        };
        let command = request(body(serde_json::json!({
            "billing_address": {
                "full_name": "Accounts",
                "phone": "+8801800000000",
                "line1": "Office 3",
                "city": "Sylhet",
                "country": "BD"
            }
        })))
        .into_command(&identity, None, 100)
        .unwrap();

        assert!(matches!(
            command.billing,
            BillingAddress::Separate { ref address } if address.city == "Sylhet"
        ));
    }
}
