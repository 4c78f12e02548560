//! Coupon preview endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use checkout::CouponPreview;
use domain::{CartLine, ValidationErrors};
use serde::Deserialize;
use store::CommerceStore;

use super::AppState;
use crate::error::ApiError;
use crate::identity::Identity;

#[derive(Debug, Deserialize)]
pub struct ValidateCouponRequest {
    pub code: String,
    /// Lines to price; registered customers may omit them to use their cart.
    #[serde(default)]
    pub items: Option<Vec<CartLine>>,
}

/// POST /coupons/validate: reports the discount a code would grant without
/// consuming a use.
pub async fn validate<S: CommerceStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    identity: Identity,
    payload: Result<Json<ValidateCouponRequest>, JsonRejection>,
) -> Result<Json<CouponPreview>, ApiError> {
    let Json(req) = payload?;
    if req.code.trim().is_empty() {
        return Err(ValidationErrors::single("code", "is required").into());
    }

    let preview = state
        .assembler
        .preview_coupon(&req.code, req.items, identity.user_id)
        .await?;
    Ok(Json(preview))
}
