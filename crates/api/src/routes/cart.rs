//! Cart validation endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use checkout::CartValidation;
use store::CommerceStore;

use super::AppState;
use crate::error::ApiError;
use crate::identity::Identity;

/// POST /cart/validate: drops or clamps cart lines the catalog can no longer
/// satisfy and returns the adjusted cart.
pub async fn validate<S: CommerceStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    identity: Identity,
) -> Result<Json<CartValidation>, ApiError> {
    let user_id = identity.require_user()?;
    let validation = state.assembler.validate_cart(user_id).await?;
    Ok(Json(validation))
}
