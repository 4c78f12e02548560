//! API error types with HTTP response mapping.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use checkout::CheckoutError;
use common::{ProductId, VariantId};
use domain::{FieldError, ValidationErrors};
use serde::Serialize;
use store::StoreError;
use thiserror::Error;

const INTERNAL_MESSAGE: &str = "Internal server error";

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// No user identity was forwarded.
    Unauthorized(String),
    /// The identity may not perform the action.
    Forbidden(String),
    /// One or more request fields were rejected.
    Validation(ValidationErrors),
    /// Checkout or lifecycle failure.
    Checkout(CheckoutError),
    /// Internal server error.
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<FieldError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<StockShortfall>,
}

/// The line that could not be reserved and by how much.
#[derive(Serialize)]
struct StockShortfall {
    product_id: ProductId,
    variant_id: Option<VariantId>,
    product: String,
    available: u32,
    requested: u32,
}

impl ErrorBody {
    fn message(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: None,
            errors: Vec::new(),
            details: None,
        }
    }

    fn coded(error: impl Into<String>, code: &'static str) -> Self {
        Self {
            code: Some(code),
            ..Self::message(error)
        }
    }

    fn shortfall(error: impl Into<String>, code: &'static str, details: StockShortfall) -> Self {
        Self {
            details: Some(details),
            ..Self::coded(error, code)
        }
    }

    fn validation(errors: &ValidationErrors) -> Self {
        Self {
            errors: errors.errors().to_vec(),
            ..Self::coded("Validation failed", "validation")
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, ErrorBody::message(msg)),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, ErrorBody::message(msg)),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, ErrorBody::message(msg)),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, ErrorBody::message(msg)),
            ApiError::Validation(errors) => {
                (StatusCode::BAD_REQUEST, ErrorBody::validation(&errors))
            }
            ApiError::Checkout(err) => checkout_error_to_response(err),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody::message(INTERNAL_MESSAGE),
                )
            }
        };

        (status, axum::Json(body)).into_response()
    }
}

fn checkout_error_to_response(err: CheckoutError) -> (StatusCode, ErrorBody) {
    let code = err.reason();
    match &err {
        CheckoutError::Validation(errors) => {
            (StatusCode::BAD_REQUEST, ErrorBody::validation(errors))
        }
        CheckoutError::InsufficientStock {
            product_id,
            variant_id,
            product,
            available,
            requested,
        } => {
            let details = StockShortfall {
                product_id: *product_id,
                variant_id: *variant_id,
                product: product.clone(),
                available: *available,
                requested: *requested,
            };
            (
                StatusCode::BAD_REQUEST,
                ErrorBody::shortfall(err.to_string(), code, details),
            )
        }
        CheckoutError::OutOfStock {
            product_id,
            variant_id,
            product,
            requested,
        } => {
            let details = StockShortfall {
                product_id: *product_id,
                variant_id: *variant_id,
                product: product.clone(),
                available: 0,
                requested: *requested,
            };
            (
                StatusCode::BAD_REQUEST,
                ErrorBody::shortfall(err.to_string(), code, details),
            )
        }
        CheckoutError::ProductUnavailable { .. }
        | CheckoutError::Coupon(_)
        | CheckoutError::ShippingUnavailable(_)
        | CheckoutError::InvalidTransition { .. }
        | CheckoutError::EmptyCart => (
            StatusCode::BAD_REQUEST,
            ErrorBody::coded(err.to_string(), code),
        ),
        CheckoutError::Forbidden(_) => {
            (StatusCode::FORBIDDEN, ErrorBody::coded(err.to_string(), code))
        }
        CheckoutError::OrderNotFound(_) | CheckoutError::Store(StoreError::NotFound { .. }) => {
            (StatusCode::NOT_FOUND, ErrorBody::coded(err.to_string(), code))
        }
        CheckoutError::Store(StoreError::Conflict { .. }) => (
            StatusCode::CONFLICT,
            ErrorBody::coded("Order was modified concurrently, retry the request", "conflict"),
        ),
        CheckoutError::PriceIntegrity(_)
        | CheckoutError::DuplicateOrderNumber { .. }
        | CheckoutError::Timeout { .. }
        | CheckoutError::Store(_) => {
            tracing::error!(error = %err, reason = code, "request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody::message(INTERNAL_MESSAGE),
            )
        }
    }
}

impl From<CheckoutError> for ApiError {
    fn from(err: CheckoutError) -> Self {
        ApiError::Checkout(err)
    }
}

impl From<ValidationErrors> for ApiError {
    fn from(errors: ValidationErrors) -> Self {
        ApiError::Validation(errors)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

/// Errors that stop the server from starting.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Failed to install Prometheus recorder: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error("Failed to connect to the database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Failed to prepare the store: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
