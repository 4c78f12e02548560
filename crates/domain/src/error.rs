//! Field-attributed validation errors.

use serde::Serialize;

/// A single rejected input field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    /// Path of the offending field, e.g. `shipping_address.city` or `items[2].quantity`.
    pub field: String,
    pub message: String,
}

/// Every problem found while validating one request.
///
/// Validation collects all failures instead of stopping at the first so the
/// caller can fix the whole form in one round trip.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationErrors {
    errors: Vec<FieldError>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an error set holding a single field failure.
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.push(field, message);
        errors
    }

    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(FieldError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Records a failure when `value` is blank.
    pub fn require(&mut self, field: impl Into<String>, value: &str) {
        if value.trim().is_empty() {
            self.push(field, "is required");
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors(&self) -> &[FieldError] {
        &self.errors
    }

    /// Returns `Ok(())` when nothing was recorded.
    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Validation failed")?;
        for (i, e) in self.errors.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{sep}{} {}", e.field, e.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_multiple_failures() {
        let mut errors = ValidationErrors::new();
        errors.require("city", "  ");
        errors.require("line1", "12 Road");
        errors.push("country", "must be a two-letter code");

        assert_eq!(errors.errors().len(), 2);
        assert_eq!(
            errors.to_string(),
            "Validation failed: city is required; country must be a two-letter code"
        );
        assert!(errors.into_result().is_err());
    }

    #[test]
    fn empty_set_is_ok() {
        assert!(ValidationErrors::new().into_result().is_ok());
    }
}
