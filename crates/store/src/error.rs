use common::Version;
use thiserror::Error;

/// Errors that can occur when interacting with a store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The document was changed by someone else since it was read.
    #[error("Concurrency conflict on {entity}: expected version {expected}, found {actual}")]
    Conflict {
        entity: String,
        expected: Version,
        actual: Version,
    },

    /// Another order already uses this order number.
    #[error("Order number already in use: {0}")]
    DuplicateOrderNumber(String),

    /// Another order was already placed with this request token.
    #[error("Request token already used: {0}")]
    DuplicateRequestToken(String),

    /// The referenced document does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
