//! Error types for the durable store

use thiserror::Error;

/// Errors returned by [`AuthStore`](super::AuthStore) implementations
#[derive(Error, Debug)]
pub enum StoreError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Operation on a reserved entity
    #[error("action forbidden: {0}")]
    Forbidden(String),

    /// Entity not found
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Unique key already taken
    #[error("duplicate {entity}: {key}")]
    Duplicate { entity: &'static str, key: String },

    /// User references a role that does not exist
    #[error("user has unknown role: {0}")]
    UnknownRole(i64),

    /// Role already bound to the user
    #[error("user {user_id} already has role {role_id}")]
    AlreadyHasRole { user_id: i64, role_id: i64 },

    /// Stored JSON column could not be (de)serialized
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        StoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;
