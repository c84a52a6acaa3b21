/// Errors that can occur within the storage layer.
///
/// # Examples
///
/// ```rust
/// use panelmon_storage::error::StorageError;
///
/// let err = StorageError::NotFound {
///     entity: "alert",
///     id: "99".to_string(),
/// };
/// assert!(err.to_string().contains("alert"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A required record was not found in the database.
    #[error("Storage: {entity} not found (id={id})")]
    NotFound { entity: &'static str, id: String },

    /// An alert failed validation before it reached the database.
    #[error("Storage: invalid alert: {0}")]
    InvalidAlert(String),

    /// A stored column held a value outside its closed set.
    #[error("Storage: invalid value in column '{column}': {value}")]
    InvalidColumn { column: &'static str, value: String },

    /// An underlying database error.
    #[error("Storage: database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// JSON serialization or deserialization failure (settings, eval data).
    #[error("Storage: JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
