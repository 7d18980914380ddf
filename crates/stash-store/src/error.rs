/// Errors from content store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No object exists under the requested key.
    #[error("object not found: {0}")]
    NotFound(String),

    /// The key cannot be mapped to a location inside the store root.
    #[error("invalid key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },

    /// I/O error from the underlying filesystem.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Returns `true` if this error means the object simply does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
