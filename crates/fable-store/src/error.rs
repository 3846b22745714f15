//! Storage error types.

use thiserror::Error;

/// Result type alias for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by the persistence adapter.
///
/// A failed write means the write did not happen: callers must not update
/// in-memory state on a `StoreError`.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store failed (I/O, SQL, corruption).
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// A stored record could not be (de)serialized.
    #[error("Record serialization failed for key '{key}': {message}")]
    Serialization { key: String, message: String },
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_key() {
        let err = StoreError::Serialization {
            key: "queue/p1/op-1".into(),
            message: "bad json".into(),
        };
        assert!(err.to_string().contains("queue/p1/op-1"));
    }
}
