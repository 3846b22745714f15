//! # Domain Error Types
//!
//! Pure domain errors: validation and payload encoding. I/O and sync
//! failures live in `fable-store` and `fable-sync` respectively.

use thiserror::Error;

use crate::types::EntityType;

/// Result type alias for domain operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors producible by pure domain logic.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Enqueue input failed validation. Rejected synchronously, never retried.
    #[error("Validation failed for {field}: {message}")]
    Validation { field: &'static str, message: String },

    /// A payload could not be encoded/decoded.
    #[error("Payload encoding failed: {0}")]
    PayloadEncoding(String),

    /// A payload's tag did not match the entity type it was attached to.
    #[error("Payload mismatch: expected {expected}, got {actual}")]
    PayloadMismatch {
        expected: EntityType,
        actual: EntityType,
    },
}

impl CoreError {
    /// Convenience constructor for validation failures.
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        CoreError::Validation {
            field,
            message: message.into(),
        }
    }
}
