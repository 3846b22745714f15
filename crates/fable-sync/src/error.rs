//! # Sync Error Types
//!
//! The engine's error taxonomy, and the categorization the retry logic
//! hangs off of.
//!
//! ## Error Taxonomy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  Validation     bad enqueue input - rejected synchronously, not retried │
//! │  Transient      network / timeout / 5xx - retried with backoff          │
//! │  Fatal          semantic rejection (4xx) - dead-lettered, rolled back   │
//! │  Storage        persistence adapter I/O - propagated to the caller;     │
//! │                 a failed persist means the transition did NOT happen    │
//! │                                                                         │
//! │  (Conflicts are values, not errors: they route to the resolver.)        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all engine failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Caller Input
    // =========================================================================
    /// Enqueue input failed validation. Never retried.
    #[error(transparent)]
    Validation(#[from] fable_core::CoreError),

    /// A method referenced an operation the queue does not hold.
    #[error("Unknown operation: {id}")]
    UnknownOperation { id: String },

    /// A state transition was requested on an operation in the wrong state.
    #[error("Operation {id} is {status}, expected {expected}")]
    InvalidTransition {
        id: String,
        status: String,
        expected: String,
    },

    /// A method referenced a conflict that does not exist (or was resolved).
    /// Carries whichever identifier the caller used (conflict id or entity id).
    #[error("No open conflict matching {id}")]
    UnknownConflict { id: String },

    /// A method referenced a scope the engine has not attached.
    #[error("Scope not attached: {scope_id}")]
    UnknownScope { scope_id: String },

    /// `attach_scope` was called for a scope that already has a worker.
    #[error("Scope already attached: {scope_id}")]
    ScopeAlreadyAttached { scope_id: String },

    // =========================================================================
    // Remote Execution
    // =========================================================================
    /// Network-level failure or server 5xx. Retried with backoff.
    #[error("Transient remote failure: {0}")]
    Transient(String),

    /// Remote call exceeded its bounded timeout. Treated as transient.
    #[error("Remote call timed out after {0} seconds")]
    Timeout(u64),

    /// Semantic rejection by the backend (4xx-class). Dead-lettered.
    #[error("Fatal remote failure: {0}")]
    Fatal(String),

    // =========================================================================
    // Storage & Serialization
    // =========================================================================
    /// Persistence adapter failure. The triggering transition did not happen.
    #[error(transparent)]
    Storage(#[from] fable_store::StoreError),

    /// A record or payload failed to (de)serialize.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    // =========================================================================
    // Configuration & Lifecycle
    // =========================================================================
    /// Invalid engine configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load the config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save the config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    /// The engine (or a scope worker) is shutting down.
    #[error("Sync engine is shutting down")]
    ShuttingDown,

    /// A control channel closed unexpectedly.
    #[error("Channel error: {0}")]
    ChannelError(String),
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// True if the failed remote execution should be retried with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Transient(_) | SyncError::Timeout(_))
    }

    /// True if the operation must be dead-lettered and its optimistic
    /// local state rolled back.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Fatal(_))
    }

    /// True if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }
}
