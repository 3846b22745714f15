//! # Remote Sync Client Seam
//!
//! The engine never talks to a transport directly. The application shell
//! provides a [`RemoteSyncClient`] (HTTP, WebSocket, gRPC - the engine
//! does not care) that executes one logical operation at a time and serves
//! paginated change feeds.
//!
//! ## Idempotency Requirement
//! `execute` is called with `operation.id` as the idempotency key. A crash
//! can leave an operation's outcome unknown, in which case the engine will
//! re-execute it after restart; the backend must make the second execution
//! a no-op server-side.

use async_trait::async_trait;

use fable_core::{ChangeRecord, Operation};

use crate::error::SyncResult;

// =============================================================================
// Execution Outcome
// =============================================================================

/// Result of executing one operation against the backend.
///
/// Transient and fatal failures are reported through the `Err` channel
/// ([`SyncError::Transient`](crate::SyncError::Transient) /
/// [`SyncError::Fatal`](crate::SyncError::Fatal)); this enum covers the
/// accepted-by-server outcomes.
#[derive(Debug, Clone)]
pub enum ExecuteOutcome {
    /// The backend applied the operation and returned the entity's
    /// authoritative post-apply state.
    Success(ChangeRecord),

    /// The backend refused the operation because its copy of the entity
    /// has diverged; the returned record is the server's current state.
    Conflict(ChangeRecord),
}

/// One page of the remote change feed.
#[derive(Debug, Clone)]
pub struct RemotePage {
    /// Changes since the requested cursor, oldest first.
    pub changes: Vec<ChangeRecord>,

    /// Cursor to resume from next cycle. Opaque to the engine.
    pub next_cursor: Option<String>,
}

// =============================================================================
// Remote Sync Client
// =============================================================================

/// Transport-agnostic backend client provided by the application shell.
#[async_trait]
pub trait RemoteSyncClient: Send + Sync {
    /// Executes one logical operation. `operation.id` is the idempotency
    /// key; executing the same id twice must not double-apply.
    async fn execute(&self, operation: &Operation) -> SyncResult<ExecuteOutcome>;

    /// Fetches remote changes for `scope_id` after `cursor` (`None` means
    /// from the beginning), returning at most `limit` records.
    async fn fetch_changes_since(
        &self,
        scope_id: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> SyncResult<RemotePage>;
}
