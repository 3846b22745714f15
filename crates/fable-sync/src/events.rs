//! # Sync Events
//!
//! Outbound notification seam. The engine reports noteworthy moments
//! through a [`SyncEventEmitter`] so the application shell can refresh UI
//! state (badges, conflict banners, dead-letter trays) without polling.
//! All methods default to no-ops; implementors override what they need.

use fable_core::Operation;

use crate::delta::SyncReport;

/// Receiver for engine notifications. Implementations must be cheap and
/// non-blocking; they run on the orchestrator's task.
pub trait SyncEventEmitter: Send + Sync {
    /// A reconcile cycle finished for a scope.
    fn cycle_completed(&self, _scope_id: &str, _report: &SyncReport) {}

    /// An operation was confirmed by the remote.
    fn operation_completed(&self, _operation: &Operation) {}

    /// An operation exhausted its retries or failed fatally.
    fn operation_dead_lettered(&self, _operation: &Operation) {}

    /// A cycle deferred one or more conflicts to manual resolution.
    fn conflicts_deferred(&self, _scope_id: &str, _count: usize) {}
}

/// Emitter that drops every event. Default when the embedder does not
/// register one.
#[derive(Debug, Default)]
pub struct NoOpEmitter;

impl SyncEventEmitter for NoOpEmitter {}
