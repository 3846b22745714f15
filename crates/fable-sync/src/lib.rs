//! # fable-sync: Offline-First Synchronization Engine
//!
//! Keeps a local replica of worldbuilding entities (characters, locations,
//! factions, lore notes) usable offline and convergent with a remote
//! backend when connectivity allows. Edits apply locally first and queue
//! durably; a per-scope background worker pushes them out, pulls remote
//! deltas, and resolves divergence deterministically.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sync Engine Architecture                         │
//! │                                                                         │
//! │   application shell                                                     │
//! │        │ enqueue_user_edit / resolve_conflict_manually / requeue        │
//! │        ▼                                                                │
//! │   SyncEngine (facade, one worker per scope)                             │
//! │        │                                                                │
//! │        ▼                                                                │
//! │   SyncOrchestrator ──── when to sync (timer / reconnect / trigger)      │
//! │      │         │                                                        │
//! │      ▼         ▼                                                        │
//! │   OperationQueue   DeltaSyncService ──▶ ConflictResolver (pure)         │
//! │   (ordering,       (pull/push,                                          │
//! │    retry,           checkpoints,                                        │
//! │    dead letters)    optimistic rollback)                                │
//! │      │                  │                                               │
//! │      └───────┬──────────┘                                               │
//! │              ▼                                                          │
//! │        KvStore (fable-store)        RemoteSyncClient (shell-provided)   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Guarantees
//! - No accepted edit is ever silently lost: it completes, dead-letters
//!   visibly, or surfaces as a conflict
//! - Same-entity operations reach the server in submission order
//! - Conflict resolution is deterministic across replicas
//! - A crash mid-execution re-runs the operation under the same
//!   idempotency key; checkpoints only advance after full cycles

pub mod clock;
pub mod config;
pub mod delta;
pub mod engine;
pub mod error;
pub mod events;
pub mod network;
pub mod orchestrator;
pub mod queue;
pub mod remote;
pub mod resolver;

#[cfg(test)]
pub(crate) mod test_support;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CycleSettings, RetrySettings, SyncConfig};
pub use delta::{DeltaSyncService, LocalEntityState, PullSummary, SyncReport};
pub use engine::{ScopeSyncStatus, SyncEngine, SyncEngineBuilder};
pub use error::{SyncError, SyncResult};
pub use events::{NoOpEmitter, SyncEventEmitter};
pub use network::{NetworkMonitor, NetworkSignal, NetworkState};
pub use orchestrator::{OrchestratorHandle, SyncOrchestrator};
pub use queue::{EnqueueRequest, OperationQueue};
pub use remote::{ExecuteOutcome, RemotePage, RemoteSyncClient};
pub use resolver::ConflictResolver;
