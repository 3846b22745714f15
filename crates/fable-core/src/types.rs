//! # Domain Types
//!
//! Core domain types for the offline-first sync engine.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Sync Domain Types                               │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐        │
//! │  │   Operation     │   │  ChangeRecord   │   │ SyncCheckpoint  │        │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │        │
//! │  │  id (UUID)      │   │  entity_id      │   │  scope_id       │        │
//! │  │  kind           │   │  version        │   │  server_cursor  │        │
//! │  │  priority       │   │  data           │   │  watermark      │        │
//! │  │  attempts       │   │  deleted        │   │                 │        │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘        │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐        │
//! │  │ ConflictRecord  │   │ OperationStatus │   │  Resolution     │        │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │        │
//! │  │  local_change   │   │  Pending        │   │  outcome        │        │
//! │  │  remote_change  │   │  InFlight       │   │  chosen_data    │        │
//! │  │  strategy       │   │  DeadLettered   │   │  version        │        │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Versioning Model
//! Every entity carries a per-entity, monotonically increasing `version`,
//! assigned by whichever side produced the change. Versions are comparable
//! for ordering on a single entity; a diverging local and remote change for
//! the same entity is the conflict signal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

// =============================================================================
// Entity Type
// =============================================================================

/// The kinds of worldbuilding entities the engine synchronizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// A character sheet.
    Character,
    /// A place in the world.
    Location,
    /// A faction, guild, or organization.
    Faction,
    /// A free-form lore note.
    LoreNote,
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityType::Character => write!(f, "character"),
            EntityType::Location => write!(f, "location"),
            EntityType::Faction => write!(f, "faction"),
            EntityType::LoreNote => write!(f, "lore_note"),
        }
    }
}

// =============================================================================
// Operation Kind
// =============================================================================

/// What an operation does to its target entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    /// Default queue priority when the caller does not assign one.
    ///
    /// Lower value = served first. Deletes go out ahead of updates, and
    /// updates ahead of creates, so tombstones are not overtaken by edits
    /// to entities the server is about to drop.
    pub const fn default_priority(&self) -> i32 {
        match self {
            OperationKind::Delete => 10,
            OperationKind::Update => 20,
            OperationKind::Create => 30,
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationKind::Create => write!(f, "create"),
            OperationKind::Update => write!(f, "update"),
            OperationKind::Delete => write!(f, "delete"),
        }
    }
}

// =============================================================================
// Operation Status
// =============================================================================

/// Lifecycle state of a queued operation.
///
/// ## Lifecycle
/// ```text
/// enqueue ──▶ Pending ──▶ InFlight ──▶ Completed (removed from storage)
///                ▲            │
///                │            ├── transient failure ──▶ Failed (awaiting retry)
///                │            │                            │
///                └────────────┘◀── eligible again ─────────┘
///                             │
///                             └── fatal / attempts exhausted ──▶ DeadLettered
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Waiting to be executed for the first time.
    Pending,
    /// Currently being executed against the remote.
    InFlight,
    /// Failed at least once; waiting out its backoff gate.
    Failed,
    /// Exhausted retries or failed fatally. Retained, never auto-retried.
    DeadLettered,
    /// Confirmed by the remote. Transient: completed operations are
    /// removed from durable storage immediately.
    Completed,
}

impl OperationStatus {
    /// Whether the queue may hand this operation to the executor
    /// (subject to the backoff gate and the in-flight-per-entity rule).
    pub const fn is_dequeueable(&self) -> bool {
        matches!(self, OperationStatus::Pending | OperationStatus::Failed)
    }

    /// Whether this is a terminal state.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, OperationStatus::DeadLettered | OperationStatus::Completed)
    }
}

// =============================================================================
// Operation
// =============================================================================

/// A durable unit of pending local work: one mutation of one entity.
///
/// The `id` doubles as the idempotency key sent to the remote, so a
/// re-executed operation (after a crash with unknown outcome) never
/// double-applies server-side.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Operation {
    /// Unique identifier (UUID v4). Stable across retries.
    pub id: String,

    /// The scope (project) this operation belongs to.
    pub scope_id: String,

    /// Type of the target entity.
    pub entity_type: EntityType,

    /// Identifier of the target entity.
    pub entity_id: String,

    /// What the operation does.
    pub kind: OperationKind,

    /// Opaque serialized change data. `None` for deletes.
    #[ts(type = "any | null")]
    pub payload: Option<Value>,

    /// Queue priority; lower value = served first.
    pub priority: i32,

    /// When the operation was enqueued. Never changes, even across
    /// retries: same-entity ordering is keyed on this field.
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    /// Number of execution attempts so far.
    pub attempts: u32,

    /// Backoff gate: the operation must not be retried before this instant.
    #[ts(as = "String")]
    pub next_eligible_at: DateTime<Utc>,

    /// Current lifecycle state.
    pub status: OperationStatus,

    /// Last error message, if any attempt failed.
    pub last_error: Option<String>,

    /// When execution was last attempted.
    #[ts(as = "Option<String>")]
    pub attempted_at: Option<DateTime<Utc>>,
}

impl Operation {
    /// Whether the backoff gate has passed at `now`.
    pub fn is_eligible_at(&self, now: DateTime<Utc>) -> bool {
        self.status.is_dequeueable() && self.next_eligible_at <= now
    }
}

// =============================================================================
// Change Record (Delta)
// =============================================================================

/// One entity's state change relative to a sync checkpoint.
///
/// Used in both directions: local→remote push and remote→local pull.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ChangeRecord {
    /// Identifier of the changed entity.
    pub entity_id: String,

    /// Type of the changed entity.
    pub entity_type: EntityType,

    /// Per-entity monotonically increasing version.
    pub version: i64,

    /// The entity state after the change. Null for tombstones.
    #[ts(type = "any")]
    pub data: Value,

    /// Whether this change deletes the entity.
    pub deleted: bool,

    /// Physical timestamp of the change (used by last-write-wins).
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl ChangeRecord {
    /// Whether two records describe the same state (idempotent no-op signal).
    pub fn is_same_state(&self, other: &ChangeRecord) -> bool {
        self.entity_id == other.entity_id
            && self.version == other.version
            && self.deleted == other.deleted
            && self.data == other.data
    }
}

// =============================================================================
// Sync Checkpoint
// =============================================================================

/// Per-scope cursor marking the last fully reconciled point.
///
/// Owned exclusively by the Delta Sync Service and advanced only after a
/// complete reconcile cycle finishes without fatal error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SyncCheckpoint {
    /// The scope (project) this checkpoint belongs to.
    pub scope_id: String,

    /// Opaque pagination token handed back by the remote.
    pub server_cursor: Option<String>,

    /// Highest local entity version already pushed and acknowledged.
    pub local_version_watermark: i64,

    /// When the last full reconcile cycle completed.
    #[ts(as = "Option<String>")]
    pub last_reconciled_at: Option<DateTime<Utc>>,
}

impl SyncCheckpoint {
    /// A fresh checkpoint for a scope that has never synced.
    pub fn new(scope_id: impl Into<String>) -> Self {
        SyncCheckpoint {
            scope_id: scope_id.into(),
            server_cursor: None,
            local_version_watermark: 0,
            last_reconciled_at: None,
        }
    }
}

// =============================================================================
// Conflict Record & Resolution
// =============================================================================

/// How a conflict should be (or was) resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// Later physical timestamp wins; remote wins ties (favors convergence).
    LastWriteWins,
    /// Merge non-overlapping fields; overlapping fields fall back to
    /// last-write-wins.
    FieldMerge,
    /// Defer to an explicit user choice. The conflict is persisted and the
    /// affected entity is blocked until resolved.
    Manual,
}

/// Which side a resolution chose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionOutcome {
    /// The local change was kept.
    Local,
    /// The remote change was kept.
    Remote,
    /// Fields from both sides were combined.
    Merged,
    /// Deferred to manual resolution; no data was chosen.
    Deferred,
}

/// Produced when local and remote changes for the same entity diverge.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ConflictRecord {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// The scope the conflicted entity belongs to.
    pub scope_id: String,

    /// Identifier of the conflicted entity.
    pub entity_id: String,

    /// Type of the conflicted entity.
    pub entity_type: EntityType,

    /// The competing local change.
    pub local_change: ChangeRecord,

    /// The competing remote change.
    pub remote_change: ChangeRecord,

    /// Strategy chosen for this conflict.
    pub resolution_strategy: ResolutionStrategy,

    /// When the conflict was detected.
    #[ts(as = "String")]
    pub detected_at: DateTime<Utc>,
}

/// The decision produced by the conflict resolver.
///
/// Deterministic given identical inputs: resolving the same conflict with
/// the same strategy always yields the same `Resolution`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Resolution {
    /// Which side won.
    pub outcome: ResolutionOutcome,

    /// The winning data. `None` when deferred to manual resolution.
    #[ts(type = "any | null")]
    pub chosen_data: Option<Value>,

    /// Version to assign to the resolved entity state.
    pub resulting_version: i64,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn record(version: i64, data: Value) -> ChangeRecord {
        ChangeRecord {
            entity_id: "char-1".into(),
            entity_type: EntityType::Character,
            version,
            data,
            deleted: false,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_default_priorities_order_delete_first() {
        assert!(OperationKind::Delete.default_priority() < OperationKind::Update.default_priority());
        assert!(OperationKind::Update.default_priority() < OperationKind::Create.default_priority());
    }

    #[test]
    fn test_status_dequeueable() {
        assert!(OperationStatus::Pending.is_dequeueable());
        assert!(OperationStatus::Failed.is_dequeueable());
        assert!(!OperationStatus::InFlight.is_dequeueable());
        assert!(!OperationStatus::DeadLettered.is_dequeueable());
        assert!(!OperationStatus::Completed.is_dequeueable());
    }

    #[test]
    fn test_same_state_detection() {
        let a = record(3, serde_json::json!({"name": "Mira"}));
        let mut b = a.clone();
        assert!(a.is_same_state(&b));

        b.data = serde_json::json!({"name": "Vex"});
        assert!(!a.is_same_state(&b));
    }

    #[test]
    fn test_fresh_checkpoint() {
        let cp = SyncCheckpoint::new("project-1");
        assert_eq!(cp.scope_id, "project-1");
        assert!(cp.server_cursor.is_none());
        assert_eq!(cp.local_version_watermark, 0);
    }

    #[test]
    fn test_entity_type_display() {
        assert_eq!(EntityType::LoreNote.to_string(), "lore_note");
        assert_eq!(EntityType::Character.to_string(), "character");
    }
}
