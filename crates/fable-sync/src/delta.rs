//! # Delta Sync Service
//!
//! Bidirectional change reconciliation for one scope: optimistic local
//! edits, checkpoint-based pull/push, conflict detection, and rollback of
//! optimistic state when an operation dead-letters.
//!
//! ## Reconcile Cycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Reconcile Cycle                                 │
//! │                                                                         │
//! │  load checkpoint                                                        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  PULL: fetch pages after server_cursor                                  │
//! │    per remote record:                                                   │
//! │      entity blocked by open conflict ──▶ fold into open conflict        │
//! │      same state as local             ──▶ no-op                          │
//! │      local clean                     ──▶ apply remote                   │
//! │      local dirty (unsynced edit)     ──▶ resolver                       │
//! │            LWW / FieldMerge ──▶ apply immediately                       │
//! │            Manual           ──▶ persist conflict, block entity          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  PUSH: enqueue dirty records that have no pending operation             │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  both phases OK ──▶ save checkpoint (new cursor, reconciled-at)         │
//! │  either failed  ──▶ checkpoint untouched; next cycle re-covers          │
//! │                     the same window (idempotent application)            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Optimistic Updates
//! A local edit is applied to local state immediately, with the pre-edit
//! state saved as a baseline. The baseline is cleared when the remote
//! acknowledges; if the operation dead-letters instead, local state rolls
//! back to the baseline. When later edits have stacked on top (the pending
//! operation id no longer matches), rolling back would destroy newer work,
//! so the failure is surfaced as a manual conflict instead.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use fable_core::{
    ChangeRecord, ConflictRecord, Operation, OperationKind, Resolution, ResolutionOutcome,
    SyncCheckpoint,
};
use fable_store::{get_record, keys, put_record, KvStore};

use crate::clock::Clock;
use crate::error::{SyncError, SyncResult};
use crate::queue::{EnqueueRequest, OperationQueue};
use crate::remote::RemoteSyncClient;
use crate::resolver::ConflictResolver;

// =============================================================================
// Local Entity State
// =============================================================================

/// What this replica currently believes about one entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalEntityState {
    /// The entity's current local state (possibly ahead of the server).
    pub record: ChangeRecord,

    /// Queue operation carrying this state to the server, if one is
    /// outstanding.
    pub pending_operation: Option<String>,

    /// True while the entity was created locally and the server has not
    /// yet acknowledged it. A re-push of such a record must be a create,
    /// not an update of an entity the server has never seen.
    #[serde(default)]
    pub created_locally: bool,
}

/// Pre-edit state kept for rollback while an optimistic edit is unconfirmed.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Baseline {
    /// State before the first unconfirmed edit. `None` when the entity
    /// did not exist locally.
    prior: Option<ChangeRecord>,
}

/// Outcome of one pull phase.
#[derive(Debug, Clone, Default)]
pub struct PullSummary {
    /// Remote changes applied to local state.
    pub applied: usize,

    /// Conflicts deferred to manual resolution.
    pub deferred_conflicts: usize,

    /// Cursor to persist if the full cycle succeeds.
    pub next_cursor: Option<String>,
}

/// Outcome of one full reconcile cycle.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub pulled: usize,
    pub pushed: usize,
    pub deferred_conflicts: usize,
}

// =============================================================================
// Delta Sync Service
// =============================================================================

/// Per-scope reconciliation service. Owns the scope's checkpoint, local
/// entity states, baselines, and conflict records.
pub struct DeltaSyncService {
    scope_id: String,
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    resolver: ConflictResolver,
    page_size: usize,
}

impl DeltaSyncService {
    pub fn new(
        scope_id: impl Into<String>,
        store: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
        resolver: ConflictResolver,
        page_size: usize,
    ) -> Self {
        DeltaSyncService {
            scope_id: scope_id.into(),
            store,
            clock,
            resolver,
            page_size,
        }
    }

    pub fn scope_id(&self) -> &str {
        &self.scope_id
    }

    // =========================================================================
    // Checkpoint
    // =========================================================================

    /// Loads the scope's checkpoint, or a fresh one for a never-synced scope.
    pub async fn checkpoint(&self) -> SyncResult<SyncCheckpoint> {
        let key = keys::checkpoint_key(&self.scope_id);
        Ok(get_record::<SyncCheckpoint>(self.store.as_ref(), &key)
            .await?
            .unwrap_or_else(|| SyncCheckpoint::new(&self.scope_id)))
    }

    async fn save_checkpoint(&self, checkpoint: &SyncCheckpoint) -> SyncResult<()> {
        let key = keys::checkpoint_key(&self.scope_id);
        put_record(self.store.as_ref(), &key, checkpoint).await?;
        Ok(())
    }

    // =========================================================================
    // Optimistic Local Edits
    // =========================================================================

    /// Applies a user edit optimistically and enqueues it for push.
    ///
    /// The local write lands before the enqueue. If the enqueue then fails
    /// on storage, the record is left dirty with no pending operation and
    /// the next push phase picks it up, so the edit is never lost.
    pub async fn apply_local_edit(
        &self,
        queue: &OperationQueue,
        request: EnqueueRequest,
    ) -> SyncResult<Operation> {
        if self.open_conflict(&request.entity_id).await?.is_some() {
            return Err(SyncError::Fatal(format!(
                "entity {} is blocked by an unresolved conflict",
                request.entity_id
            )));
        }

        let current = self.local_state(&request.entity_id).await?;
        let now = self.clock.now();
        let created_locally = request.kind == OperationKind::Create
            || current.as_ref().is_some_and(|s| s.created_locally);

        let record = ChangeRecord {
            entity_id: request.entity_id.clone(),
            entity_type: request.entity_type,
            version: current.as_ref().map_or(1, |s| s.record.version + 1),
            data: match request.kind {
                OperationKind::Delete => Value::Null,
                _ => request.payload.clone().unwrap_or(Value::Null),
            },
            deleted: request.kind == OperationKind::Delete,
            updated_at: now,
        };

        // First unconfirmed edit captures the rollback baseline; stacked
        // edits keep the original one.
        if self.baseline(&request.entity_id).await?.is_none() {
            self.save_baseline(
                &request.entity_id,
                &Baseline {
                    prior: current.map(|s| s.record),
                },
            )
            .await?;
        }

        self.save_local_state(&LocalEntityState {
            record: record.clone(),
            pending_operation: None,
            created_locally,
        })
        .await?;

        let operation = queue.enqueue(request).await?;

        self.save_local_state(&LocalEntityState {
            record,
            pending_operation: Some(operation.id.clone()),
            created_locally,
        })
        .await?;

        debug!(
            entity_id = %operation.entity_id,
            operation_id = %operation.id,
            "Applied optimistic local edit"
        );
        Ok(operation)
    }

    // =========================================================================
    // Pull
    // =========================================================================

    /// Pulls remote changes since the given cursor and folds them into
    /// local state. Application is idempotent, so a cycle that dies before
    /// the checkpoint advances can safely replay the same window.
    pub async fn pull(
        &self,
        remote: &dyn RemoteSyncClient,
        mut cursor: Option<String>,
    ) -> SyncResult<PullSummary> {
        let mut summary = PullSummary {
            next_cursor: cursor.clone(),
            ..PullSummary::default()
        };

        loop {
            let page = remote
                .fetch_changes_since(&self.scope_id, cursor.as_deref(), self.page_size)
                .await?;
            let page_len = page.changes.len();

            for remote_record in page.changes {
                match self.apply_remote_change(remote_record).await? {
                    RemoteApplied::Applied => summary.applied += 1,
                    RemoteApplied::Deferred => summary.deferred_conflicts += 1,
                    RemoteApplied::Skipped => {}
                }
            }

            if let Some(next) = page.next_cursor {
                summary.next_cursor = Some(next.clone());
                cursor = Some(next);
            }

            if page_len < self.page_size {
                break;
            }
        }

        Ok(summary)
    }

    /// Folds one remote change into local state.
    async fn apply_remote_change(&self, remote: ChangeRecord) -> SyncResult<RemoteApplied> {
        // A blocked entity stays frozen until its conflict is resolved.
        // The cursor will advance past this change, so the newest server
        // copy is folded into the stored conflict rather than dropped.
        if let Some(mut conflict) = self.open_conflict(&remote.entity_id).await? {
            debug!(entity_id = %remote.entity_id, "Folding change for conflict-blocked entity");
            if remote.version > conflict.remote_change.version {
                conflict.remote_change = remote;
                self.save_conflict(&conflict).await?;
            }
            return Ok(RemoteApplied::Skipped);
        }

        let Some(local) = self.local_state(&remote.entity_id).await? else {
            self.save_local_state(&LocalEntityState {
                record: remote,
                pending_operation: None,
                created_locally: false,
            })
            .await?;
            return Ok(RemoteApplied::Applied);
        };

        if local.record.is_same_state(&remote) {
            return Ok(RemoteApplied::Skipped);
        }

        let dirty =
            local.pending_operation.is_some() || self.baseline(&remote.entity_id).await?.is_some();

        if !dirty {
            // Clean local copy: the server is authoritative.
            self.save_local_state(&LocalEntityState {
                record: remote,
                pending_operation: None,
                created_locally: false,
            })
            .await?;
            return Ok(RemoteApplied::Applied);
        }

        // Unsynced local edit vs. remote change: a real conflict.
        self.handle_conflict(local, remote).await
    }

    /// Resolves (or defers) a divergence between a dirty local record and
    /// a remote one.
    async fn handle_conflict(
        &self,
        local: LocalEntityState,
        remote: ChangeRecord,
    ) -> SyncResult<RemoteApplied> {
        let strategy = self.resolver.strategy_for(remote.entity_type);
        let resolution = self
            .resolver
            .resolve_with(&local.record, &remote, strategy);

        if resolution.outcome == ResolutionOutcome::Deferred {
            let conflict = self.build_conflict(&local.record, &remote, strategy);
            self.save_conflict(&conflict).await?;
            info!(
                entity_id = %conflict.entity_id,
                conflict_id = %conflict.id,
                "Conflict deferred to manual resolution"
            );
            return Ok(RemoteApplied::Deferred);
        }

        self.apply_resolution(&local, &remote, &resolution).await?;
        Ok(RemoteApplied::Applied)
    }

    /// Writes the resolved state. A resolution that kept or merged local
    /// content leaves the record dirty so the push phase re-sends it.
    async fn apply_resolution(
        &self,
        local: &LocalEntityState,
        remote: &ChangeRecord,
        resolution: &Resolution,
    ) -> SyncResult<()> {
        let entity_id = &remote.entity_id;

        match resolution.outcome {
            ResolutionOutcome::Remote => {
                self.save_local_state(&LocalEntityState {
                    record: remote.clone(),
                    pending_operation: local.pending_operation.clone(),
                    created_locally: false,
                })
                .await?;
                if local.pending_operation.is_none() {
                    self.delete_baseline(entity_id).await?;
                }
            }
            ResolutionOutcome::Local | ResolutionOutcome::Merged => {
                let record = ChangeRecord {
                    entity_id: entity_id.clone(),
                    entity_type: remote.entity_type,
                    version: resolution.resulting_version,
                    data: resolution.chosen_data.clone().unwrap_or(Value::Null),
                    deleted: resolution.chosen_data.is_none()
                        || resolution.chosen_data == Some(Value::Null),
                    updated_at: local.record.updated_at.max(remote.updated_at),
                };
                self.save_local_state(&LocalEntityState {
                    record,
                    pending_operation: local.pending_operation.clone(),
                    created_locally: false,
                })
                .await?;
                // The server's copy becomes the rollback target if the
                // re-push later dead-letters.
                self.save_baseline(
                    entity_id,
                    &Baseline {
                        prior: Some(remote.clone()),
                    },
                )
                .await?;
            }
            ResolutionOutcome::Deferred => {
                // Handled by the caller; nothing to apply.
            }
        }

        debug!(entity_id = %entity_id, outcome = ?resolution.outcome, "Resolved conflict");
        Ok(())
    }

    // =========================================================================
    // Push
    // =========================================================================

    /// Enqueues every dirty record that has no outstanding operation.
    /// Catch-up path for edits whose enqueue failed, and for records left
    /// dirty by a local-wins resolution.
    pub async fn push(&self, queue: &OperationQueue) -> SyncResult<usize> {
        let mut pushed = 0usize;

        for state in self.all_local_states().await? {
            if state.pending_operation.is_some() {
                continue;
            }
            if self.baseline(&state.record.entity_id).await?.is_none() {
                continue; // clean
            }
            if self.open_conflict(&state.record.entity_id).await?.is_some() {
                continue; // blocked
            }

            let kind = if state.record.deleted {
                OperationKind::Delete
            } else if state.created_locally {
                OperationKind::Create
            } else {
                OperationKind::Update
            };

            let operation = queue
                .enqueue(EnqueueRequest {
                    entity_type: state.record.entity_type,
                    entity_id: state.record.entity_id.clone(),
                    kind,
                    payload: match kind {
                        OperationKind::Delete => None,
                        _ => Some(state.record.data.clone()),
                    },
                    priority: None,
                })
                .await?;

            self.save_local_state(&LocalEntityState {
                record: state.record,
                pending_operation: Some(operation.id),
                created_locally: state.created_locally,
            })
            .await?;
            pushed += 1;
        }

        Ok(pushed)
    }

    // =========================================================================
    // Reconcile
    // =========================================================================

    /// One full pull-then-push cycle. The checkpoint advances only when
    /// both phases complete; any failure leaves it untouched so the next
    /// cycle re-covers the same window.
    pub async fn reconcile(
        &self,
        queue: &OperationQueue,
        remote: &dyn RemoteSyncClient,
    ) -> SyncResult<SyncReport> {
        let mut checkpoint = self.checkpoint().await?;

        let pull = self.pull(remote, checkpoint.server_cursor.clone()).await?;
        let pushed = self.push(queue).await?;

        checkpoint.server_cursor = pull.next_cursor.clone();
        checkpoint.last_reconciled_at = Some(self.clock.now());
        self.save_checkpoint(&checkpoint).await?;

        let report = SyncReport {
            pulled: pull.applied,
            pushed,
            deferred_conflicts: pull.deferred_conflicts,
        };

        info!(
            scope_id = %self.scope_id,
            pulled = report.pulled,
            pushed = report.pushed,
            deferred_conflicts = report.deferred_conflicts,
            "Reconcile cycle complete"
        );
        Ok(report)
    }

    // =========================================================================
    // Operation Outcome Hooks (called by the orchestrator)
    // =========================================================================

    /// The remote acknowledged an operation: the server's post-apply state
    /// becomes local truth, the baseline is dropped, and the watermark
    /// advances.
    ///
    /// When newer edits have stacked on top (the pending operation id no
    /// longer matches), local state keeps the newer work; the server's
    /// post-apply state only replaces the rollback baseline.
    pub async fn handle_operation_ack(
        &self,
        operation: &Operation,
        server_record: &ChangeRecord,
    ) -> SyncResult<()> {
        let entity_id = &operation.entity_id;

        match self.local_state(entity_id).await? {
            Some(local)
                if local.pending_operation.as_deref() == Some(operation.id.as_str()) =>
            {
                self.save_local_state(&LocalEntityState {
                    record: server_record.clone(),
                    pending_operation: None,
                    created_locally: false,
                })
                .await?;
                self.delete_baseline(entity_id).await?;
            }
            Some(mut local) => {
                // The server holds this entity now; stacked work stays in
                // place and the acked state becomes its rollback target.
                if local.created_locally {
                    local.created_locally = false;
                    self.save_local_state(&local).await?;
                }
                self.save_baseline(
                    entity_id,
                    &Baseline {
                        prior: Some(server_record.clone()),
                    },
                )
                .await?;
            }
            None => {}
        }

        let mut checkpoint = self.checkpoint().await?;
        if server_record.version > checkpoint.local_version_watermark {
            checkpoint.local_version_watermark = server_record.version;
            self.save_checkpoint(&checkpoint).await?;
        }

        debug!(entity_id = %entity_id, operation_id = %operation.id, "Operation acknowledged");
        Ok(())
    }

    /// The remote rejected an operation because its copy diverged. Routed
    /// through the resolver exactly like a pull-side conflict.
    pub async fn handle_operation_conflict(
        &self,
        operation: &Operation,
        server_record: &ChangeRecord,
    ) -> SyncResult<()> {
        let local = match self.local_state(&operation.entity_id).await? {
            Some(mut local) => {
                if local.pending_operation.as_deref() == Some(operation.id.as_str()) {
                    local.pending_operation = None;
                }
                local
            }
            // Local state evaporated (should not happen); take the server's.
            None => {
                warn!(
                    entity_id = %operation.entity_id,
                    "Conflict reported for entity with no local state"
                );
                self.save_local_state(&LocalEntityState {
                    record: server_record.clone(),
                    pending_operation: None,
                    created_locally: false,
                })
                .await?;
                return Ok(());
            }
        };

        self.save_local_state(&local).await?;
        self.handle_conflict(local, server_record.clone()).await?;
        Ok(())
    }

    /// An operation dead-lettered: undo its optimistic effect.
    ///
    /// If the operation is still the entity's pending one, local state
    /// rolls back to the baseline. If newer edits have stacked on top,
    /// rollback would destroy them, so the failure surfaces as a manual
    /// conflict instead of silently losing data.
    pub async fn handle_operation_failure(&self, operation: &Operation) -> SyncResult<()> {
        let entity_id = &operation.entity_id;

        let Some(local) = self.local_state(entity_id).await? else {
            return Ok(());
        };

        if local.pending_operation.as_deref() == Some(operation.id.as_str()) {
            let baseline = self.baseline(entity_id).await?;
            match baseline.and_then(|b| b.prior) {
                Some(prior) => {
                    self.save_local_state(&LocalEntityState {
                        record: prior,
                        pending_operation: None,
                        created_locally: false,
                    })
                    .await?;
                }
                None => {
                    self.delete_local_state(entity_id).await?;
                }
            }
            self.delete_baseline(entity_id).await?;
            info!(
                entity_id = %entity_id,
                operation_id = %operation.id,
                "Rolled back optimistic edit after dead-letter"
            );
            return Ok(());
        }

        // Deferred rollback: newer local work exists on this entity.
        let baseline_record = self
            .baseline(entity_id)
            .await?
            .and_then(|b| b.prior)
            .unwrap_or_else(|| ChangeRecord {
                entity_id: entity_id.clone(),
                entity_type: operation.entity_type,
                version: 0,
                data: Value::Null,
                deleted: true,
                updated_at: operation.created_at,
            });

        let conflict =
            self.build_conflict(&local.record, &baseline_record, fable_core::ResolutionStrategy::Manual);
        self.save_conflict(&conflict).await?;
        warn!(
            entity_id = %entity_id,
            operation_id = %operation.id,
            conflict_id = %conflict.id,
            "Dead-lettered operation has stacked edits; surfaced as manual conflict"
        );
        Ok(())
    }

    // =========================================================================
    // Conflict Inspection & Manual Resolution
    // =========================================================================

    /// Open conflicts for this scope, oldest first.
    pub async fn list_conflicts(&self) -> SyncResult<Vec<ConflictRecord>> {
        let prefix = keys::conflict_prefix(&self.scope_id);
        let mut conflicts = Vec::new();

        for key in self.store.list_by_prefix(&prefix).await? {
            if let Some(conflict) = get_record::<ConflictRecord>(self.store.as_ref(), &key).await? {
                conflicts.push(conflict);
            }
        }

        conflicts.sort_by(|a, b| a.detected_at.cmp(&b.detected_at).then(a.id.cmp(&b.id)));
        Ok(conflicts)
    }

    pub async fn conflict_count(&self) -> SyncResult<usize> {
        let prefix = keys::conflict_prefix(&self.scope_id);
        Ok(self.store.list_by_prefix(&prefix).await?.len())
    }

    /// Applies the user's chosen state for a manually-deferred conflict.
    /// The chosen state becomes a dirty local record (pushed next cycle)
    /// and the entity is unblocked.
    pub async fn resolve_manual(
        &self,
        entity_id: &str,
        chosen_data: Value,
    ) -> SyncResult<ChangeRecord> {
        let Some(conflict) = self.open_conflict(entity_id).await? else {
            return Err(SyncError::UnknownConflict {
                id: entity_id.to_string(),
            });
        };

        let created_locally = self
            .local_state(entity_id)
            .await?
            .is_some_and(|s| s.created_locally);

        let record = ChangeRecord {
            entity_id: entity_id.to_string(),
            entity_type: conflict.entity_type,
            version: conflict
                .local_change
                .version
                .max(conflict.remote_change.version)
                + 1,
            deleted: chosen_data == Value::Null,
            data: chosen_data,
            updated_at: self.clock.now(),
        };

        self.save_local_state(&LocalEntityState {
            record: record.clone(),
            pending_operation: None,
            created_locally,
        })
        .await?;
        self.save_baseline(
            entity_id,
            &Baseline {
                prior: Some(conflict.remote_change.clone()),
            },
        )
        .await?;
        self.delete_conflict(entity_id).await?;

        info!(entity_id = %entity_id, conflict_id = %conflict.id, "Conflict resolved manually");
        Ok(record)
    }

    // =========================================================================
    // Local State Access
    // =========================================================================

    /// The scope's current local view of one entity.
    pub async fn local_state(&self, entity_id: &str) -> SyncResult<Option<LocalEntityState>> {
        let key = keys::entity_key(&self.scope_id, entity_id);
        Ok(get_record(self.store.as_ref(), &key).await?)
    }

    async fn all_local_states(&self) -> SyncResult<Vec<LocalEntityState>> {
        let prefix = keys::entity_prefix(&self.scope_id);
        let mut states = Vec::new();
        for key in self.store.list_by_prefix(&prefix).await? {
            if let Some(state) = get_record::<LocalEntityState>(self.store.as_ref(), &key).await? {
                states.push(state);
            }
        }
        states.sort_by(|a, b| a.record.entity_id.cmp(&b.record.entity_id));
        Ok(states)
    }

    async fn save_local_state(&self, state: &LocalEntityState) -> SyncResult<()> {
        let key = keys::entity_key(&self.scope_id, &state.record.entity_id);
        put_record(self.store.as_ref(), &key, state).await?;
        Ok(())
    }

    async fn delete_local_state(&self, entity_id: &str) -> SyncResult<()> {
        self.store
            .delete(&keys::entity_key(&self.scope_id, entity_id))
            .await?;
        Ok(())
    }

    async fn baseline(&self, entity_id: &str) -> SyncResult<Option<Baseline>> {
        let key = keys::baseline_key(&self.scope_id, entity_id);
        Ok(get_record(self.store.as_ref(), &key).await?)
    }

    async fn save_baseline(&self, entity_id: &str, baseline: &Baseline) -> SyncResult<()> {
        let key = keys::baseline_key(&self.scope_id, entity_id);
        put_record(self.store.as_ref(), &key, baseline).await?;
        Ok(())
    }

    async fn delete_baseline(&self, entity_id: &str) -> SyncResult<()> {
        self.store
            .delete(&keys::baseline_key(&self.scope_id, entity_id))
            .await?;
        Ok(())
    }

    async fn open_conflict(&self, entity_id: &str) -> SyncResult<Option<ConflictRecord>> {
        let key = keys::conflict_key(&self.scope_id, entity_id);
        Ok(get_record(self.store.as_ref(), &key).await?)
    }

    async fn save_conflict(&self, conflict: &ConflictRecord) -> SyncResult<()> {
        let key = keys::conflict_key(&self.scope_id, &conflict.entity_id);
        put_record(self.store.as_ref(), &key, conflict).await?;
        Ok(())
    }

    async fn delete_conflict(&self, entity_id: &str) -> SyncResult<()> {
        self.store
            .delete(&keys::conflict_key(&self.scope_id, entity_id))
            .await?;
        Ok(())
    }

    fn build_conflict(
        &self,
        local: &ChangeRecord,
        remote: &ChangeRecord,
        strategy: fable_core::ResolutionStrategy,
    ) -> ConflictRecord {
        ConflictRecord {
            id: Uuid::new_v4().to_string(),
            scope_id: self.scope_id.clone(),
            entity_id: local.entity_id.clone(),
            entity_type: local.entity_type,
            local_change: local.clone(),
            remote_change: remote.clone(),
            resolution_strategy: strategy,
            detected_at: self.clock.now(),
        }
    }
}

enum RemoteApplied {
    Applied,
    Deferred,
    Skipped,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrySettings;
    use crate::test_support::{
        failing_store, fixed_clock, update_request, ScriptedRemote,
    };
    use fable_core::{EntityType, ResolutionStrategy};
    use fable_store::MemoryStore;
    use serde_json::json;
    use std::sync::Arc;

    struct Fixture {
        queue: OperationQueue,
        delta: DeltaSyncService,
        clock: Arc<crate::clock::ManualClock>,
        store: Arc<MemoryStore>,
    }

    fn fixture() -> Fixture {
        fixture_with(ConflictResolver::default())
    }

    fn fixture_with(resolver: ConflictResolver) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = fixed_clock();
        let queue = OperationQueue::new(
            "p1",
            store.clone(),
            clock.clone(),
            &RetrySettings::default(),
        );
        let delta = DeltaSyncService::new("p1", store.clone(), clock.clone(), resolver, 100);
        Fixture {
            queue,
            delta,
            clock,
            store,
        }
    }

    fn remote_record(entity_id: &str, version: i64, data: Value) -> ChangeRecord {
        ChangeRecord {
            entity_id: entity_id.into(),
            entity_type: EntityType::Character,
            version,
            data,
            deleted: false,
            updated_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_optimistic_edit_applies_immediately() {
        let f = fixture();

        let op = f
            .delta
            .apply_local_edit(&f.queue, update_request("char-1"))
            .await
            .unwrap();

        let local = f.delta.local_state("char-1").await.unwrap().unwrap();
        assert_eq!(local.record.version, 1);
        assert_eq!(local.pending_operation, Some(op.id));
        assert_eq!(f.queue.pending_count().await, 1);
    }

    #[tokio::test]
    async fn test_ack_clears_baseline_and_advances_watermark() {
        let f = fixture();

        let op = f
            .delta
            .apply_local_edit(&f.queue, update_request("char-1"))
            .await
            .unwrap();
        let server = remote_record("char-1", 1, json!({"name": "Ada"}));
        f.delta.handle_operation_ack(&op, &server).await.unwrap();

        let local = f.delta.local_state("char-1").await.unwrap().unwrap();
        assert!(local.pending_operation.is_none());
        assert_eq!(local.record, server);

        let checkpoint = f.delta.checkpoint().await.unwrap();
        assert_eq!(checkpoint.local_version_watermark, 1);
    }

    #[tokio::test]
    async fn test_ack_with_stacked_edits_keeps_newer_state() {
        let f = fixture();

        let op1 = f
            .delta
            .apply_local_edit(&f.queue, update_request("char-1"))
            .await
            .unwrap();
        let mut second = update_request("char-1");
        second.payload = Some(json!({"name": "Ada", "age": 36}));
        let op2 = f.delta.apply_local_edit(&f.queue, second).await.unwrap();

        // Acking op1 while op2 is still queued must not clobber op2's state.
        let server = remote_record("char-1", 1, json!({"name": "Ada"}));
        f.delta.handle_operation_ack(&op1, &server).await.unwrap();

        let local = f.delta.local_state("char-1").await.unwrap().unwrap();
        assert_eq!(local.record.data, json!({"name": "Ada", "age": 36}));
        assert_eq!(local.pending_operation, Some(op2.id.clone()));

        // op2 is still pending, so the catch-up push enqueues nothing.
        assert_eq!(f.delta.push(&f.queue).await.unwrap(), 0);

        // The acked server state is now op2's rollback target.
        f.delta.handle_operation_failure(&op2).await.unwrap();
        let local = f.delta.local_state("char-1").await.unwrap().unwrap();
        assert_eq!(local.record, server);
    }

    #[tokio::test]
    async fn test_dead_letter_rolls_back_to_baseline() {
        let f = fixture();

        // Seed a clean, synced record.
        let op = f
            .delta
            .apply_local_edit(&f.queue, update_request("char-1"))
            .await
            .unwrap();
        let synced = remote_record("char-1", 1, json!({"name": "Ada"}));
        f.delta.handle_operation_ack(&op, &synced).await.unwrap();

        // Edit optimistically, then dead-letter the carrying operation.
        let op2 = f
            .delta
            .apply_local_edit(&f.queue, update_request("char-1"))
            .await
            .unwrap();
        f.delta.handle_operation_failure(&op2).await.unwrap();

        let local = f.delta.local_state("char-1").await.unwrap().unwrap();
        assert_eq!(local.record, synced); // rolled back
        assert!(local.pending_operation.is_none());
    }

    #[tokio::test]
    async fn test_dead_letter_on_create_removes_entity() {
        let f = fixture();

        let op = f
            .delta
            .apply_local_edit(&f.queue, update_request("char-new"))
            .await
            .unwrap();
        f.delta.handle_operation_failure(&op).await.unwrap();

        assert!(f.delta.local_state("char-new").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stacked_edits_defer_rollback_as_manual_conflict() {
        let f = fixture();

        let op1 = f
            .delta
            .apply_local_edit(&f.queue, update_request("char-1"))
            .await
            .unwrap();
        // A second edit stacks before the first resolves.
        let mut second = update_request("char-1");
        second.payload = Some(json!({"name": "Ada", "age": 36}));
        f.delta.apply_local_edit(&f.queue, second).await.unwrap();

        // Dead-lettering op1 must not destroy the second edit.
        f.delta.handle_operation_failure(&op1).await.unwrap();

        let conflicts = f.delta.list_conflicts().await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].entity_id, "char-1");
        assert_eq!(
            conflicts[0].resolution_strategy,
            ResolutionStrategy::Manual
        );

        let local = f.delta.local_state("char-1").await.unwrap().unwrap();
        assert_eq!(local.record.data, json!({"name": "Ada", "age": 36}));
    }

    #[tokio::test]
    async fn test_pull_applies_clean_changes() {
        let f = fixture();
        let remote = ScriptedRemote::new();
        remote.push_page(
            vec![remote_record("char-1", 3, json!({"name": "Grace"}))],
            Some("cursor-1"),
        );

        let summary = f.delta.pull(remote.as_client(), None).await.unwrap();
        assert_eq!(summary.applied, 1);
        assert_eq!(summary.next_cursor.as_deref(), Some("cursor-1"));

        let local = f.delta.local_state("char-1").await.unwrap().unwrap();
        assert_eq!(local.record.version, 3);
    }

    #[tokio::test]
    async fn test_pull_is_idempotent() {
        let f = fixture();
        let remote = ScriptedRemote::new();
        let record = remote_record("char-1", 3, json!({"name": "Grace"}));
        remote.push_page(vec![record.clone()], Some("c1"));
        remote.push_page(vec![record], Some("c1"));

        let first = f.delta.pull(remote.as_client(), None).await.unwrap();
        assert_eq!(first.applied, 1);

        // Replaying the same window applies nothing new.
        let second = f.delta.pull(remote.as_client(), None).await.unwrap();
        assert_eq!(second.applied, 0);
    }

    #[tokio::test]
    async fn test_pull_conflict_on_unsynced_local_edit_defers_under_manual() {
        // Scenario: local unsynced edit + remote change for the same
        // entity under Manual strategy blocks the entity.
        let f = fixture_with(ConflictResolver::new(ResolutionStrategy::Manual));

        f.delta
            .apply_local_edit(&f.queue, update_request("char-1"))
            .await
            .unwrap();

        let remote = ScriptedRemote::new();
        remote.push_page(
            vec![remote_record("char-1", 5, json!({"name": "Grace"}))],
            Some("c1"),
        );

        let summary = f.delta.pull(remote.as_client(), None).await.unwrap();
        assert_eq!(summary.deferred_conflicts, 1);

        // Entity blocked: further edits are refused, later pulls skip it.
        let err = f
            .delta
            .apply_local_edit(&f.queue, update_request("char-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Fatal(_)));

        remote.push_page(
            vec![remote_record("char-1", 6, json!({"name": "Hopper"}))],
            Some("c2"),
        );
        let blocked = f.delta.pull(remote.as_client(), None).await.unwrap();
        assert_eq!(blocked.applied, 0);
    }

    #[tokio::test]
    async fn test_pull_folds_newer_remote_into_open_conflict() {
        let f = fixture_with(ConflictResolver::new(ResolutionStrategy::Manual));

        f.delta
            .apply_local_edit(&f.queue, update_request("char-1"))
            .await
            .unwrap();

        let remote = ScriptedRemote::new();
        remote.push_page(
            vec![remote_record("char-1", 5, json!({"name": "Grace"}))],
            Some("c1"),
        );
        f.delta.pull(remote.as_client(), None).await.unwrap();

        // A newer server copy arrives while the entity is blocked. The
        // cursor moves on, so the copy must land in the stored conflict.
        remote.push_page(
            vec![remote_record("char-1", 6, json!({"name": "Hopper"}))],
            Some("c2"),
        );
        let summary = f.delta.pull(remote.as_client(), Some("c1".into())).await.unwrap();
        assert_eq!(summary.applied, 0);
        assert_eq!(summary.next_cursor.as_deref(), Some("c2"));

        let conflicts = f.delta.list_conflicts().await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].remote_change.version, 6);
        assert_eq!(conflicts[0].remote_change.data, json!({"name": "Hopper"}));

        // Resolving picks a version above the folded copy.
        let record = f
            .delta
            .resolve_manual("char-1", json!({"name": "Hopper"}))
            .await
            .unwrap();
        assert_eq!(record.version, 7);
    }

    #[tokio::test]
    async fn test_pull_conflict_resolves_immediately_under_lww() {
        let f = fixture(); // default LWW

        f.delta
            .apply_local_edit(&f.queue, update_request("char-1"))
            .await
            .unwrap();

        // Remote change with a later timestamp wins.
        f.clock.advance_ms(5_000);
        let mut newer = remote_record("char-1", 5, json!({"name": "Grace"}));
        newer.updated_at = f.clock.now();

        let remote = ScriptedRemote::new();
        remote.push_page(vec![newer], Some("c1"));

        let summary = f.delta.pull(remote.as_client(), None).await.unwrap();
        assert_eq!(summary.applied, 1);
        assert_eq!(summary.deferred_conflicts, 0);

        let local = f.delta.local_state("char-1").await.unwrap().unwrap();
        assert_eq!(local.record.data, json!({"name": "Grace"}));
    }

    #[tokio::test]
    async fn test_manual_resolution_unblocks_entity() {
        let f = fixture_with(ConflictResolver::new(ResolutionStrategy::Manual));

        f.delta
            .apply_local_edit(&f.queue, update_request("char-1"))
            .await
            .unwrap();
        let remote = ScriptedRemote::new();
        remote.push_page(
            vec![remote_record("char-1", 5, json!({"name": "Grace"}))],
            Some("c1"),
        );
        f.delta.pull(remote.as_client(), None).await.unwrap();
        assert_eq!(f.delta.conflict_count().await.unwrap(), 1);

        let chosen = json!({"name": "Grace Hopper"});
        let record = f
            .delta
            .resolve_manual("char-1", chosen.clone())
            .await
            .unwrap();
        assert_eq!(record.version, 6); // above both sides
        assert_eq!(f.delta.conflict_count().await.unwrap(), 0);

        // The chosen state is dirty and gets pushed next cycle.
        let pushed = f.delta.push(&f.queue).await.unwrap();
        assert_eq!(pushed, 1);
    }

    #[tokio::test]
    async fn test_push_resends_unacked_create_as_create() {
        let f = fixture();

        // A locally-created entity whose enqueue failed: dirty, no
        // pending operation, never seen by the server.
        f.delta
            .save_local_state(&LocalEntityState {
                record: remote_record("char-new", 1, json!({"name": "Ada"})),
                pending_operation: None,
                created_locally: true,
            })
            .await
            .unwrap();
        f.delta
            .save_baseline("char-new", &Baseline { prior: None })
            .await
            .unwrap();

        let pushed = f.delta.push(&f.queue).await.unwrap();
        assert_eq!(pushed, 1);

        let op = f.queue.dequeue_next().await.unwrap().unwrap();
        assert_eq!(op.kind, OperationKind::Create);
        assert_eq!(op.entity_id, "char-new");
    }

    #[tokio::test]
    async fn test_resolve_manual_unknown_conflict() {
        let f = fixture();
        let err = f
            .delta
            .resolve_manual("ghost", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::UnknownConflict { .. }));
    }

    #[tokio::test]
    async fn test_reconcile_advances_checkpoint() {
        let f = fixture();
        let remote = ScriptedRemote::new();
        remote.push_page(
            vec![remote_record("char-1", 3, json!({"name": "Grace"}))],
            Some("cursor-9"),
        );

        let report = f.delta.reconcile(&f.queue, remote.as_client()).await.unwrap();
        assert_eq!(report.pulled, 1);

        let checkpoint = f.delta.checkpoint().await.unwrap();
        assert_eq!(checkpoint.server_cursor.as_deref(), Some("cursor-9"));
        assert_eq!(checkpoint.last_reconciled_at, Some(f.clock.now()));
    }

    #[tokio::test]
    async fn test_checkpoint_untouched_when_push_fails() {
        // Scenario: pull succeeds, push hits a storage error; the cursor
        // must not advance.
        let (store, trip) = failing_store();
        let clock = fixed_clock();
        let queue = OperationQueue::new(
            "p1",
            store.clone(),
            clock.clone(),
            &RetrySettings::default(),
        );
        let delta = DeltaSyncService::new(
            "p1",
            store.clone(),
            clock.clone(),
            ConflictResolver::default(),
            100,
        );

        // A dirty record with no pending operation (its enqueue failed
        // earlier), so the push phase has work to do.
        delta
            .save_local_state(&LocalEntityState {
                record: remote_record("char-1", 2, json!({"name": "Ada"})),
                pending_operation: None,
                created_locally: false,
            })
            .await
            .unwrap();
        delta
            .save_baseline("char-1", &Baseline { prior: None })
            .await
            .unwrap();

        let remote = ScriptedRemote::new();
        remote.push_page(vec![], Some("cursor-should-not-land"));

        trip.fail_writes(true);
        let err = delta.reconcile(&queue, remote.as_client()).await;
        assert!(err.is_err());

        trip.fail_writes(false);
        let checkpoint = delta.checkpoint().await.unwrap();
        assert!(checkpoint.server_cursor.is_none());
        assert!(checkpoint.last_reconciled_at.is_none());
    }

    #[tokio::test]
    async fn test_pull_paginates() {
        let f = fixture();
        let remote = ScriptedRemote::new();

        // Small page size service.
        let delta = DeltaSyncService::new(
            "p1",
            f.store.clone(),
            f.clock.clone(),
            ConflictResolver::default(),
            2,
        );

        remote.push_page(
            vec![
                remote_record("a", 1, json!({})),
                remote_record("b", 1, json!({})),
            ],
            Some("c1"),
        );
        remote.push_page(vec![remote_record("c", 1, json!({}))], Some("c2"));

        let summary = delta.pull(remote.as_client(), None).await.unwrap();
        assert_eq!(summary.applied, 3);
        assert_eq!(summary.next_cursor.as_deref(), Some("c2"));
    }
}
