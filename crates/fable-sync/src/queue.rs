//! # Operation Queue
//!
//! Durable, priority-ordered queue of pending local operations. Owns retry
//! and backoff scheduling, dead-lettering, and crash recovery.
//!
//! ## Queue Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Operation Queue Flow                               │
//! │                                                                         │
//! │  enqueue(edit) ──▶ validate ──▶ persist queue/<scope>/<id> ──▶ Pending  │
//! │                                                                         │
//! │  dequeue_next():                                                        │
//! │    eligible = Pending|Failed  AND  next_eligible_at <= now              │
//! │               AND entity has no in-flight op                            │
//! │               AND no earlier live op targets the same entity            │
//! │    pick min(priority, created_at, id) ──▶ mark InFlight                 │
//! │                                                                         │
//! │  report_success(id)        ──▶ delete from storage (Completed)          │
//! │  report_failure(id, false) ──▶ attempts += 1,                           │
//! │                                next_eligible_at = now + backoff         │
//! │  report_failure(id, true)  ──▶ DeadLettered (retained, surfaced)        │
//! │                                                                         │
//! │  restore_from_persistence() ──▶ reload all, InFlight ⇒ Pending          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Guarantees
//! - Priority order, FIFO (`created_at`) within a priority band
//! - At most one in-flight operation per entity
//! - Same-entity operations execute in `created_at` order even across
//!   retries: a failed earlier operation gates every later one on that
//!   entity until it completes or dead-letters
//! - Persist-then-mutate: in-memory state never runs ahead of durable
//!   state, so a storage failure leaves the queue exactly where it was

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use fable_core::{
    validate_enqueue, BackoffPolicy, EntityType, Operation, OperationKind, OperationStatus,
};
use fable_store::{get_record, keys, put_record, KvStore};

use crate::clock::Clock;
use crate::config::RetrySettings;
use crate::error::{SyncError, SyncResult};

// =============================================================================
// Enqueue Request
// =============================================================================

/// Caller input for a new operation. Missing id/timestamp/priority are
/// auto-assigned; only genuinely bad input is rejected.
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub kind: OperationKind,
    pub payload: Option<Value>,
    /// Lower value = served first. Defaults by kind (delete < update < create).
    pub priority: Option<i32>,
}

// =============================================================================
// Operation Queue
// =============================================================================

/// Durable, priority-ordered operation queue for one scope.
pub struct OperationQueue {
    scope_id: String,
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    policy: BackoffPolicy,
    max_attempts: u32,
    state: RwLock<QueueState>,
}

#[derive(Default)]
struct QueueState {
    /// Every non-completed operation, by id.
    operations: HashMap<String, Operation>,

    /// entity_id -> operation id currently executing.
    in_flight: HashMap<String, String>,
}

impl OperationQueue {
    /// Creates an empty queue. Call [`restore_from_persistence`] before
    /// first use to recover surviving operations.
    ///
    /// [`restore_from_persistence`]: OperationQueue::restore_from_persistence
    pub fn new(
        scope_id: impl Into<String>,
        store: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
        retry: &RetrySettings,
    ) -> Self {
        OperationQueue {
            scope_id: scope_id.into(),
            store,
            clock,
            policy: retry.backoff_policy(),
            max_attempts: retry.max_attempts,
            state: RwLock::new(QueueState::default()),
        }
    }

    /// The scope this queue serves.
    pub fn scope_id(&self) -> &str {
        &self.scope_id
    }

    // =========================================================================
    // Enqueue
    // =========================================================================

    /// Validates, persists, and admits a new operation. Never touches the
    /// network; fails only on invalid input or storage I/O error.
    pub async fn enqueue(&self, request: EnqueueRequest) -> SyncResult<Operation> {
        validate_enqueue(
            &self.scope_id,
            &request.entity_id,
            request.kind,
            request.payload.as_ref(),
        )?;

        let now = self.clock.now();
        let operation = Operation {
            id: Uuid::new_v4().to_string(),
            scope_id: self.scope_id.clone(),
            entity_type: request.entity_type,
            entity_id: request.entity_id,
            kind: request.kind,
            payload: request.payload,
            priority: request
                .priority
                .unwrap_or_else(|| request.kind.default_priority()),
            created_at: now,
            attempts: 0,
            next_eligible_at: now,
            status: OperationStatus::Pending,
            last_error: None,
            attempted_at: None,
        };

        let mut state = self.state.write().await;
        self.persist(&operation).await?;
        state.operations.insert(operation.id.clone(), operation.clone());

        debug!(
            id = %operation.id,
            entity_id = %operation.entity_id,
            kind = %operation.kind,
            priority = operation.priority,
            "Enqueued operation"
        );

        Ok(operation)
    }

    // =========================================================================
    // Dequeue
    // =========================================================================

    /// Hands out the highest-priority eligible operation, marking it
    /// in-flight. Returns `None` when nothing is eligible right now.
    ///
    /// Eligibility: dequeueable status, backoff gate passed, no in-flight
    /// operation on the same entity, and no earlier live operation on the
    /// same entity (even one still waiting out its backoff - same-entity
    /// order is sacred).
    pub async fn dequeue_next(&self) -> SyncResult<Option<Operation>> {
        let now = self.clock.now();
        let mut state = self.state.write().await;

        let candidate = state
            .operations
            .values()
            .filter(|op| op.is_eligible_at(now))
            .filter(|op| !state.in_flight.contains_key(&op.entity_id))
            .filter(|op| Self::is_entity_head(&state.operations, op))
            .min_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then(a.created_at.cmp(&b.created_at))
                    .then(a.id.cmp(&b.id))
            })
            .cloned();

        let Some(mut operation) = candidate else {
            return Ok(None);
        };

        operation.status = OperationStatus::InFlight;
        operation.attempted_at = Some(now);

        self.persist(&operation).await?;
        state
            .in_flight
            .insert(operation.entity_id.clone(), operation.id.clone());
        state
            .operations
            .insert(operation.id.clone(), operation.clone());

        debug!(id = %operation.id, entity_id = %operation.entity_id, "Dequeued operation");
        Ok(Some(operation))
    }

    /// Whether `candidate` is the earliest live operation for its entity.
    fn is_entity_head(operations: &HashMap<String, Operation>, candidate: &Operation) -> bool {
        !operations.values().any(|other| {
            other.id != candidate.id
                && other.entity_id == candidate.entity_id
                && !other.status.is_terminal()
                && (other.created_at, &other.id) < (candidate.created_at, &candidate.id)
        })
    }

    // =========================================================================
    // Outcome Reporting
    // =========================================================================

    /// Confirms an in-flight operation and removes it from durable storage.
    pub async fn report_success(&self, id: &str) -> SyncResult<Operation> {
        let mut state = self.state.write().await;
        let mut operation = Self::take_in_flight(&state, id)?;

        self.store.delete(&self.key_for(id)).await?;

        operation.status = OperationStatus::Completed;
        state.in_flight.remove(&operation.entity_id);
        state.operations.remove(id);

        debug!(id = %id, entity_id = %operation.entity_id, "Operation completed");
        Ok(operation)
    }

    /// Records a failed attempt.
    ///
    /// Transient failures go back to the queue with an advanced backoff
    /// gate; fatal failures (or exhausted attempts) dead-letter. The
    /// operation's `created_at` never changes, preserving same-entity order
    /// across retries.
    pub async fn report_failure(
        &self,
        id: &str,
        fatal: bool,
        message: &str,
    ) -> SyncResult<Operation> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        let mut operation = Self::take_in_flight(&state, id)?;

        operation.attempts += 1;
        operation.attempted_at = Some(now);
        operation.last_error = Some(message.to_string());

        if fatal || operation.attempts >= self.max_attempts {
            operation.status = OperationStatus::DeadLettered;
            warn!(
                id = %id,
                entity_id = %operation.entity_id,
                attempts = operation.attempts,
                fatal,
                error = %message,
                "Operation dead-lettered"
            );
        } else {
            let delay = self.policy.delay_for(operation.attempts, &operation.id);
            operation.status = OperationStatus::Failed;
            operation.next_eligible_at = now + ChronoDuration::milliseconds(delay.as_millis() as i64);
            debug!(
                id = %id,
                attempts = operation.attempts,
                retry_in_ms = delay.as_millis() as u64,
                error = %message,
                "Operation scheduled for retry"
            );
        }

        self.persist(&operation).await?;
        state.in_flight.remove(&operation.entity_id);
        state.operations.insert(id.to_string(), operation.clone());

        Ok(operation)
    }

    fn take_in_flight(state: &QueueState, id: &str) -> SyncResult<Operation> {
        let operation = state
            .operations
            .get(id)
            .ok_or_else(|| SyncError::UnknownOperation { id: id.to_string() })?;

        if operation.status != OperationStatus::InFlight {
            return Err(SyncError::InvalidTransition {
                id: id.to_string(),
                status: format!("{:?}", operation.status),
                expected: "InFlight".into(),
            });
        }

        Ok(operation.clone())
    }

    // =========================================================================
    // Dead-Letter Recovery
    // =========================================================================

    /// Lists dead-lettered operations, oldest first.
    pub async fn list_dead_lettered(&self) -> Vec<Operation> {
        let state = self.state.read().await;
        let mut dead: Vec<Operation> = state
            .operations
            .values()
            .filter(|op| op.status == OperationStatus::DeadLettered)
            .cloned()
            .collect();
        dead.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        dead
    }

    /// Puts a dead-lettered operation back in rotation with a fresh
    /// attempt budget. Operator/user-triggered recovery path.
    pub async fn requeue(&self, id: &str) -> SyncResult<Operation> {
        let now = self.clock.now();
        let mut state = self.state.write().await;

        let mut operation = state
            .operations
            .get(id)
            .cloned()
            .ok_or_else(|| SyncError::UnknownOperation { id: id.to_string() })?;

        if operation.status != OperationStatus::DeadLettered {
            return Err(SyncError::InvalidTransition {
                id: id.to_string(),
                status: format!("{:?}", operation.status),
                expected: "DeadLettered".into(),
            });
        }

        operation.status = OperationStatus::Pending;
        operation.attempts = 0;
        operation.next_eligible_at = now;
        operation.last_error = None;

        self.persist(&operation).await?;
        state.operations.insert(id.to_string(), operation.clone());

        info!(id = %id, entity_id = %operation.entity_id, "Requeued dead-lettered operation");
        Ok(operation)
    }

    // =========================================================================
    // Crash Recovery
    // =========================================================================

    /// Loads all surviving operations from storage. Called once at startup.
    ///
    /// An operation that was in flight at crash time has an unknown
    /// outcome; it is reset to `Pending` and re-executed, relying on the
    /// remote's idempotency key (the operation id) to prevent duplicate
    /// effects.
    pub async fn restore_from_persistence(&self) -> SyncResult<usize> {
        let prefix = keys::queue_prefix(&self.scope_id);
        let stored_keys = self.store.list_by_prefix(&prefix).await?;

        let mut restored = QueueState::default();
        let mut reset_count = 0usize;

        for key in stored_keys {
            let Some(mut operation) = get_record::<Operation>(self.store.as_ref(), &key).await?
            else {
                continue;
            };

            match operation.status {
                OperationStatus::InFlight => {
                    operation.status = OperationStatus::Pending;
                    self.persist(&operation).await?;
                    reset_count += 1;
                }
                OperationStatus::Completed => {
                    // Should have been deleted on completion; clean up.
                    self.store.delete(&key).await?;
                    continue;
                }
                _ => {}
            }

            restored
                .operations
                .insert(operation.id.clone(), operation);
        }

        let total = restored.operations.len();
        *self.state.write().await = restored;

        info!(
            scope_id = %self.scope_id,
            operations = total,
            reset_in_flight = reset_count,
            "Restored operation queue"
        );

        Ok(total)
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Operations still waiting to be confirmed (pending, retrying, or in
    /// flight).
    pub async fn pending_count(&self) -> usize {
        let state = self.state.read().await;
        state
            .operations
            .values()
            .filter(|op| !op.status.is_terminal())
            .count()
    }

    /// Number of dead-lettered operations.
    pub async fn dead_letter_count(&self) -> usize {
        let state = self.state.read().await;
        state
            .operations
            .values()
            .filter(|op| op.status == OperationStatus::DeadLettered)
            .count()
    }

    // =========================================================================
    // Persistence Helpers
    // =========================================================================

    fn key_for(&self, operation_id: &str) -> String {
        keys::queue_key(&self.scope_id, operation_id)
    }

    async fn persist(&self, operation: &Operation) -> SyncResult<()> {
        put_record(self.store.as_ref(), &self.key_for(&operation.id), operation).await?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
