//! # Sync Engine
//!
//! The embedder-facing facade. Owns one background orchestrator per
//! attached scope and exposes the full surface the application shell
//! needs: submitting edits, triggering sync, inspecting status, and
//! working through dead letters and conflicts.
//!
//! ## Assembly
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           Sync Engine                                   │
//! │                                                                         │
//! │   SyncEngineBuilder ──▶ SyncEngine                                      │
//! │        │                    │                                           │
//! │        │   attach_scope ────┼──▶ OperationQueue ─┐                      │
//! │        │                    │    DeltaSyncService ├─▶ SyncOrchestrator  │
//! │        │                    │    (restore state)  ┘    (spawned task)   │
//! │        │                    │                                           │
//! │   application shell ──▶ enqueue_user_edit / resolve / requeue          │
//! │   network detection  ──▶ network_signal().set_online() / set_offline()  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use fable_core::{ChangeRecord, ConflictRecord, Operation};
use fable_store::KvStore;

use crate::clock::{Clock, SystemClock};
use crate::config::SyncConfig;
use crate::delta::DeltaSyncService;
use crate::error::{SyncError, SyncResult};
use crate::events::{NoOpEmitter, SyncEventEmitter};
use crate::network::{NetworkMonitor, NetworkSignal, NetworkState};
use crate::orchestrator::{OrchestratorHandle, SyncOrchestrator};
use crate::queue::{EnqueueRequest, OperationQueue};
use crate::remote::RemoteSyncClient;
use crate::resolver::ConflictResolver;

// =============================================================================
// Scope Status
// =============================================================================

/// Point-in-time sync health for one scope.
#[derive(Debug, Clone)]
pub struct ScopeSyncStatus {
    pub scope_id: String,
    /// Operations awaiting confirmation (pending, retrying, in flight).
    pub pending_count: usize,
    /// Operations parked in the dead-letter set.
    pub dead_letter_count: usize,
    /// Conflicts awaiting manual resolution.
    pub conflict_count: usize,
    /// When the last full reconcile cycle completed.
    pub last_reconciled_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Sync Engine
// =============================================================================

struct ScopeWorker {
    queue: Arc<OperationQueue>,
    delta: Arc<DeltaSyncService>,
    handle: OrchestratorHandle,
    task: JoinHandle<()>,
}

/// Top-level sync engine. One per application instance; scopes are
/// attached and detached as the user opens and closes projects.
pub struct SyncEngine {
    store: Arc<dyn KvStore>,
    remote: Arc<dyn RemoteSyncClient>,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    resolver: ConflictResolver,
    emitter: Arc<dyn SyncEventEmitter>,
    network_signal: NetworkSignal,
    network_monitor: NetworkMonitor,
    scopes: RwLock<HashMap<String, ScopeWorker>>,
}

impl SyncEngine {
    pub fn builder() -> SyncEngineBuilder {
        SyncEngineBuilder::default()
    }

    /// The connectivity input. The application shell's link detection
    /// reports transitions here.
    pub fn network_signal(&self) -> NetworkSignal {
        self.network_signal.clone()
    }

    // =========================================================================
    // Scope Lifecycle
    // =========================================================================

    /// Attaches a scope: restores its queue from storage and spawns its
    /// background orchestrator.
    pub async fn attach_scope(&self, scope_id: &str) -> SyncResult<()> {
        let mut scopes = self.scopes.write().await;
        if scopes.contains_key(scope_id) {
            return Err(SyncError::ScopeAlreadyAttached {
                scope_id: scope_id.to_string(),
            });
        }

        let queue = Arc::new(OperationQueue::new(
            scope_id,
            self.store.clone(),
            self.clock.clone(),
            &self.config.retry,
        ));
        let restored = queue.restore_from_persistence().await?;

        let delta = Arc::new(DeltaSyncService::new(
            scope_id,
            self.store.clone(),
            self.clock.clone(),
            self.resolver.clone(),
            self.config.cycle.pull_page_size,
        ));

        let (orchestrator, handle) = SyncOrchestrator::new(
            scope_id,
            queue.clone(),
            delta.clone(),
            self.remote.clone(),
            self.network_monitor.clone(),
            self.config.clone(),
            self.emitter.clone(),
        );
        let task = tokio::spawn(orchestrator.run());

        scopes.insert(
            scope_id.to_string(),
            ScopeWorker {
                queue,
                delta,
                handle,
                task,
            },
        );

        info!(scope_id = %scope_id, restored_operations = restored, "Scope attached");
        Ok(())
    }

    /// Detaches a scope, shutting its worker down cooperatively. Durable
    /// state is untouched; re-attaching resumes where it left off.
    pub async fn detach_scope(&self, scope_id: &str) -> SyncResult<()> {
        let worker = self
            .scopes
            .write()
            .await
            .remove(scope_id)
            .ok_or_else(|| SyncError::UnknownScope {
                scope_id: scope_id.to_string(),
            })?;

        if worker.handle.shutdown().await.is_err() {
            warn!(scope_id = %scope_id, "Worker already gone at detach");
        }
        let _ = worker.task.await;

        info!(scope_id = %scope_id, "Scope detached");
        Ok(())
    }

    /// Detaches every scope. Call before process exit.
    pub async fn shutdown(&self) {
        let scope_ids: Vec<String> = self.scopes.read().await.keys().cloned().collect();
        for scope_id in scope_ids {
            if let Err(e) = self.detach_scope(&scope_id).await {
                warn!(scope_id = %scope_id, error = %e, "Detach during shutdown failed");
            }
        }
    }

    // =========================================================================
    // Edits & Sync
    // =========================================================================

    /// Applies a user edit optimistically, queues it for push, and nudges
    /// the scope's worker.
    pub async fn enqueue_user_edit(
        &self,
        scope_id: &str,
        request: EnqueueRequest,
    ) -> SyncResult<Operation> {
        let (queue, delta, handle) = self.worker_parts(scope_id).await?;
        let operation = delta.apply_local_edit(&queue, request).await?;

        // Best-effort nudge; the periodic cycle covers a missed one.
        let _ = handle.trigger_sync().await;
        Ok(operation)
    }

    /// Requests an immediate sync cycle for a scope.
    pub async fn trigger_sync(&self, scope_id: &str) -> SyncResult<()> {
        let (_, _, handle) = self.worker_parts(scope_id).await?;
        handle.trigger_sync().await
    }

    /// Current sync health for a scope.
    pub async fn sync_status(&self, scope_id: &str) -> SyncResult<ScopeSyncStatus> {
        let (queue, delta, _) = self.worker_parts(scope_id).await?;
        let checkpoint = delta.checkpoint().await?;

        Ok(ScopeSyncStatus {
            scope_id: scope_id.to_string(),
            pending_count: queue.pending_count().await,
            dead_letter_count: queue.dead_letter_count().await,
            conflict_count: delta.conflict_count().await?,
            last_reconciled_at: checkpoint.last_reconciled_at,
        })
    }

    // =========================================================================
    // Dead Letters & Conflicts
    // =========================================================================

    /// Dead-lettered operations for a scope, oldest first.
    pub async fn list_dead_lettered(&self, scope_id: &str) -> SyncResult<Vec<Operation>> {
        let (queue, _, _) = self.worker_parts(scope_id).await?;
        Ok(queue.list_dead_lettered().await)
    }

    /// Puts a dead-lettered operation back in rotation and nudges the
    /// worker.
    pub async fn requeue_dead_lettered(
        &self,
        scope_id: &str,
        operation_id: &str,
    ) -> SyncResult<Operation> {
        let (queue, _, handle) = self.worker_parts(scope_id).await?;
        let operation = queue.requeue(operation_id).await?;
        let _ = handle.trigger_sync().await;
        Ok(operation)
    }

    /// Open conflicts for a scope, oldest first.
    pub async fn list_conflicts(&self, scope_id: &str) -> SyncResult<Vec<ConflictRecord>> {
        let (_, delta, _) = self.worker_parts(scope_id).await?;
        delta.list_conflicts().await
    }

    /// Applies the user's chosen state for a deferred conflict and nudges
    /// the worker to push it.
    pub async fn resolve_conflict_manually(
        &self,
        scope_id: &str,
        conflict_id: &str,
        chosen_data: Value,
    ) -> SyncResult<ChangeRecord> {
        let (_, delta, handle) = self.worker_parts(scope_id).await?;

        let conflict = delta
            .list_conflicts()
            .await?
            .into_iter()
            .find(|c| c.id == conflict_id)
            .ok_or_else(|| SyncError::UnknownConflict {
                id: conflict_id.to_string(),
            })?;

        let record = delta
            .resolve_manual(&conflict.entity_id, chosen_data)
            .await?;
        let _ = handle.trigger_sync().await;
        Ok(record)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn worker_parts(
        &self,
        scope_id: &str,
    ) -> SyncResult<(Arc<OperationQueue>, Arc<DeltaSyncService>, OrchestratorHandle)> {
        let scopes = self.scopes.read().await;
        let worker = scopes.get(scope_id).ok_or_else(|| SyncError::UnknownScope {
            scope_id: scope_id.to_string(),
        })?;
        Ok((
            worker.queue.clone(),
            worker.delta.clone(),
            worker.handle.clone(),
        ))
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Assembles a [`SyncEngine`]. `store` and `remote` are required; the
/// rest defaults to production values.
#[derive(Default)]
pub struct SyncEngineBuilder {
    store: Option<Arc<dyn KvStore>>,
    remote: Option<Arc<dyn RemoteSyncClient>>,
    clock: Option<Arc<dyn Clock>>,
    config: Option<SyncConfig>,
    resolver: Option<ConflictResolver>,
    emitter: Option<Arc<dyn SyncEventEmitter>>,
    initial_network: Option<NetworkState>,
}

impl SyncEngineBuilder {
    pub fn store(mut self, store: Arc<dyn KvStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn remote(mut self, remote: Arc<dyn RemoteSyncClient>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn resolver(mut self, resolver: ConflictResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn emitter(mut self, emitter: Arc<dyn SyncEventEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    /// Connectivity assumed before the shell reports anything. Defaults
    /// to online.
    pub fn initial_network(mut self, state: NetworkState) -> Self {
        self.initial_network = Some(state);
        self
    }

    pub fn build(self) -> SyncResult<SyncEngine> {
        let store = self
            .store
            .ok_or_else(|| SyncError::InvalidConfig("a store is required".into()))?;
        let remote = self
            .remote
            .ok_or_else(|| SyncError::InvalidConfig("a remote client is required".into()))?;

        let config = self.config.unwrap_or_default();
        config.validate()?;

        let (network_signal, network_monitor) =
            NetworkSignal::new(self.initial_network.unwrap_or(NetworkState::Online));

        Ok(SyncEngine {
            store,
            remote,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            config,
            resolver: self.resolver.unwrap_or_default(),
            emitter: self.emitter.unwrap_or_else(|| Arc::new(NoOpEmitter)),
            network_signal,
            network_monitor,
            scopes: RwLock::new(HashMap::new()),
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
