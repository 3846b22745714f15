//! # Sync Orchestrator
//!
//! Per-scope background worker. Thin by design: the queue owns ordering
//! and retry policy, the delta service owns reconciliation and conflict
//! handling; the orchestrator only decides WHEN to run them and keeps the
//! loop alive.
//!
//! ## Worker Loop
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Orchestrator Worker Loop                           │
//! │                                                                         │
//! │   tokio::select! {                                                      │
//! │       interval tick          ──▶ run_cycle()                            │
//! │       network went online    ──▶ run_cycle()   (catch-up)               │
//! │       TriggerSync command    ──▶ run_cycle()   (then coalesce extras)   │
//! │       shutdown               ──▶ break                                  │
//! │   }                                                                     │
//! │                                                                         │
//! │   run_cycle:                                                            │
//! │     offline ──▶ skip (queue accumulates, nothing is dropped)            │
//! │     reconcile (pull + push)     errors logged, never crash the loop     │
//! │     drain queue:                                                        │
//! │       dequeue ──▶ execute with bounded timeout                          │
//! │         Success   ──▶ ack                                               │
//! │         Conflict  ──▶ resolver (via delta service)                      │
//! │         Transient ──▶ report_failure(fatal: false), backoff             │
//! │         Fatal     ──▶ report_failure(fatal: true), rollback             │
//! │       checks shutdown between operations (cooperative)                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use fable_core::{Operation, OperationStatus};

use crate::config::SyncConfig;
use crate::delta::DeltaSyncService;
use crate::error::{SyncError, SyncResult};
use crate::events::SyncEventEmitter;
use crate::network::NetworkMonitor;
use crate::queue::OperationQueue;
use crate::remote::{ExecuteOutcome, RemoteSyncClient};

// =============================================================================
// Commands & Handle
// =============================================================================

/// Control messages accepted by a running orchestrator.
#[derive(Debug)]
pub enum OrchestratorCommand {
    /// Run a reconcile + drain cycle now instead of waiting for the timer.
    TriggerSync,
}

/// Cloneable control handle for a spawned orchestrator.
#[derive(Clone)]
pub struct OrchestratorHandle {
    command_tx: mpsc::Sender<OrchestratorCommand>,
    shutdown_tx: mpsc::Sender<()>,
}

impl OrchestratorHandle {
    /// Requests an immediate sync cycle. Cheap; redundant triggers are
    /// coalesced by the worker.
    pub async fn trigger_sync(&self) -> SyncResult<()> {
        self.command_tx
            .send(OrchestratorCommand::TriggerSync)
            .await
            .map_err(|_| SyncError::ShuttingDown)
    }

    /// Requests a cooperative shutdown. The worker finishes its current
    /// operation, never abandoning one mid-execution.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::ShuttingDown)
    }
}

// =============================================================================
// Sync Orchestrator
// =============================================================================

/// Background sync worker for one scope.
pub struct SyncOrchestrator {
    scope_id: String,
    queue: Arc<OperationQueue>,
    delta: Arc<DeltaSyncService>,
    remote: Arc<dyn RemoteSyncClient>,
    network: NetworkMonitor,
    config: SyncConfig,
    emitter: Arc<dyn SyncEventEmitter>,
    command_rx: mpsc::Receiver<OrchestratorCommand>,
    shutdown_rx: mpsc::Receiver<()>,
    network_closed: bool,
    stop_requested: bool,
}

impl SyncOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        scope_id: impl Into<String>,
        queue: Arc<OperationQueue>,
        delta: Arc<DeltaSyncService>,
        remote: Arc<dyn RemoteSyncClient>,
        network: NetworkMonitor,
        config: SyncConfig,
        emitter: Arc<dyn SyncEventEmitter>,
    ) -> (Self, OrchestratorHandle) {
        let (command_tx, command_rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let orchestrator = SyncOrchestrator {
            scope_id: scope_id.into(),
            queue,
            delta,
            remote,
            network,
            config,
            emitter,
            command_rx,
            shutdown_rx,
            network_closed: false,
            stop_requested: false,
        };

        (
            orchestrator,
            OrchestratorHandle {
                command_tx,
                shutdown_tx,
            },
        )
    }

    /// Runs the worker loop until shutdown. Spawn this on the runtime.
    pub async fn run(mut self) {
        info!(scope_id = %self.scope_id, "Sync orchestrator started");

        let mut interval = tokio::time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.run_cycle().await;
                }
                state = self.network.changed(), if !self.network_closed => {
                    match state {
                        Some(state) if state.is_online() => {
                            info!(scope_id = %self.scope_id, "Back online, starting catch-up cycle");
                            self.run_cycle().await;
                        }
                        Some(_) => {
                            debug!(scope_id = %self.scope_id, "Went offline, pausing sync");
                        }
                        None => {
                            // Signal side dropped; stay timer-driven.
                            self.network_closed = true;
                        }
                    }
                }
                command = self.command_rx.recv() => {
                    match command {
                        Some(OrchestratorCommand::TriggerSync) => {
                            self.run_cycle().await;
                            self.coalesce_triggers();
                        }
                        None => break,
                    }
                }
                _ = self.shutdown_rx.recv() => {
                    self.stop_requested = true;
                }
            }

            if self.stop_requested {
                break;
            }
        }

        info!(scope_id = %self.scope_id, "Sync orchestrator stopped");
    }

    /// Drops triggers that queued up while a cycle was running; the cycle
    /// that just finished already covered them.
    fn coalesce_triggers(&mut self) {
        while self.command_rx.try_recv().is_ok() {}
    }

    // =========================================================================
    // Sync Cycle
    // =========================================================================

    /// One reconcile + drain pass. Errors are contained here; nothing
    /// short of shutdown stops the loop.
    async fn run_cycle(&mut self) {
        if !self.network.is_online() {
            debug!(scope_id = %self.scope_id, "Offline, skipping sync cycle");
            return;
        }

        match self.delta.reconcile(&self.queue, self.remote.as_ref()).await {
            Ok(report) => {
                self.emitter.cycle_completed(&self.scope_id, &report);
                if report.deferred_conflicts > 0 {
                    self.emitter
                        .conflicts_deferred(&self.scope_id, report.deferred_conflicts);
                }
            }
            Err(e) => {
                warn!(scope_id = %self.scope_id, error = %e, "Reconcile failed, will retry next cycle");
            }
        }

        self.drain_queue().await;
    }

    /// Executes eligible operations until the queue runs dry, the link
    /// drops, or shutdown is requested.
    async fn drain_queue(&mut self) {
        loop {
            if self.shutdown_rx.try_recv().is_ok() {
                self.stop_requested = true;
                return;
            }
            if !self.network.is_online() {
                debug!(scope_id = %self.scope_id, "Went offline mid-drain, stopping");
                return;
            }

            let operation = match self.queue.dequeue_next().await {
                Ok(Some(operation)) => operation,
                Ok(None) => return,
                Err(e) => {
                    error!(scope_id = %self.scope_id, error = %e, "Dequeue failed");
                    return;
                }
            };

            self.execute_operation(operation).await;
        }
    }

    /// Runs one operation against the remote with a bounded timeout and
    /// routes the outcome.
    async fn execute_operation(&self, operation: Operation) {
        let outcome = match tokio::time::timeout(
            self.config.remote_timeout(),
            self.remote.execute(&operation),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout(self.config.cycle.remote_timeout_secs)),
        };

        let result = match outcome {
            Ok(ExecuteOutcome::Success(record)) => {
                self.on_success(&operation, record).await
            }
            Ok(ExecuteOutcome::Conflict(record)) => {
                self.on_remote_conflict(&operation, record).await
            }
            Err(e) => self.on_failure(&operation, e).await,
        };

        if let Err(e) = result {
            error!(
                scope_id = %self.scope_id,
                operation_id = %operation.id,
                error = %e,
                "Failed to record operation outcome"
            );
        }
    }

    async fn on_success(
        &self,
        operation: &Operation,
        record: fable_core::ChangeRecord,
    ) -> SyncResult<()> {
        let completed = self.queue.report_success(&operation.id).await?;
        self.delta.handle_operation_ack(operation, &record).await?;
        self.emitter.operation_completed(&completed);
        Ok(())
    }

    /// The server accepted the call but rejected the change as stale.
    /// The operation itself is done; the divergence goes to the resolver.
    async fn on_remote_conflict(
        &self,
        operation: &Operation,
        record: fable_core::ChangeRecord,
    ) -> SyncResult<()> {
        self.queue.report_success(&operation.id).await?;
        self.delta
            .handle_operation_conflict(operation, &record)
            .await?;
        Ok(())
    }

    async fn on_failure(&self, operation: &Operation, error: SyncError) -> SyncResult<()> {
        let fatal = !error.is_retryable();
        let failed = self
            .queue
            .report_failure(&operation.id, fatal, &error.to_string())
            .await?;

        // Dead-lettered either way (fatal, or retries exhausted): undo the
        // optimistic local effect.
        if failed.status == OperationStatus::DeadLettered {
            self.delta.handle_operation_failure(&failed).await?;
            self.emitter.operation_dead_lettered(&failed);
        }

        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
