//! Shared fixtures for the crate's unit tests: a scripted remote, a
//! fault-injecting store wrapper, and deterministic clock/queue builders.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};

use fable_core::{ChangeRecord, EntityType, Operation, OperationKind};
use fable_store::{KvStore, MemoryStore, StoreError, StoreResult};

use crate::clock::ManualClock;
use crate::config::RetrySettings;
use crate::error::{SyncError, SyncResult};
use crate::queue::{EnqueueRequest, OperationQueue};
use crate::remote::{ExecuteOutcome, RemotePage, RemoteSyncClient};

/// Installs a test-writer tracing subscriber. Safe to call from every
/// test; only the first call wins.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// =============================================================================
// Clock & Queue Builders
// =============================================================================

/// A manual clock pinned to a fixed, arbitrary instant.
pub fn fixed_clock() -> Arc<ManualClock> {
    let start = Utc.timestamp_opt(1_700_000_000, 0).single().unwrap();
    Arc::new(ManualClock::new(start))
}

/// A queue over a fresh in-memory store with default retry settings.
pub async fn test_queue() -> (OperationQueue, Arc<ManualClock>) {
    let clock = fixed_clock();
    let queue = OperationQueue::new(
        "p1",
        Arc::new(MemoryStore::new()),
        clock.clone(),
        &RetrySettings::default(),
    );
    (queue, clock)
}

/// A character update request for `entity_id` with a small payload.
pub fn update_request(entity_id: &str) -> EnqueueRequest {
    EnqueueRequest {
        entity_type: EntityType::Character,
        entity_id: entity_id.to_string(),
        kind: OperationKind::Update,
        payload: Some(json!({"name": "Ada"})),
        priority: None,
    }
}

// =============================================================================
// Scripted Remote
// =============================================================================

/// A [`RemoteSyncClient`] driven entirely by pre-scripted responses.
///
/// `execute` pops scripted results in order; unscripted calls succeed,
/// echoing the operation back as the server's post-apply state. Pages
/// behave the same way: unscripted fetches return an empty page.
pub struct ScriptedRemote {
    pages: Mutex<VecDeque<RemotePage>>,
    executions: Mutex<VecDeque<SyncResult<ExecuteOutcome>>>,
    executed: Mutex<Vec<String>>,
}

impl ScriptedRemote {
    pub fn new() -> Self {
        ScriptedRemote {
            pages: Mutex::new(VecDeque::new()),
            executions: Mutex::new(VecDeque::new()),
            executed: Mutex::new(Vec::new()),
        }
    }

    /// Queues one change-feed page.
    pub fn push_page(&self, changes: Vec<ChangeRecord>, next_cursor: Option<&str>) {
        self.pages.lock().unwrap().push_back(RemotePage {
            changes,
            next_cursor: next_cursor.map(String::from),
        });
    }

    /// Queues one `execute` result.
    pub fn script_execute(&self, result: SyncResult<ExecuteOutcome>) {
        self.executions.lock().unwrap().push_back(result);
    }

    /// Queues `count` transient failures.
    pub fn script_transient_failures(&self, count: usize) {
        for _ in 0..count {
            self.script_execute(Err(SyncError::Transient("scripted failure".into())));
        }
    }

    /// Operation ids executed so far, in call order.
    pub fn executed_ids(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    pub fn as_client(&self) -> &dyn RemoteSyncClient {
        self
    }

    /// The echo record an unscripted `execute` acknowledges with.
    pub fn echo_record(operation: &Operation) -> ChangeRecord {
        ChangeRecord {
            entity_id: operation.entity_id.clone(),
            entity_type: operation.entity_type,
            version: 1,
            data: operation.payload.clone().unwrap_or(Value::Null),
            deleted: operation.kind == OperationKind::Delete,
            updated_at: Utc::now(),
        }
    }
}

impl Default for ScriptedRemote {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteSyncClient for ScriptedRemote {
    async fn execute(&self, operation: &Operation) -> SyncResult<ExecuteOutcome> {
        self.executed.lock().unwrap().push(operation.id.clone());

        match self.executions.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(ExecuteOutcome::Success(Self::echo_record(operation))),
        }
    }

    async fn fetch_changes_since(
        &self,
        _scope_id: &str,
        _cursor: Option<&str>,
        _limit: usize,
    ) -> SyncResult<RemotePage> {
        Ok(self
            .pages
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(RemotePage {
                changes: Vec::new(),
                next_cursor: None,
            }))
    }
}

// =============================================================================
// Fault-Injecting Store
// =============================================================================

/// Wraps a [`MemoryStore`] with a write-failure switch.
pub struct FailingStore {
    inner: MemoryStore,
    writes_fail: AtomicBool,
}

impl FailingStore {
    /// Toggles injected write failures.
    pub fn fail_writes(&self, fail: bool) {
        self.writes_fail.store(fail, Ordering::SeqCst);
    }

    fn check_write(&self) -> StoreResult<()> {
        if self.writes_fail.load(Ordering::SeqCst) {
            Err(StoreError::Backend("injected write failure".into()))
        } else {
            Ok(())
        }
    }
}

/// A failing store plus a second handle for flipping the switch.
pub fn failing_store() -> (Arc<FailingStore>, Arc<FailingStore>) {
    let store = Arc::new(FailingStore {
        inner: MemoryStore::new(),
        writes_fail: AtomicBool::new(false),
    });
    (store.clone(), store)
}

#[async_trait]
impl KvStore for FailingStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        self.check_write()?;
        self.inner.set(key, value).await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.check_write()?;
        self.inner.delete(key).await
    }

    async fn list_by_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.inner.list_by_prefix(prefix).await
    }
}
