//! # Key/Value Store Trait
//!
//! The narrow interface the sync engine reads and writes through. The
//! engine never assumes a specific storage backend; anything that can
//! store bytes under string keys and enumerate them by prefix qualifies.
//!
//! ## Contract
//! - `set`/`delete` are atomic per record: a read-modify-write of a single
//!   record never interleaves with another write to the same record.
//! - A returned error means the write did NOT happen.
//! - `list_by_prefix` returns keys in ascending lexicographic order.
//! - Implementations must be safe for concurrent access across scopes.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{StoreError, StoreResult};

/// Durable key/value storage consumed by the sync engine.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetches the bytes stored under `key`, if any.
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Stores `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: &[u8]) -> StoreResult<()>;

    /// Removes `key`. Deleting an absent key is a no-op.
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Lists all keys starting with `prefix`, in ascending order.
    async fn list_by_prefix(&self, prefix: &str) -> StoreResult<Vec<String>>;
}

// =============================================================================
// Typed Record Helpers
// =============================================================================

/// Reads and deserializes a JSON record.
pub async fn get_record<T: DeserializeOwned>(
    store: &dyn KvStore,
    key: &str,
) -> StoreResult<Option<T>> {
    match store.get(key).await? {
        None => Ok(None),
        Some(bytes) => {
            let record = serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization {
                key: key.to_string(),
                message: e.to_string(),
            })?;
            Ok(Some(record))
        }
    }
}

/// Serializes and writes a JSON record.
pub async fn put_record<T: Serialize>(
    store: &dyn KvStore,
    key: &str,
    record: &T,
) -> StoreResult<()> {
    let bytes = serde_json::to_vec(record).map_err(|e| StoreError::Serialization {
        key: key.to_string(),
        message: e.to_string(),
    })?;
    store.set(key, &bytes).await
}
