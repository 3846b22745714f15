//! # In-Memory Store
//!
//! A `BTreeMap`-backed store for tests and for embedders that bring their
//! own durability. The sorted map gives lexicographic prefix scans for
//! free, matching the `KvStore` ordering contract.

use std::collections::BTreeMap;
use std::ops::Bound;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreResult;
use crate::kv::KvStore;

/// Non-durable `KvStore` implementation.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Number of records currently held (test helper).
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether the store holds no records.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        self.records
            .write()
            .await
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.records.write().await.remove(key);
        Ok(())
    }

    async fn list_by_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let records = self.records.read().await;
        let keys = records
            .range::<String, _>((Bound::Included(prefix.to_string()), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = MemoryStore::new();

        store.set("queue/p1/op-1", b"payload").await.unwrap();
        assert_eq!(store.get("queue/p1/op-1").await.unwrap(), Some(b"payload".to_vec()));

        store.delete("queue/p1/op-1").await.unwrap();
        assert_eq!(store.get("queue/p1/op-1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_absent_key_is_noop() {
        let store = MemoryStore::new();
        store.delete("queue/p1/ghost").await.unwrap();
    }

    #[tokio::test]
    async fn test_list_by_prefix_is_sorted_and_scoped() {
        let store = MemoryStore::new();
        store.set("queue/p1/op-b", b"1").await.unwrap();
        store.set("queue/p1/op-a", b"2").await.unwrap();
        store.set("queue/p2/op-c", b"3").await.unwrap();
        store.set("entity/p1/char-1", b"4").await.unwrap();

        let keys = store.list_by_prefix("queue/p1/").await.unwrap();
        assert_eq!(keys, vec!["queue/p1/op-a", "queue/p1/op-b"]);
    }

    #[tokio::test]
    async fn test_overwrite_replaces_value() {
        let store = MemoryStore::new();
        store.set("k", b"old").await.unwrap();
        store.set("k", b"new").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"new".to_vec()));
    }
}
