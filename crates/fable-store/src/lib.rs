//! # fable-store: Persistence Adapter
//!
//! Durable key/value storage behind the narrow [`KvStore`] trait the sync
//! engine consumes. Two implementations ship here:
//!
//! - [`MemoryStore`] - non-durable, for tests and embedders that bring
//!   their own persistence
//! - [`SqliteStore`] - durable, one SQLite table, WAL mode
//!
//! ## Key Namespaces
//! ```text
//! queue/<scope_id>/<operation_id>     Operation Queue
//! checkpoint/<scope_id>               Delta Sync Service
//! conflict/<scope_id>/<entity_id>     Delta Sync Service
//! entity/<scope_id>/<entity_id>       Delta Sync Service (local state)
//! baseline/<scope_id>/<entity_id>     Delta Sync Service (rollback)
//! ```
//!
//! Namespaces are disjoint by construction ([`keys`]), so the store only
//! ever needs per-record atomicity.

pub mod error;
pub mod keys;
pub mod kv;
pub mod memory;
pub mod sqlite;

pub use error::{StoreError, StoreResult};
pub use kv::{get_record, put_record, KvStore};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
