//! # fable-core: Pure Domain Types
//!
//! The domain model for Fable's offline-first sync engine: operations,
//! change records, checkpoints, conflicts, typed entity payloads, and the
//! retry backoff policy.
//!
//! ## Golden Rule: NO I/O
//! Nothing in this crate touches a database, the network, the file system,
//! or even the wall clock. Every function is a pure computation over its
//! inputs, which is what makes the queue ordering and backoff behavior
//! testable without a runtime.
//!
//! ## Module Overview
//! - [`types`] - Operation, ChangeRecord, SyncCheckpoint, ConflictRecord
//! - [`payload`] - Tagged entity payloads (serialization boundary)
//! - [`backoff`] - Deterministic exponential backoff with jitter
//! - [`validation`] - Synchronous enqueue input checks
//! - [`error`] - Domain error types

pub mod backoff;
pub mod error;
pub mod payload;
pub mod types;
pub mod validation;

// Re-export the primary types at the crate root
pub use backoff::BackoffPolicy;
pub use error::{CoreError, CoreResult};
pub use payload::{CharacterSheet, EntityPayload, FactionEntry, LocationEntry, NoteEntry};
pub use types::{
    ChangeRecord, ConflictRecord, EntityType, Operation, OperationKind, OperationStatus,
    Resolution, ResolutionOutcome, ResolutionStrategy, SyncCheckpoint,
};
pub use validation::validate_enqueue;
