//! # Key Namespaces
//!
//! Every record type lives under a disjoint prefix, so per-record atomicity
//! from the store is enough; no cross-namespace locking exists anywhere in
//! the engine.
//!
//! ```text
//! queue/<scope_id>/<operation_id>     owned by the Operation Queue
//! checkpoint/<scope_id>               owned by the Delta Sync Service
//! conflict/<scope_id>/<entity_id>     owned by the Delta Sync Service
//! entity/<scope_id>/<entity_id>       local entity state (Delta Sync Service)
//! baseline/<scope_id>/<entity_id>     pre-optimistic rollback snapshots
//! ```

/// Prefix covering every queued operation in a scope.
pub fn queue_prefix(scope_id: &str) -> String {
    format!("queue/{scope_id}/")
}

/// Key for one queued operation.
pub fn queue_key(scope_id: &str, operation_id: &str) -> String {
    format!("queue/{scope_id}/{operation_id}")
}

/// Key for a scope's sync checkpoint.
pub fn checkpoint_key(scope_id: &str) -> String {
    format!("checkpoint/{scope_id}")
}

/// Prefix covering every open conflict in a scope.
pub fn conflict_prefix(scope_id: &str) -> String {
    format!("conflict/{scope_id}/")
}

/// Key for the open conflict on one entity (at most one per entity).
pub fn conflict_key(scope_id: &str, entity_id: &str) -> String {
    format!("conflict/{scope_id}/{entity_id}")
}

/// Prefix covering a scope's local entity records.
pub fn entity_prefix(scope_id: &str) -> String {
    format!("entity/{scope_id}/")
}

/// Key for one local entity record.
pub fn entity_key(scope_id: &str, entity_id: &str) -> String {
    format!("entity/{scope_id}/{entity_id}")
}

/// Key for one entity's pre-optimistic baseline snapshot.
pub fn baseline_key(scope_id: &str, entity_id: &str) -> String {
    format!("baseline/{scope_id}/{entity_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_fall_under_their_prefix() {
        assert!(queue_key("p1", "op-1").starts_with(&queue_prefix("p1")));
        assert!(conflict_key("p1", "char-1").starts_with(&conflict_prefix("p1")));
        assert!(entity_key("p1", "char-1").starts_with(&entity_prefix("p1")));
    }

    #[test]
    fn test_namespaces_are_disjoint() {
        let prefixes = [
            queue_prefix("p1"),
            conflict_prefix("p1"),
            entity_prefix("p1"),
            "checkpoint/p1".to_string(),
            "baseline/p1/".to_string(),
        ];

        for (i, a) in prefixes.iter().enumerate() {
            for (j, b) in prefixes.iter().enumerate() {
                if i != j {
                    assert!(!a.starts_with(b), "{a} overlaps {b}");
                }
            }
        }
    }

    #[test]
    fn test_scopes_are_disjoint() {
        // "p1" must not be a prefix-collision with "p10".
        assert!(!queue_key("p10", "op-1").starts_with(&queue_prefix("p1")));
    }
}
