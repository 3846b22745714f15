//! # Conflict Resolver
//!
//! Pure, deterministic resolution of divergent local/remote changes. No
//! I/O, no clock reads, no randomness: the same pair of changes under the
//! same strategy always produces the same [`Resolution`], which keeps
//! replicas convergent and makes every branch unit-testable.
//!
//! ## Strategies
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Resolution Strategies                             │
//! │                                                                         │
//! │  LastWriteWins   later updated_at wins; remote wins exact ties          │
//! │                                                                         │
//! │  FieldMerge      both sides are JSON objects:                           │
//! │                    disjoint fields  ──▶ union of both                   │
//! │                    overlapping keys ──▶ LWW winner's values             │
//! │                  either side not an object ──▶ plain LWW                │
//! │                                                                         │
//! │  Manual          no data chosen; conflict persists and blocks the       │
//! │                  entity until the user picks a side                     │
//! │                                                                         │
//! │  resulting_version = max(local.version, remote.version) + 1             │
//! │  (strictly above both inputs, so the resolution is not itself seen      │
//! │   as stale by either side)                                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;

use serde_json::{Map, Value};

use fable_core::{
    ChangeRecord, ConflictRecord, EntityType, Resolution, ResolutionOutcome, ResolutionStrategy,
};

// =============================================================================
// Conflict Resolver
// =============================================================================

/// Picks and applies a resolution strategy per conflict. Configured with a
/// default strategy plus optional per-entity-type overrides (e.g. lore
/// notes merge field-wise while characters take last-write-wins).
#[derive(Debug, Clone)]
pub struct ConflictResolver {
    default_strategy: ResolutionStrategy,
    overrides: HashMap<EntityType, ResolutionStrategy>,
}

impl Default for ConflictResolver {
    fn default() -> Self {
        ConflictResolver {
            default_strategy: ResolutionStrategy::LastWriteWins,
            overrides: HashMap::new(),
        }
    }
}

impl ConflictResolver {
    pub fn new(default_strategy: ResolutionStrategy) -> Self {
        ConflictResolver {
            default_strategy,
            overrides: HashMap::new(),
        }
    }

    /// Registers a per-entity-type strategy override.
    pub fn with_override(mut self, entity_type: EntityType, strategy: ResolutionStrategy) -> Self {
        self.overrides.insert(entity_type, strategy);
        self
    }

    /// The strategy that applies to `entity_type`.
    pub fn strategy_for(&self, entity_type: EntityType) -> ResolutionStrategy {
        self.overrides
            .get(&entity_type)
            .copied()
            .unwrap_or(self.default_strategy)
    }

    /// Resolves a detected conflict under the strategy for its entity type.
    pub fn resolve(&self, conflict: &ConflictRecord) -> Resolution {
        self.resolve_with(
            &conflict.local_change,
            &conflict.remote_change,
            self.strategy_for(conflict.entity_type),
        )
    }

    /// Resolves a local/remote pair under an explicit strategy.
    pub fn resolve_with(
        &self,
        local: &ChangeRecord,
        remote: &ChangeRecord,
        strategy: ResolutionStrategy,
    ) -> Resolution {
        let resulting_version = local.version.max(remote.version) + 1;

        match strategy {
            ResolutionStrategy::LastWriteWins => {
                let (outcome, winner) = last_write_winner(local, remote);
                Resolution {
                    outcome,
                    chosen_data: Some(winner.data.clone()),
                    resulting_version,
                }
            }
            ResolutionStrategy::FieldMerge => merge_changes(local, remote, resulting_version),
            ResolutionStrategy::Manual => Resolution {
                outcome: ResolutionOutcome::Deferred,
                chosen_data: None,
                resulting_version,
            },
        }
    }
}

// =============================================================================
// Last-Write-Wins
// =============================================================================

/// Timestamp comparison with remote winning exact ties. The tiebreak must
/// be the same on every replica or they diverge; "remote wins" is the
/// choice that needs no extra coordination.
fn last_write_winner<'a>(
    local: &'a ChangeRecord,
    remote: &'a ChangeRecord,
) -> (ResolutionOutcome, &'a ChangeRecord) {
    if local.updated_at > remote.updated_at {
        (ResolutionOutcome::Local, local)
    } else {
        (ResolutionOutcome::Remote, remote)
    }
}

// =============================================================================
// Field Merge
// =============================================================================

/// Merges two object payloads field-wise. Non-object payloads (tombstones
/// included) cannot be merged and fall back to last-write-wins.
fn merge_changes(local: &ChangeRecord, remote: &ChangeRecord, resulting_version: i64) -> Resolution {
    let (Some(local_fields), Some(remote_fields)) =
        (local.data.as_object(), remote.data.as_object())
    else {
        let (outcome, winner) = last_write_winner(local, remote);
        return Resolution {
            outcome,
            chosen_data: Some(winner.data.clone()),
            resulting_version,
        };
    };

    let (_, winner) = last_write_winner(local, remote);
    let winner_is_local = std::ptr::eq(winner, local);

    // Start from the loser, overlay the winner: disjoint fields survive
    // from both sides, overlapping keys take the winner's values.
    let loser_fields = if winner_is_local {
        remote_fields
    } else {
        local_fields
    };
    let winner_fields = if winner_is_local {
        local_fields
    } else {
        remote_fields
    };

    let mut merged: Map<String, Value> = loser_fields.clone();
    for (key, value) in winner_fields {
        merged.insert(key.clone(), value.clone());
    }

    Resolution {
        outcome: ResolutionOutcome::Merged,
        chosen_data: Some(Value::Object(merged)),
        resulting_version,
    }
}

/// Whether two object payloads touch entirely different fields.
pub fn fields_are_disjoint(a: &Value, b: &Value) -> bool {
    match (a.as_object(), b.as_object()) {
        (Some(a), Some(b)) => a.keys().all(|key| !b.contains_key(key)),
        _ => false,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::json;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn change(version: i64, data: Value, updated_at: DateTime<Utc>) -> ChangeRecord {
        ChangeRecord {
            entity_id: "char-1".into(),
            entity_type: EntityType::Character,
            version,
            data,
            deleted: false,
            updated_at,
        }
    }

    fn resolver() -> ConflictResolver {
        ConflictResolver::default()
    }

    #[test]
    fn test_lww_later_timestamp_wins() {
        let local = change(3, json!({"name": "Ada"}), at(10));
        let remote = change(4, json!({"name": "Grace"}), at(5));

        let resolution =
            resolver().resolve_with(&local, &remote, ResolutionStrategy::LastWriteWins);
        assert_eq!(resolution.outcome, ResolutionOutcome::Local);
        assert_eq!(resolution.chosen_data, Some(json!({"name": "Ada"})));
        assert_eq!(resolution.resulting_version, 5);
    }

    #[test]
    fn test_lww_remote_wins_ties() {
        let local = change(3, json!({"name": "Ada"}), at(10));
        let remote = change(3, json!({"name": "Grace"}), at(10));

        let resolution =
            resolver().resolve_with(&local, &remote, ResolutionStrategy::LastWriteWins);
        assert_eq!(resolution.outcome, ResolutionOutcome::Remote);
        assert_eq!(resolution.chosen_data, Some(json!({"name": "Grace"})));
    }

    #[test]
    fn test_field_merge_disjoint_fields_union() {
        let local = change(3, json!({"title": "The Fall"}), at(10));
        let remote = change(4, json!({"summary": "A city drowns"}), at(5));

        let resolution = resolver().resolve_with(&local, &remote, ResolutionStrategy::FieldMerge);
        assert_eq!(resolution.outcome, ResolutionOutcome::Merged);
        assert_eq!(
            resolution.chosen_data,
            Some(json!({"title": "The Fall", "summary": "A city drowns"}))
        );
    }

    #[test]
    fn test_field_merge_overlap_takes_lww_winner() {
        let local = change(3, json!({"title": "The Fall", "mood": "grim"}), at(20));
        let remote = change(4, json!({"title": "The Descent", "tags": ["city"]}), at(5));

        let resolution = resolver().resolve_with(&local, &remote, ResolutionStrategy::FieldMerge);
        assert_eq!(resolution.outcome, ResolutionOutcome::Merged);
        // Local is newer: its "title" wins the overlap, remote's disjoint
        // "tags" still survives.
        assert_eq!(
            resolution.chosen_data,
            Some(json!({"title": "The Fall", "mood": "grim", "tags": ["city"]}))
        );
    }

    #[test]
    fn test_field_merge_non_object_falls_back_to_lww() {
        let local = change(3, Value::Null, at(10)); // tombstone payload
        let remote = change(4, json!({"name": "Grace"}), at(20));

        let resolution = resolver().resolve_with(&local, &remote, ResolutionStrategy::FieldMerge);
        assert_eq!(resolution.outcome, ResolutionOutcome::Remote);
        assert_eq!(resolution.chosen_data, Some(json!({"name": "Grace"})));
    }

    #[test]
    fn test_manual_defers_without_choosing() {
        let local = change(3, json!({"name": "Ada"}), at(10));
        let remote = change(4, json!({"name": "Grace"}), at(5));

        let resolution = resolver().resolve_with(&local, &remote, ResolutionStrategy::Manual);
        assert_eq!(resolution.outcome, ResolutionOutcome::Deferred);
        assert!(resolution.chosen_data.is_none());
        assert_eq!(resolution.resulting_version, 5);
    }

    #[test]
    fn test_resulting_version_exceeds_both_sides() {
        let local = change(7, json!({}), at(10));
        let remote = change(9, json!({}), at(5));

        for strategy in [
            ResolutionStrategy::LastWriteWins,
            ResolutionStrategy::FieldMerge,
            ResolutionStrategy::Manual,
        ] {
            let resolution = resolver().resolve_with(&local, &remote, strategy);
            assert_eq!(resolution.resulting_version, 10);
        }
    }

    #[test]
    fn test_per_type_override() {
        let resolver = ConflictResolver::new(ResolutionStrategy::LastWriteWins)
            .with_override(EntityType::LoreNote, ResolutionStrategy::FieldMerge);

        assert_eq!(
            resolver.strategy_for(EntityType::Character),
            ResolutionStrategy::LastWriteWins
        );
        assert_eq!(
            resolver.strategy_for(EntityType::LoreNote),
            ResolutionStrategy::FieldMerge
        );
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let local = change(3, json!({"a": 1, "b": 2}), at(10));
        let remote = change(4, json!({"b": 3, "c": 4}), at(10));

        let first = resolver().resolve_with(&local, &remote, ResolutionStrategy::FieldMerge);
        for _ in 0..10 {
            let again = resolver().resolve_with(&local, &remote, ResolutionStrategy::FieldMerge);
            assert_eq!(again.outcome, first.outcome);
            assert_eq!(again.chosen_data, first.chosen_data);
            assert_eq!(again.resulting_version, first.resulting_version);
        }
    }

    #[test]
    fn test_fields_are_disjoint() {
        assert!(fields_are_disjoint(&json!({"a": 1}), &json!({"b": 2})));
        assert!(!fields_are_disjoint(&json!({"a": 1}), &json!({"a": 2})));
        assert!(!fields_are_disjoint(&json!([1]), &json!({"a": 2})));
    }
}
