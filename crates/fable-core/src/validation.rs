//! # Enqueue Validation
//!
//! Synchronous checks applied before an operation is accepted into the
//! queue. The queue auto-corrects what it can (missing id, missing
//! timestamp); only genuinely bad input is rejected here.

use serde_json::Value;

use crate::error::{CoreError, CoreResult};
use crate::types::OperationKind;

/// Hard ceiling on payload size. Worldbuilding entries are text; anything
/// near this size is a bug in the caller, not a legitimate edit.
pub const MAX_PAYLOAD_BYTES: usize = 1_000_000;

/// Validates caller-supplied enqueue input.
///
/// ## Rules
/// - `scope_id` and `entity_id` must be non-empty
/// - creates and updates require a payload; deletes must not carry one
/// - payloads must be JSON objects and within the size ceiling
pub fn validate_enqueue(
    scope_id: &str,
    entity_id: &str,
    kind: OperationKind,
    payload: Option<&Value>,
) -> CoreResult<()> {
    if scope_id.trim().is_empty() {
        return Err(CoreError::validation("scope_id", "must not be empty"));
    }

    if entity_id.trim().is_empty() {
        return Err(CoreError::validation("entity_id", "must not be empty"));
    }

    match (kind, payload) {
        (OperationKind::Delete, Some(_)) => {
            return Err(CoreError::validation(
                "payload",
                "delete operations must not carry a payload",
            ));
        }
        (OperationKind::Delete, None) => {}
        (_, None) => {
            return Err(CoreError::validation(
                "payload",
                format!("{kind} operations require a payload"),
            ));
        }
        (_, Some(value)) => {
            if !value.is_object() {
                return Err(CoreError::validation(
                    "payload",
                    "payload must be a JSON object",
                ));
            }

            let size = value.to_string().len();
            if size > MAX_PAYLOAD_BYTES {
                return Err(CoreError::validation(
                    "payload",
                    format!("payload is {size} bytes, limit is {MAX_PAYLOAD_BYTES}"),
                ));
            }
        }
    }

    Ok(())
}
