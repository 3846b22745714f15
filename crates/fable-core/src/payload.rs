//! # Typed Entity Payloads
//!
//! Operation payloads and change-record data travel through the engine as
//! opaque `serde_json::Value` blobs; the queue and delta logic never look
//! inside them. This module is the serialization boundary where the
//! application shell and the remote client edges decode those blobs into
//! typed worldbuilding entities.
//!
//! The enum is internally tagged by `entity_type`, so a payload always
//! names what it is on the wire:
//!
//! ```json
//! { "entity_type": "character", "name": "Mira", "summary": "...", ... }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::types::EntityType;

// =============================================================================
// Entity Structs
// =============================================================================

/// A character sheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CharacterSheet {
    pub name: String,
    /// One-line description shown in listings.
    pub summary: Option<String>,
    /// Long-form biography (markdown).
    pub biography: Option<String>,
    /// Free-form traits ("brave", "one-eyed", ...).
    #[serde(default)]
    pub traits: Vec<String>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

/// A place in the world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LocationEntry {
    pub name: String,
    pub summary: Option<String>,
    /// Region or parent location name.
    pub region: Option<String>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

/// A faction, guild, or organization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct FactionEntry {
    pub name: String,
    pub summary: Option<String>,
    /// Names of member characters.
    #[serde(default)]
    pub members: Vec<String>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

/// A free-form lore note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NoteEntry {
    pub title: String,
    /// Note body (markdown).
    pub body: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Tagged Payload
// =============================================================================

/// A typed entity payload, tagged by entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "entity_type", rename_all = "snake_case")]
pub enum EntityPayload {
    Character(CharacterSheet),
    Location(LocationEntry),
    Faction(FactionEntry),
    LoreNote(NoteEntry),
}

impl EntityPayload {
    /// The entity type this payload carries.
    pub fn entity_type(&self) -> EntityType {
        match self {
            EntityPayload::Character(_) => EntityType::Character,
            EntityPayload::Location(_) => EntityType::Location,
            EntityPayload::Faction(_) => EntityType::Faction,
            EntityPayload::LoreNote(_) => EntityType::LoreNote,
        }
    }

    /// Encodes into the opaque blob the engine moves around.
    pub fn encode(&self) -> CoreResult<Value> {
        serde_json::to_value(self)
            .map_err(|e| CoreError::PayloadEncoding(e.to_string()))
    }

    /// Decodes an opaque blob back into a typed payload, checking that the
    /// tag matches the expected entity type.
    pub fn decode(expected: EntityType, value: &Value) -> CoreResult<Self> {
        let payload: EntityPayload = serde_json::from_value(value.clone())
            .map_err(|e| CoreError::PayloadEncoding(e.to_string()))?;

        if payload.entity_type() != expected {
            return Err(CoreError::PayloadMismatch {
                expected,
                actual: payload.entity_type(),
            });
        }

        Ok(payload)
    }
}
