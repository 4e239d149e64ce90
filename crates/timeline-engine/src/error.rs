//! Error types for timeline-engine operations.
//!
//! Only structural failures live here. Data-quality conditions (unresolved
//! joins, late arrivals, schema deltas) are reported as values, not errors.

use chrono::NaiveDate;
use thiserror::Error;

use crate::types::EntityId;

#[derive(Error, Debug)]
pub enum TimelineError {
    /// A raw attribute list could not be read. Aborts discovery and the run.
    #[error("Schema discovery failed for entity {entity_id}: {message}")]
    SchemaDiscovery { entity_id: EntityId, message: String },

    /// The window builder produced overlapping or gapped windows.
    /// This is an internal bug and is never auto-corrected.
    #[error("Window invariant violated for entity {entity_id}: {message}")]
    WindowInvariantViolation { entity_id: EntityId, message: String },

    /// Two rows in one batch target the same key with differing payloads
    /// and the active policy does not allow last-write-wins.
    #[error("Merge key conflict on ({entity_id}, {date})")]
    MergeKeyConflict { entity_id: EntityId, date: NaiveDate },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TimelineError>;
