//! # timeline-engine
//!
//! Point-in-time attribute history and bookable-span analysis for rental
//! listings.
//!
//! The engine turns raw attribute snapshots into SCD type-2 validity windows,
//! resolves the attribute state valid on any date with a sort-merge range
//! join, groups available calendar nights into spans with gap-and-islands
//! ranking, and controls how much history an incremental run reprocesses.
//!
//! ## Modules
//!
//! - [`schema`] — attribute schema discovery and additive schema diffs
//! - [`normalize`] — raw snapshots → one change event per (entity, date)
//! - [`scd`] — change events → contiguous validity windows
//! - [`pit`] — point-in-time resolution and the calendar fact join
//! - [`spans`] — consecutive available nights → bookable spans
//! - [`refresh`] — incremental scope, late arrivals, watermark
//! - [`store`] — fact storage with atomic upsert-by-key
//! - [`freshness`] — source freshness classification
//! - [`export`] — wide-table projection of fact rows
//! - [`pipeline`] — one run wiring all of the above
//! - [`config`] — run configuration and context
//! - [`error`] — error types

pub mod config;
pub mod error;
pub mod export;
pub mod freshness;
pub mod normalize;
pub mod pipeline;
pub mod pit;
pub mod refresh;
pub mod scd;
pub mod schema;
pub mod spans;
pub mod store;
pub mod types;

pub use config::{ConflictPolicy, RunConfig, RunContext};
pub use error::TimelineError;
pub use pipeline::{Pipeline, RunReport, SourceSet};
pub use refresh::{LateArrivalReport, RefreshMode, RefreshState, Watermark};
pub use schema::{discover, AttributeSchema, SchemaChangeReport};
pub use scd::{build_windows, WindowSet};
pub use spans::build_spans;
pub use store::{FactStore, JsonFileStore, MemoryStore};
pub use types::{
    AttributeState, AvailabilitySpan, ChangeEvent, DailyAvailabilityRecord, EntityId, FactRow,
    RawSnapshot, Resolution, StaticSnapshot, ValidityWindow, SENTINEL_MAX_DATE,
};
