//! Core record types shared by every pipeline stage.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::schema::AttributeSchema;

/// Identifier of a tracked entity (a rental listing).
pub type EntityId = u64;

/// Upper bound used as `valid_to` of the current window of every entity.
pub const SENTINEL_MAX_DATE: NaiveDate = match NaiveDate::from_ymd_opt(9999, 12, 31) {
    Some(d) => d,
    None => panic!("invalid sentinel date"),
};

/// Mapping from attribute name to presence.
///
/// A missing key means the attribute was not part of the schema when the
/// state was produced (undefined), which is distinct from `false`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeState(BTreeMap<String, bool>);

impl AttributeState {
    /// An all-false state over every attribute of `schema`.
    pub fn all_false(schema: &AttributeSchema) -> Self {
        Self(schema.iter().map(|name| (name.to_string(), false)).collect())
    }

    /// Presence of `name`, or `None` when undefined for this state.
    pub fn get(&self, name: &str) -> Option<bool> {
        self.0.get(name).copied()
    }

    /// `true` only when `name` is defined and present.
    pub fn has(&self, name: &str) -> bool {
        self.get(name).unwrap_or(false)
    }

    pub fn set(&mut self, name: impl Into<String>, present: bool) {
        self.0.insert(name.into(), present);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, bool)> for AttributeState {
    fn from_iter<I: IntoIterator<Item = (String, bool)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// One raw attribute snapshot as delivered by the ingestion layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSnapshot {
    pub entity_id: EntityId,
    /// Serialized attribute list, e.g. `["Wifi", "Kitchen"]`.
    pub attributes: String,
    pub observed_at: NaiveDate,
    #[serde(default)]
    pub ingested_at: Option<DateTime<Utc>>,
}

/// Latest known attribute list of an entity, independent of change history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticSnapshot {
    pub entity_id: EntityId,
    pub attributes: String,
}

/// Canonical change event: one per (entity, observed_at).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub entity_id: EntityId,
    pub observed_at: NaiveDate,
    pub attribute_state: AttributeState,
}

/// SCD type-2 record: the attribute state valid over `[valid_from, valid_to]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityWindow {
    pub entity_id: EntityId,
    pub attribute_state: AttributeState,
    pub valid_from: NaiveDate,
    pub valid_to: NaiveDate,
    pub is_current: bool,
}

impl ValidityWindow {
    /// Inclusive containment on both ends.
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.valid_from <= date && date <= self.valid_to
    }
}

/// One calendar row: availability and stay constraints for a single night.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyAvailabilityRecord {
    pub entity_id: EntityId,
    pub date: NaiveDate,
    pub is_available: bool,
    #[serde(default)]
    pub price: Option<f64>,
    /// `None` or `0` means no minimum.
    #[serde(default)]
    pub min_nights: Option<u32>,
    /// `None` or `0` means no cap.
    #[serde(default)]
    pub max_nights: Option<u32>,
    #[serde(default)]
    pub ingested_at: Option<DateTime<Utc>>,
}

/// A maximal run of consecutive available dates for one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilitySpan {
    pub entity_id: EntityId,
    pub span_start: NaiveDate,
    pub span_end: NaiveDate,
    pub consecutive_days: u32,
    pub min_nights_required: Option<u32>,
    pub max_nights_allowed: Option<u32>,
    pub effective_max_stay: u32,
    pub is_bookable: bool,
}

/// How the attribute state of a fact row was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// A validity window covered the date.
    Window,
    /// No window covered the date; the entity's static snapshot was used.
    StaticSnapshot,
    /// Nothing known; the all-false default was used.
    Default,
}

/// Time-aware fact row keyed by (entity_id, date).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactRow {
    pub entity_id: EntityId,
    pub date: NaiveDate,
    pub attributes: AttributeState,
    pub price: Option<f64>,
    pub revenue: f64,
    pub is_occupied: bool,
    pub resolution: Resolution,
}

impl FactRow {
    pub fn key(&self) -> (EntityId, NaiveDate) {
        (self.entity_id, self.date)
    }
}
