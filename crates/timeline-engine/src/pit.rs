//! Point-in-time resolution of attribute state.
//!
//! A single lookup binary-searches the entity's windows. The batch join over
//! the calendar sorts each entity's dates and sweeps them together with its
//! windows, so the cost is proportional to windows plus calendar rows.
//!
//! When no window covers a date, resolution falls back to the entity's
//! static snapshot and then to the all-false default. Fallbacks are logged
//! as data-quality events and counted in [`JoinStats`]; rows are never
//! dropped.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::AttributeSchema;
use crate::scd::WindowSet;
use crate::types::{AttributeState, DailyAvailabilityRecord, EntityId, FactRow, Resolution};

/// Attribute state resolved for one (entity, date).
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<'a> {
    pub state: &'a AttributeState,
    pub resolution: Resolution,
}

/// Counts of how fact rows were resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinStats {
    pub from_window: usize,
    pub from_static: usize,
    pub defaulted: usize,
}

impl JoinStats {
    fn record(&mut self, resolution: Resolution) {
        match resolution {
            Resolution::Window => self.from_window += 1,
            Resolution::StaticSnapshot => self.from_static += 1,
            Resolution::Default => self.defaulted += 1,
        }
    }

    fn merge(mut self, other: JoinStats) -> JoinStats {
        self.from_window += other.from_window;
        self.from_static += other.from_static;
        self.defaulted += other.defaulted;
        self
    }

    pub fn unresolved(&self) -> usize {
        self.from_static + self.defaulted
    }
}

/// Read-only view over windows and static snapshots used for resolution.
#[derive(Debug)]
pub struct PointInTimeIndex<'a> {
    windows: &'a WindowSet,
    statics: &'a HashMap<EntityId, AttributeState>,
    default_state: AttributeState,
}

impl<'a> PointInTimeIndex<'a> {
    pub fn new(
        windows: &'a WindowSet,
        statics: &'a HashMap<EntityId, AttributeState>,
        schema: &AttributeSchema,
    ) -> Self {
        Self {
            windows,
            statics,
            default_state: AttributeState::all_false(schema),
        }
    }

    pub fn windows(&self) -> &'a WindowSet {
        self.windows
    }

    /// Resolve the attribute state of `entity_id` valid on `as_of`.
    pub fn resolve(&self, entity_id: EntityId, as_of: NaiveDate) -> Resolved<'_> {
        let history = self.windows.history(entity_id);
        let idx = history.partition_point(|w| w.valid_to < as_of);
        match history.get(idx) {
            Some(w) if w.contains(as_of) => Resolved {
                state: &w.attribute_state,
                resolution: Resolution::Window,
            },
            _ => self.fallback(entity_id),
        }
    }

    fn fallback(&self, entity_id: EntityId) -> Resolved<'_> {
        match self.statics.get(&entity_id) {
            Some(state) => Resolved {
                state,
                resolution: Resolution::StaticSnapshot,
            },
            None => Resolved {
                state: &self.default_state,
                resolution: Resolution::Default,
            },
        }
    }

    /// Join calendar rows against the windows and derive fact rows.
    ///
    /// Output is sorted by `(entity_id, date)`. Duplicate calendar keys are
    /// passed through; the merge step decides between them.
    pub fn join_calendar<'r, I>(&self, calendar: I) -> (Vec<FactRow>, JoinStats)
    where
        I: IntoIterator<Item = &'r DailyAvailabilityRecord>,
    {
        let mut by_entity: BTreeMap<EntityId, Vec<&DailyAvailabilityRecord>> = BTreeMap::new();
        let mut total = 0;
        for rec in calendar {
            by_entity.entry(rec.entity_id).or_default().push(rec);
            total += 1;
        }

        let parts: Vec<(Vec<FactRow>, JoinStats)> = by_entity
            .into_par_iter()
            .map(|(entity_id, rows)| self.sweep_entity(entity_id, rows))
            .collect();

        let mut facts = Vec::with_capacity(total);
        let mut stats = JoinStats::default();
        for (rows, s) in parts {
            facts.extend(rows);
            stats = stats.merge(s);
        }
        (facts, stats)
    }

    fn sweep_entity(
        &self,
        entity_id: EntityId,
        mut rows: Vec<&DailyAvailabilityRecord>,
    ) -> (Vec<FactRow>, JoinStats) {
        rows.sort_by_key(|r| r.date);
        let history = self.windows.history(entity_id);
        let mut cursor = 0;
        let mut stats = JoinStats::default();
        let mut facts = Vec::with_capacity(rows.len());

        for rec in rows {
            while cursor < history.len() && history[cursor].valid_to < rec.date {
                cursor += 1;
            }
            let resolved = match history.get(cursor) {
                Some(w) if w.contains(rec.date) => Resolved {
                    state: &w.attribute_state,
                    resolution: Resolution::Window,
                },
                _ => self.fallback(entity_id),
            };
            stats.record(resolved.resolution);
            facts.push(derive_fact(rec, resolved));
        }

        if stats.unresolved() > 0 {
            tracing::warn!(
                entity_id,
                from_static = stats.from_static,
                defaulted = stats.defaulted,
                "dates without a covering validity window"
            );
        }
        (facts, stats)
    }
}

/// Occupancy is the complement of availability; revenue is the nightly
/// price of an occupied night and zero otherwise.
fn derive_fact(rec: &DailyAvailabilityRecord, resolved: Resolved<'_>) -> FactRow {
    let is_occupied = !rec.is_available;
    let revenue = if is_occupied { rec.price.unwrap_or(0.0) } else { 0.0 };
    FactRow {
        entity_id: rec.entity_id,
        date: rec.date,
        attributes: resolved.state.clone(),
        price: rec.price,
        revenue,
        is_occupied,
        resolution: resolved.resolution,
    }
}
