//! Availability spans via gap-and-islands grouping.
//!
//! Each available date gets the key `date − rank`, where `rank` is its
//! 1-based position in the entity's ascending available dates. Consecutive
//! dates share a key because rank and date advance together; any gap starts
//! a new key. Spans are fully recomputed from the calendar on every run.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use rayon::prelude::*;

use crate::pit::PointInTimeIndex;
use crate::types::{AvailabilitySpan, DailyAvailabilityRecord, EntityId};

/// Effective bookable duration of a span.
///
/// Returns `(effective_max_stay, is_bookable)`:
/// 1. a set minimum longer than the span makes it unbookable (0 nights);
/// 2. otherwise a set maximum caps the span length;
/// 3. otherwise the whole span is bookable.
pub fn effective_stay(
    consecutive_days: u32,
    min_nights_required: Option<u32>,
    max_nights_allowed: Option<u32>,
) -> (u32, bool) {
    match (min_nights_required, max_nights_allowed) {
        (Some(min), _) if consecutive_days < min => (0, false),
        (_, Some(max)) => (consecutive_days.min(max), true),
        _ => (consecutive_days, true),
    }
}

/// Build availability spans for every entity in `calendar`.
///
/// If an entity has several rows for the same date, the last one in input
/// order is used; dates whose last row is unavailable break spans. Output is sorted by
/// `(entity_id, span_start)`.
pub fn build_spans(calendar: &[DailyAvailabilityRecord]) -> Vec<AvailabilitySpan> {
    let _span = tracing::info_span!("span_build", rows = calendar.len()).entered();

    // Every row is keyed first so a later unavailable row for a date
    // overrides an earlier available one, matching the fact join.
    let mut by_entity: BTreeMap<EntityId, BTreeMap<NaiveDate, &DailyAvailabilityRecord>> =
        BTreeMap::new();
    for rec in calendar {
        by_entity
            .entry(rec.entity_id)
            .or_default()
            .insert(rec.date, rec);
    }

    let spans: Vec<AvailabilitySpan> = by_entity
        .into_par_iter()
        .flat_map_iter(|(entity_id, days)| {
            entity_spans(entity_id, days.into_values().filter(|r| r.is_available))
        })
        .collect();

    tracing::debug!(spans = spans.len(), "availability spans built");
    spans
}

/// Spans for one entity from its available days in ascending date order.
fn entity_spans<'a, I>(entity_id: EntityId, days: I) -> Vec<AvailabilitySpan>
where
    I: IntoIterator<Item = &'a DailyAvailabilityRecord>,
{
    let mut spans = Vec::new();
    let mut current: Option<(i64, SpanAccumulator)> = None;

    for (idx, rec) in days.into_iter().enumerate() {
        let rank = idx as i64 + 1;
        let key = i64::from(rec.date.num_days_from_ce()) - rank;
        match current.as_mut() {
            Some((k, acc)) if *k == key => acc.push(rec),
            _ => {
                if let Some((_, acc)) = current.take() {
                    spans.push(acc.finish(entity_id));
                }
                current = Some((key, SpanAccumulator::start(rec)));
            }
        }
    }
    if let Some((_, acc)) = current {
        spans.push(acc.finish(entity_id));
    }
    spans
}

struct SpanAccumulator {
    start: NaiveDate,
    end: NaiveDate,
    days: u32,
    min_required: Option<u32>,
    max_allowed: Option<u32>,
}

impl SpanAccumulator {
    fn start(rec: &DailyAvailabilityRecord) -> Self {
        let mut acc = Self {
            start: rec.date,
            end: rec.date,
            days: 0,
            min_required: None,
            max_allowed: None,
        };
        acc.push(rec);
        acc
    }

    fn push(&mut self, rec: &DailyAvailabilityRecord) {
        self.start = self.start.min(rec.date);
        self.end = self.end.max(rec.date);
        self.days += 1;
        // Most restrictive minimum wins; zero means unset for both bounds.
        if let Some(min) = rec.min_nights.filter(|&n| n > 0) {
            self.min_required = Some(self.min_required.map_or(min, |m| m.max(min)));
        }
        if let Some(max) = rec.max_nights.filter(|&n| n > 0) {
            self.max_allowed = Some(self.max_allowed.map_or(max, |m| m.min(max)));
        }
    }

    fn finish(self, entity_id: EntityId) -> AvailabilitySpan {
        let (effective_max_stay, is_bookable) =
            effective_stay(self.days, self.min_required, self.max_allowed);
        AvailabilitySpan {
            entity_id,
            span_start: self.start,
            span_end: self.end,
            consecutive_days: self.days,
            min_nights_required: self.min_required,
            max_nights_allowed: self.max_allowed,
            effective_max_stay,
            is_bookable,
        }
    }
}

/// Keep spans whose entity had every attribute in `required` present on the
/// span's first night.
pub fn filter_spans_by_attributes(
    spans: &[AvailabilitySpan],
    index: &PointInTimeIndex<'_>,
    required: &[&str],
) -> Vec<AvailabilitySpan> {
    spans
        .iter()
        .filter(|span| {
            let resolved = index.resolve(span.entity_id, span.span_start);
            required.iter().all(|name| resolved.state.has(name))
        })
        .cloned()
        .collect()
}
