//! SCD type-2 window construction.
//!
//! Converts each entity's change events into contiguous, non-overlapping
//! validity windows. The last window of every entity is open-ended: it is
//! the only current window and ends at [`SENTINEL_MAX_DATE`].
//!
//! Window sets are owned per entity and rebuilt wholesale whenever that
//! entity's event history changes; a window's interior is never patched.
//!
//! Tie-break: when several events of one entity share an `observed_at`, the
//! one encountered last in input order wins and the others are discarded.

use std::collections::BTreeMap;

use chrono::{Days, NaiveDate};
use rayon::prelude::*;

use crate::error::{Result, TimelineError};
use crate::types::{ChangeEvent, EntityId, ValidityWindow, SENTINEL_MAX_DATE};

/// Per-entity validity windows, each entity's list sorted by `valid_from`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowSet {
    by_entity: BTreeMap<EntityId, Vec<ValidityWindow>>,
}

impl WindowSet {
    /// Full ordered window history of one entity (empty if unknown).
    pub fn history(&self, entity_id: EntityId) -> &[ValidityWindow] {
        self.by_entity
            .get(&entity_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The current (open-ended) window of one entity.
    pub fn current(&self, entity_id: EntityId) -> Option<&ValidityWindow> {
        self.history(entity_id).last().filter(|w| w.is_current)
    }

    pub fn entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.by_entity.keys().copied()
    }

    /// All windows ordered by `(entity_id, valid_from)`.
    pub fn iter(&self) -> impl Iterator<Item = &ValidityWindow> {
        self.by_entity.values().flatten()
    }

    pub fn entity_count(&self) -> usize {
        self.by_entity.len()
    }

    pub fn window_count(&self) -> usize {
        self.by_entity.values().map(Vec::len).sum()
    }

    /// Replace one entity's windows with ones rebuilt from its full event
    /// history.
    ///
    /// # Errors
    /// Returns `WindowInvariantViolation` if the rebuilt windows are invalid;
    /// the previous windows are kept in that case.
    pub fn rebuild_entity(&mut self, entity_id: EntityId, events: Vec<ChangeEvent>) -> Result<()> {
        let windows = build_entity_windows(entity_id, events)?;
        if windows.is_empty() {
            self.by_entity.remove(&entity_id);
        } else {
            self.by_entity.insert(entity_id, windows);
        }
        Ok(())
    }
}

/// Build windows for every entity present in `events`.
///
/// Entities are processed in parallel; each entity's events are sorted
/// ascending by `observed_at` before windows are cut.
///
/// # Errors
/// Aborts with `WindowInvariantViolation` on the first invalid entity.
pub fn build_windows(events: &[ChangeEvent]) -> Result<WindowSet> {
    let _span = tracing::info_span!("scd_build", events = events.len()).entered();

    let mut grouped: BTreeMap<EntityId, Vec<ChangeEvent>> = BTreeMap::new();
    for ev in events {
        grouped.entry(ev.entity_id).or_default().push(ev.clone());
    }

    let built: Vec<(EntityId, Vec<ValidityWindow>)> = grouped
        .into_par_iter()
        .map(|(entity_id, evs)| build_entity_windows(entity_id, evs).map(|w| (entity_id, w)))
        .collect::<Result<_>>()?;

    let set = WindowSet {
        by_entity: built.into_iter().collect(),
    };
    tracing::debug!(
        entities = set.entity_count(),
        windows = set.window_count(),
        "validity windows built"
    );
    Ok(set)
}

/// Cut one entity's events into validity windows and verify the result.
///
/// Events with a different `entity_id` are a caller bug and are reported
/// as an invariant violation.
pub fn build_entity_windows(
    entity_id: EntityId,
    mut events: Vec<ChangeEvent>,
) -> Result<Vec<ValidityWindow>> {
    if let Some(stray) = events.iter().find(|e| e.entity_id != entity_id) {
        return Err(violation(
            entity_id,
            format!("event for entity {} in this partition", stray.entity_id),
        ));
    }

    // Stable sort keeps input order among equal dates, so `last wins` below
    // means last in input order.
    events.sort_by_key(|e| e.observed_at);

    let mut boundaries: Vec<ChangeEvent> = Vec::with_capacity(events.len());
    for ev in events {
        match boundaries.last_mut() {
            Some(last) if last.observed_at == ev.observed_at => {
                if last.attribute_state != ev.attribute_state {
                    tracing::debug!(
                        entity_id,
                        observed_at = %ev.observed_at,
                        "duplicate change date, keeping the later event"
                    );
                }
                *last = ev;
            }
            _ => boundaries.push(ev),
        }
    }

    let mut windows = Vec::with_capacity(boundaries.len());
    let mut iter = boundaries.into_iter().peekable();
    while let Some(ev) = iter.next() {
        let (valid_to, is_current) = match iter.peek() {
            Some(next) => (day_before(entity_id, next.observed_at)?, false),
            None => (SENTINEL_MAX_DATE, true),
        };
        windows.push(ValidityWindow {
            entity_id,
            attribute_state: ev.attribute_state,
            valid_from: ev.observed_at,
            valid_to,
            is_current,
        });
    }

    validate_windows(entity_id, &windows)?;
    Ok(windows)
}

/// Check the partition invariant for one entity's windows: ordered,
/// contiguous, non-overlapping, exactly one current window ending at the
/// sentinel.
pub fn validate_windows(entity_id: EntityId, windows: &[ValidityWindow]) -> Result<()> {
    if windows.is_empty() {
        return Ok(());
    }

    for w in windows {
        if w.entity_id != entity_id {
            return Err(violation(entity_id, format!("window owned by entity {}", w.entity_id)));
        }
        if w.valid_from > w.valid_to {
            return Err(violation(
                entity_id,
                format!("window {}..{} is inverted", w.valid_from, w.valid_to),
            ));
        }
    }

    for pair in windows.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        let expected = prev.valid_to.checked_add_days(Days::new(1));
        if expected != Some(next.valid_from) {
            let kind = if next.valid_from <= prev.valid_to { "overlap" } else { "gap" };
            return Err(violation(
                entity_id,
                format!(
                    "{} between window ending {} and window starting {}",
                    kind, prev.valid_to, next.valid_from
                ),
            ));
        }
    }

    let current = windows.iter().filter(|w| w.is_current).count();
    if current != 1 {
        return Err(violation(entity_id, format!("{} current windows", current)));
    }
    let last = &windows[windows.len() - 1];
    if !last.is_current || last.valid_to != SENTINEL_MAX_DATE {
        return Err(violation(
            entity_id,
            "last window is not the open-ended current window".to_string(),
        ));
    }
    Ok(())
}

fn day_before(entity_id: EntityId, date: NaiveDate) -> Result<NaiveDate> {
    date.checked_sub_days(Days::new(1))
        .ok_or_else(|| violation(entity_id, format!("no day before {}", date)))
}

fn violation(entity_id: EntityId, message: String) -> TimelineError {
    tracing::error!(entity_id, %message, "window invariant violated");
    TimelineError::WindowInvariantViolation { entity_id, message }
}
