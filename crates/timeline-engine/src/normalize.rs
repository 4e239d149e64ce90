//! Change-event normalization.
//!
//! Collapses raw snapshots into one canonical event per (entity, observed_at).
//! An attribute is present in the event if it appears in any raw record of
//! the group, so the result does not depend on input order.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::NaiveDate;

use crate::error::Result;
use crate::schema::{parse_attribute_list, AttributeSchema};
use crate::types::{AttributeState, ChangeEvent, EntityId, RawSnapshot, StaticSnapshot};

/// Normalize raw snapshots into change events against `schema`.
///
/// Events are returned sorted by `(entity_id, observed_at)`. Tokens missing
/// from `schema` are skipped and logged as a data-quality event.
///
/// # Errors
/// Propagates `TimelineError::SchemaDiscovery` for malformed attribute lists.
pub fn normalize(snapshots: &[RawSnapshot], schema: &AttributeSchema) -> Result<Vec<ChangeEvent>> {
    let mut groups: BTreeMap<(EntityId, NaiveDate), BTreeSet<String>> = BTreeMap::new();

    for snap in snapshots {
        let seen = groups.entry((snap.entity_id, snap.observed_at)).or_default();
        seen.extend(parse_attribute_list(snap.entity_id, &snap.attributes)?);
    }

    let events: Vec<ChangeEvent> = groups
        .into_iter()
        .map(|((entity_id, observed_at), seen)| ChangeEvent {
            entity_id,
            observed_at,
            attribute_state: state_over_schema(entity_id, &seen, schema),
        })
        .collect();

    tracing::debug!(
        raw = snapshots.len(),
        events = events.len(),
        "normalized change events"
    );
    Ok(events)
}

/// Latest static attribute state per entity. Later snapshots in input order
/// replace earlier ones for the same entity.
pub fn static_states(
    statics: &[StaticSnapshot],
    schema: &AttributeSchema,
) -> Result<HashMap<EntityId, AttributeState>> {
    let mut out = HashMap::with_capacity(statics.len());
    for snap in statics {
        let seen: BTreeSet<String> = parse_attribute_list(snap.entity_id, &snap.attributes)?
            .into_iter()
            .collect();
        out.insert(snap.entity_id, state_over_schema(snap.entity_id, &seen, schema));
    }
    Ok(out)
}

fn state_over_schema(
    entity_id: EntityId,
    seen: &BTreeSet<String>,
    schema: &AttributeSchema,
) -> AttributeState {
    for unknown in seen.iter().filter(|name| !schema.contains(name)) {
        tracing::warn!(entity_id, attribute = %unknown, "attribute not in schema, skipped");
    }
    schema
        .iter()
        .map(|name| (name.to_string(), seen.contains(name)))
        .collect()
}
