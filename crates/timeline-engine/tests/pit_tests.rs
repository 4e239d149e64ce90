//! Tests for point-in-time resolution and the calendar fact join.

use std::collections::HashMap;

use chrono::NaiveDate;
use timeline_engine::pit::PointInTimeIndex;
use timeline_engine::{
    build_windows, AttributeSchema, AttributeState, ChangeEvent, DailyAvailabilityRecord,
    Resolution,
};

// ── Helpers ─────────────────────────────────────────────────────────────────

fn date(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

fn ac(entity_id: u64, observed_at: &str, present: bool) -> ChangeEvent {
    ChangeEvent {
        entity_id,
        observed_at: date(observed_at),
        attribute_state: [("AC".to_string(), present)].into_iter().collect(),
    }
}

fn night(entity_id: u64, d: &str, available: bool, price: Option<f64>) -> DailyAvailabilityRecord {
    DailyAvailabilityRecord {
        entity_id,
        date: date(d),
        is_available: available,
        price,
        min_nights: None,
        max_nights: None,
        ingested_at: None,
    }
}

fn schema() -> AttributeSchema {
    AttributeSchema::new(["AC"])
}

// ── Single lookups ──────────────────────────────────────────────────────────

#[test]
fn resolves_state_on_both_sides_of_a_change() {
    let windows = build_windows(&[ac(1, "2022-01-01", false), ac(1, "2022-03-15", true)]).unwrap();
    let statics = HashMap::new();
    let index = PointInTimeIndex::new(&windows, &statics, &schema());

    let before = index.resolve(1, date("2022-03-14"));
    assert_eq!(before.state.get("AC"), Some(false));
    assert_eq!(before.resolution, Resolution::Window);

    assert_eq!(index.resolve(1, date("2022-03-15")).state.get("AC"), Some(true));
    assert_eq!(index.resolve(1, date("2022-03-16")).state.get("AC"), Some(true));
    assert_eq!(index.resolve(1, date("2031-01-01")).state.get("AC"), Some(true));
}

#[test]
fn unknown_entity_falls_back_to_static_snapshot() {
    let windows = build_windows(&[]).unwrap();
    let mut statics = HashMap::new();
    let snapshot: AttributeState = [("AC".to_string(), true)].into_iter().collect();
    statics.insert(9, snapshot.clone());
    let index = PointInTimeIndex::new(&windows, &statics, &schema());

    let resolved = index.resolve(9, date("2022-05-01"));
    assert_eq!(resolved.resolution, Resolution::StaticSnapshot);
    assert_eq!(resolved.state, &snapshot);
}

#[test]
fn unknown_entity_without_snapshot_gets_all_false_default() {
    let windows = build_windows(&[]).unwrap();
    let statics = HashMap::new();
    let index = PointInTimeIndex::new(&windows, &statics, &schema());

    let resolved = index.resolve(9, date("2022-05-01"));
    assert_eq!(resolved.resolution, Resolution::Default);
    assert_eq!(resolved.state.get("AC"), Some(false));
}

#[test]
fn date_before_first_window_uses_fallback() {
    let windows = build_windows(&[ac(1, "2022-03-01", true)]).unwrap();
    let statics = HashMap::new();
    let index = PointInTimeIndex::new(&windows, &statics, &schema());

    assert_eq!(index.resolve(1, date("2022-02-28")).resolution, Resolution::Default);
}

// ── Batch join ──────────────────────────────────────────────────────────────

#[test]
fn join_matches_single_lookups_and_derives_revenue() {
    let windows = build_windows(&[
        ac(1, "2022-01-01", false),
        ac(1, "2022-03-15", true),
        ac(2, "2022-01-01", true),
    ])
    .unwrap();
    let statics = HashMap::new();
    let index = PointInTimeIndex::new(&windows, &statics, &schema());

    let calendar = vec![
        night(1, "2022-03-16", false, Some(120.0)),
        night(2, "2022-02-01", true, Some(80.0)),
        night(1, "2022-03-14", true, Some(100.0)),
        night(3, "2022-03-14", false, None),
    ];
    let (facts, stats) = index.join_calendar(&calendar);

    assert_eq!(facts.len(), 4);
    let keys: Vec<(u64, NaiveDate)> = facts.iter().map(|f| f.key()).collect();
    assert_eq!(
        keys,
        vec![
            (1, date("2022-03-14")),
            (1, date("2022-03-16")),
            (2, date("2022-02-01")),
            (3, date("2022-03-14")),
        ]
    );

    for fact in &facts {
        let single = index.resolve(fact.entity_id, fact.date);
        assert_eq!(&fact.attributes, single.state);
        assert_eq!(fact.resolution, single.resolution);
    }

    assert_eq!(facts[0].revenue, 0.0);
    assert!(!facts[0].is_occupied);
    assert_eq!(facts[1].revenue, 120.0);
    assert!(facts[1].is_occupied);
    assert_eq!(facts[3].revenue, 0.0, "occupied without price earns nothing");

    assert_eq!(stats.from_window, 3);
    assert_eq!(stats.defaulted, 1);
    assert_eq!(stats.unresolved(), 1);
}
