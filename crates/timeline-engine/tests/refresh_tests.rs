//! Tests for incremental scope selection, late-arrival detection and the
//! advisory refresh strategy.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use timeline_engine::refresh::{
    count_late_arrivals, plan, recommend_strategy, rows_in_scope, RefreshMode, RefreshState,
};
use timeline_engine::{DailyAvailabilityRecord, SchemaChangeReport};

// ── Helpers ─────────────────────────────────────────────────────────────────

fn date(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2022, 7, 3, 9, 0, 0).unwrap()
}

fn row(d: &str, ingested_at: Option<DateTime<Utc>>) -> DailyAvailabilityRecord {
    DailyAvailabilityRecord {
        entity_id: 1,
        date: date(d),
        is_available: true,
        price: None,
        min_nights: None,
        max_nights: None,
        ingested_at,
    }
}

// ── Late arrivals ───────────────────────────────────────────────────────────

#[test]
fn old_row_ingested_now_is_late() {
    let calendar = vec![row("2022-06-01", Some(now()))];
    let count = count_late_arrivals(&calendar, Some(date("2022-07-01")), 7, 48, now());
    assert_eq!(count, 1);
}

#[test]
fn old_row_ingested_long_ago_is_not_late() {
    let calendar = vec![row("2022-06-01", Some(now() - Duration::hours(49)))];
    assert_eq!(count_late_arrivals(&calendar, Some(date("2022-07-01")), 7, 48, now()), 0);
}

#[test]
fn row_inside_window_is_not_late() {
    // Threshold is 2022-06-24; rows on or after it are reprocessed anyway.
    let calendar = vec![
        row("2022-06-24", Some(now())),
        row("2022-06-30", Some(now())),
    ];
    assert_eq!(count_late_arrivals(&calendar, Some(date("2022-07-01")), 7, 48, now()), 0);
}

#[test]
fn rows_without_ingestion_time_or_prior_output_are_not_late() {
    let calendar = vec![row("2022-06-01", None), row("2022-06-02", Some(now()))];
    assert_eq!(count_late_arrivals(&calendar, Some(date("2022-07-01")), 7, 48, now()), 1);
    assert_eq!(count_late_arrivals(&calendar, None, 7, 48, now()), 0);
}

#[test]
fn lookback_beyond_the_calendar_range_counts_every_ingested_row() {
    let calendar = vec![
        row("2022-06-01", Some(now() - Duration::days(365 * 50))),
        row("2022-06-02", None),
    ];
    let count = count_late_arrivals(&calendar, Some(date("2022-07-01")), 7, u32::MAX, now());
    assert_eq!(count, 1);
}

// ── Scope ───────────────────────────────────────────────────────────────────

#[test]
fn incremental_scope_keeps_rows_on_or_after_cutoff() {
    let calendar = vec![
        row("2022-06-23", None),
        row("2022-06-24", None),
        row("2022-07-02", None),
    ];
    let state = plan(RefreshMode::Incremental, Some(date("2022-07-01")), 7);
    let scoped: Vec<NaiveDate> = rows_in_scope(&calendar, &state).iter().map(|r| r.date).collect();
    assert_eq!(scoped, vec![date("2022-06-24"), date("2022-07-02")]);
}

#[test]
fn full_load_scope_is_everything() {
    let calendar = vec![row("2020-01-01", None), row("2022-07-02", None)];
    let state = plan(RefreshMode::Full, Some(date("2022-07-01")), 7);
    assert_eq!(state, RefreshState::FullLoad);
    assert_eq!(rows_in_scope(&calendar, &state).len(), 2);
}

// ── Strategy ────────────────────────────────────────────────────────────────

#[test]
fn full_reprocess_recommended_on_any_signal() {
    let unchanged = SchemaChangeReport::default();
    let grown = SchemaChangeReport {
        changed: true,
        new_attributes: vec!["Sauna".to_string()],
    };
    assert_eq!(recommend_strategy(&unchanged, 0), RefreshMode::Incremental);
    assert_eq!(recommend_strategy(&unchanged, 2), RefreshMode::Full);
    assert_eq!(recommend_strategy(&grown, 0), RefreshMode::Full);
}
