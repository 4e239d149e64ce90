//! End-to-end tests for a pipeline run: discovery through the incremental
//! merge.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use timeline_engine::export::wide_rows;
use timeline_engine::{
    AttributeSchema, DailyAvailabilityRecord, FactStore, MemoryStore, Pipeline, RawSnapshot,
    RefreshMode, RefreshState, Resolution, RunConfig, SourceSet, StaticSnapshot,
};

// ── Helpers ─────────────────────────────────────────────────────────────────

fn date(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2022, 7, 3, 9, 0, 0).unwrap()
}

fn snapshot(entity_id: u64, attributes: &str, observed_at: &str) -> RawSnapshot {
    RawSnapshot {
        entity_id,
        attributes: attributes.to_string(),
        observed_at: date(observed_at),
        ingested_at: Some(now() - Duration::days(30)),
    }
}

fn night(entity_id: u64, d: &str, available: bool) -> DailyAvailabilityRecord {
    DailyAvailabilityRecord {
        entity_id,
        date: date(d),
        is_available: available,
        price: Some(150.0),
        min_nights: Some(2),
        max_nights: None,
        ingested_at: Some(now() - Duration::days(30)),
    }
}

fn nights(entity_id: u64, from: &str, to: &str) -> Vec<DailyAvailabilityRecord> {
    date(from)
        .iter_days()
        .take_while(|d| *d <= date(to))
        .enumerate()
        .map(|(i, d)| night(entity_id, &d.to_string(), i % 3 != 0))
        .collect()
}

fn sources() -> SourceSet {
    let mut calendar = nights(1, "2022-03-01", "2022-03-31");
    calendar.extend(nights(2, "2022-03-10", "2022-03-20"));
    SourceSet {
        snapshots: vec![
            snapshot(1, r#"["Wifi", "Kitchen"]"#, "2022-01-01"),
            snapshot(1, r#"["Wifi", "Kitchen", "Air conditioning"]"#, "2022-03-15"),
        ],
        statics: vec![StaticSnapshot {
            entity_id: 2,
            attributes: r#"["Wifi"]"#.to_string(),
        }],
        calendar,
    }
}

// ── SCD dimension interface ─────────────────────────────────────────────────

#[test]
fn history_and_resolve_follow_change_events() {
    let src = sources();
    let pipeline = Pipeline::prepare(RunConfig::default(), &src, now()).unwrap();

    let names: Vec<&str> = pipeline.context().schema.iter().collect();
    assert_eq!(names, vec!["Air conditioning", "Kitchen", "Wifi"]);

    let history = pipeline.history(1);
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].valid_to, date("2022-03-14"));

    assert_eq!(pipeline.resolve(1, date("2022-03-14")).get("Air conditioning"), Some(false));
    assert_eq!(pipeline.resolve(1, date("2022-03-16")).get("Air conditioning"), Some(true));
    assert_eq!(pipeline.resolve(2, date("2022-03-16")).get("Wifi"), Some(true));
}

// ── Recompute ───────────────────────────────────────────────────────────────

#[test]
fn first_run_is_a_full_load_even_when_incremental_requested() {
    let src = sources();
    let pipeline = Pipeline::prepare(RunConfig::default(), &src, now()).unwrap();
    let mut store = MemoryStore::new();

    let report = pipeline.recompute(&mut store, RefreshMode::Incremental).unwrap();

    assert_eq!(report.state, RefreshState::FullLoad);
    assert_eq!(report.rows_processed, src.calendar.len());
    assert_eq!(store.len(), src.calendar.len());
    assert_eq!(report.watermark.last_processed_date, Some(date("2022-03-31")));
    assert_eq!(report.join.from_static, 11);
    assert_eq!(
        report.signals,
        vec![RefreshState::SchemaChanged {
            new_attributes: vec![
                "Air conditioning".to_string(),
                "Kitchen".to_string(),
                "Wifi".to_string()
            ],
        }]
    );

    let fact = store.get(2, date("2022-03-12")).unwrap();
    assert_eq!(fact.resolution, Resolution::StaticSnapshot);
}

#[test]
fn incremental_rerun_without_new_data_is_idempotent() {
    let src = sources();
    let pipeline = Pipeline::prepare(RunConfig::default(), &src, now()).unwrap();
    let mut store = MemoryStore::new();

    pipeline.recompute(&mut store, RefreshMode::Full).unwrap();
    let after_full = store.clone();

    let first = pipeline.recompute(&mut store, RefreshMode::Incremental).unwrap();
    let after_first = store.scan();
    let second = pipeline.recompute(&mut store, RefreshMode::Incremental).unwrap();

    assert_eq!(
        first.state,
        RefreshState::Incremental {
            cutoff: date("2022-03-24")
        }
    );
    assert_eq!(first.rows_processed, 8);
    assert_eq!(first.upsert.inserted, 0);
    assert_eq!(first.upsert.updated, 0);
    assert_eq!(first.upsert.unchanged, 8);
    assert!(first.signals.is_empty());

    assert_eq!(store.scan(), after_first);
    assert_eq!(store, after_full);
    assert_eq!(first, second);
}

#[test]
fn incremental_run_reports_late_arrivals_without_full_reprocess() {
    let mut src = sources();
    let pipeline = Pipeline::prepare(RunConfig::default(), &src, now()).unwrap();
    let mut store = MemoryStore::new();
    pipeline.recompute(&mut store, RefreshMode::Full).unwrap();
    drop(pipeline);

    let mut late = night(1, "2022-03-02", false);
    late.price = Some(999.0);
    late.ingested_at = Some(now());
    src.calendar.push(late);

    let pipeline = Pipeline::prepare(RunConfig::default(), &src, now()).unwrap();
    assert_eq!(pipeline.check_late_arrivals(&store, 7, 48), 1);

    let report = pipeline.recompute(&mut store, RefreshMode::Incremental).unwrap();
    assert!(matches!(report.state, RefreshState::Incremental { .. }));
    assert_eq!(report.signals, vec![RefreshState::LateArrivalDetected { count: 1 }]);
    assert_ne!(store.get(1, date("2022-03-02")).unwrap().price, Some(999.0));
}

#[test]
fn schema_growth_only_reaches_rows_in_the_incremental_window() {
    let mut src = sources();
    let pipeline = Pipeline::prepare(RunConfig::default(), &src, now()).unwrap();
    let mut store = MemoryStore::new();
    pipeline.recompute(&mut store, RefreshMode::Full).unwrap();
    drop(pipeline);

    src.snapshots.push(snapshot(1, r#"["Wifi", "Kitchen", "Sauna"]"#, "2022-03-28"));
    let pipeline = Pipeline::prepare(RunConfig::default(), &src, now()).unwrap();

    let check = pipeline.check_schema(&store);
    assert!(check.changed);
    assert_eq!(check.new_attributes, vec!["Sauna".to_string()]);

    let report = pipeline.recompute(&mut store, RefreshMode::Incremental).unwrap();
    assert!(report.signals.contains(&RefreshState::SchemaChanged {
        new_attributes: vec!["Sauna".to_string()]
    }));
    assert!(store.attributes().contains("Sauna"));

    let old = store.get(1, date("2022-03-05")).unwrap();
    assert_eq!(old.attributes.get("Sauna"), None, "outside window stays undefined");
    let touched = store.get(1, date("2022-03-25")).unwrap();
    assert_eq!(touched.attributes.get("Sauna"), Some(false));
    let after_change = store.get(1, date("2022-03-29")).unwrap();
    assert_eq!(after_change.attributes.get("Sauna"), Some(true));

    let schema = AttributeSchema::new(store.attributes().iter());
    let exported = wide_rows(&store.scan(), &schema);
    let first = exported[0].as_object().unwrap();
    assert!(first["Sauna"].is_null());

    pipeline.recompute(&mut store, RefreshMode::Full).unwrap();
    assert_eq!(store.get(1, date("2022-03-05")).unwrap().attributes.get("Sauna"), Some(false));
}

#[test]
fn spans_come_from_the_full_calendar() {
    let src = sources();
    let pipeline = Pipeline::prepare(RunConfig::default(), &src, now()).unwrap();
    let spans = pipeline.spans();

    // Every third night is booked, leaving two-night islands.
    assert!(spans.iter().all(|s| s.consecutive_days <= 2));
    assert!(spans
        .iter()
        .filter(|s| s.consecutive_days == 2)
        .all(|s| s.is_bookable && s.effective_max_stay == 2));
    assert!(spans
        .iter()
        .filter(|s| s.consecutive_days == 1)
        .all(|s| !s.is_bookable));

    let with_ac = pipeline.spans_with_attributes(&["Air conditioning"]);
    assert!(!with_ac.is_empty());
    assert!(with_ac
        .iter()
        .all(|s| s.entity_id == 1 && s.span_start >= date("2022-03-15")));
}

#[test]
fn malformed_attribute_list_aborts_prepare() {
    let mut src = sources();
    src.snapshots.push(snapshot(3, r#"["Wifi""#, "2022-02-01"));
    assert!(Pipeline::prepare(RunConfig::default(), &src, now()).is_err());
}

#[test]
fn dedicated_worker_pool_gives_same_output() {
    let src = sources();
    let config = RunConfig {
        threads: Some(2),
        ..RunConfig::default()
    };
    let pooled = Pipeline::prepare(config, &src, now()).unwrap();
    let global = Pipeline::prepare(RunConfig::default(), &src, now()).unwrap();

    assert_eq!(pooled.windows(), global.windows());
    assert_eq!(pooled.spans(), global.spans());
}
