//! Incremental refresh control.
//!
//! Decides whether a run is a full load or an incremental reprocess of the
//! trailing `window_days` of output, and detects the two conditions an
//! operator may want to answer with a full reprocess: late-arriving source
//! rows and schema growth. Detection is report-only; nothing here triggers
//! a reprocess by itself.

use std::fmt;

use chrono::{DateTime, Days, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::schema::SchemaChangeReport;
use crate::types::DailyAvailabilityRecord;

/// Process-wide incremental state, persisted with the output and advanced
/// only when a run commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    pub last_processed_date: Option<NaiveDate>,
    pub window_days: u32,
    pub lookback_hours: u32,
}

/// Requested refresh mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshMode {
    Full,
    Incremental,
}

impl std::str::FromStr for RefreshMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(RefreshMode::Full),
            "incremental" => Ok(RefreshMode::Incremental),
            other => Err(format!("unknown refresh mode '{}': expected full or incremental", other)),
        }
    }
}

/// Controller states. `FullLoad` and `Incremental` describe the run itself;
/// the other two are signals raised alongside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefreshState {
    FullLoad,
    Incremental { cutoff: NaiveDate },
    LateArrivalDetected { count: usize },
    SchemaChanged { new_attributes: Vec<String> },
}

/// Choose the run state for a requested mode.
///
/// A full load happens when asked for or when there is no prior output.
/// Otherwise rows dated on or after `max_fact_date − window_days` are
/// reprocessed.
pub fn plan(requested: RefreshMode, max_fact_date: Option<NaiveDate>, window_days: u32) -> RefreshState {
    match (requested, max_fact_date) {
        (RefreshMode::Incremental, Some(max)) => RefreshState::Incremental {
            cutoff: days_before(max, window_days),
        },
        _ => RefreshState::FullLoad,
    }
}

/// Calendar rows in scope for `state`.
pub fn rows_in_scope<'a>(
    calendar: &'a [DailyAvailabilityRecord],
    state: &RefreshState,
) -> Vec<&'a DailyAvailabilityRecord> {
    match state {
        RefreshState::Incremental { cutoff } => {
            calendar.iter().filter(|r| r.date >= *cutoff).collect()
        }
        _ => calendar.iter().collect(),
    }
}

/// Count source rows whose business date is older than
/// `max_fact_date − window_days` but which were ingested within the last
/// `lookback_hours` before `now`.
///
/// Rows without an ingestion timestamp are never late. With no prior
/// output there is nothing to be late for, so the count is zero.
pub fn count_late_arrivals(
    calendar: &[DailyAvailabilityRecord],
    max_fact_date: Option<NaiveDate>,
    window_days: u32,
    lookback_hours: u32,
    now: DateTime<Utc>,
) -> usize {
    let Some(max) = max_fact_date else {
        return 0;
    };
    let threshold = days_before(max, window_days);
    let ingested_after = now
        .checked_sub_signed(Duration::hours(i64::from(lookback_hours)))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);

    let count = calendar
        .iter()
        .filter(|r| r.date < threshold)
        .filter(|r| r.ingested_at.is_some_and(|t| t >= ingested_after))
        .count();

    if count > 0 {
        tracing::warn!(count, threshold = %threshold, "late-arriving source rows detected");
    }
    count
}

/// Late-arrival signal. Displays as `LATE_ARRIVAL_COUNT=<n>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LateArrivalReport {
    pub count: usize,
}

impl fmt::Display for LateArrivalReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LATE_ARRIVAL_COUNT={}", self.count)
    }
}

/// Advisory strategy for the operator: a full reprocess is recommended when
/// the schema grew or late rows were found.
pub fn recommend_strategy(schema: &SchemaChangeReport, late_count: usize) -> RefreshMode {
    if schema.changed || late_count > 0 {
        RefreshMode::Full
    } else {
        RefreshMode::Incremental
    }
}

fn days_before(date: NaiveDate, days: u32) -> NaiveDate {
    date.checked_sub_days(Days::new(u64::from(days)))
        .unwrap_or(NaiveDate::MIN)
}
