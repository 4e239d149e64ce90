//! Source freshness check.
//!
//! Compares the newest ingestion timestamp of each source with the run
//! clock. A warning lets the pipeline continue on possibly stale data; an
//! error is blocking and should stop the run before any stage executes.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::FreshnessConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreshnessStatus {
    Pass,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFreshness {
    pub name: String,
    pub max_loaded_at: Option<DateTime<Utc>>,
    pub status: FreshnessStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreshnessReport {
    pub passed: Vec<SourceFreshness>,
    pub warned: Vec<SourceFreshness>,
    pub errored: Vec<SourceFreshness>,
}

impl FreshnessReport {
    pub fn is_blocking(&self) -> bool {
        !self.errored.is_empty()
    }
}

/// Classify one source by the age of its newest row.
///
/// A source with no ingestion timestamps at all cannot be shown to be fresh
/// and is classified as an error.
pub fn classify(
    max_loaded_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    config: &FreshnessConfig,
) -> FreshnessStatus {
    let Some(loaded) = max_loaded_at else {
        return FreshnessStatus::Error;
    };
    let age = now - loaded;
    if age <= Duration::hours(i64::from(config.warn_after_hours)) {
        FreshnessStatus::Pass
    } else if age <= Duration::hours(i64::from(config.error_after_hours)) {
        FreshnessStatus::Warn
    } else {
        FreshnessStatus::Error
    }
}

/// Build a report for named sources, each given as its ingestion timestamps.
pub fn check<'a, I, T>(sources: I, now: DateTime<Utc>, config: &FreshnessConfig) -> FreshnessReport
where
    I: IntoIterator<Item = (&'a str, T)>,
    T: IntoIterator<Item = Option<DateTime<Utc>>>,
{
    let mut report = FreshnessReport::default();
    for (name, stamps) in sources {
        let max_loaded_at = stamps.into_iter().flatten().max();
        let status = classify(max_loaded_at, now, config);
        let entry = SourceFreshness {
            name: name.to_string(),
            max_loaded_at,
            status,
        };
        match status {
            FreshnessStatus::Pass => report.passed.push(entry),
            FreshnessStatus::Warn => {
                tracing::warn!(source = name, "source is stale");
                report.warned.push(entry)
            }
            FreshnessStatus::Error => {
                tracing::warn!(source = name, "source is critically stale");
                report.errored.push(entry)
            }
        }
    }
    report
}
