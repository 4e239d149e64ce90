//! Run configuration and the per-run context passed to every stage.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TimelineError};
use crate::schema::AttributeSchema;

/// How the merge step treats two rows with the same key in one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// The row encountered last in the batch wins.
    #[default]
    LastWriteWins,
    /// Differing payloads for one key abort the batch with `MergeKeyConflict`.
    Reject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreshnessConfig {
    #[serde(default = "default_warn_after_hours")]
    pub warn_after_hours: u32,
    #[serde(default = "default_error_after_hours")]
    pub error_after_hours: u32,
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self {
            warn_after_hours: default_warn_after_hours(),
            error_after_hours: default_error_after_hours(),
        }
    }
}

fn default_warn_after_hours() -> u32 {
    24
}

fn default_error_after_hours() -> u32 {
    72
}

/// Knobs governing one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Days of already-processed history reprocessed by an incremental run.
    #[serde(default = "default_window_days")]
    pub window_days: u32,
    /// How recent an ingestion must be for an old row to count as late.
    #[serde(default = "default_lookback_hours")]
    pub lookback_hours: u32,
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
    /// Size of a dedicated worker pool; the global pool is used when unset.
    #[serde(default)]
    pub threads: Option<usize>,
    #[serde(default)]
    pub freshness: FreshnessConfig,
}

fn default_window_days() -> u32 {
    7
}

fn default_lookback_hours() -> u32 {
    48
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            window_days: default_window_days(),
            lookback_hours: default_lookback_hours(),
            conflict_policy: ConflictPolicy::default(),
            threads: None,
            freshness: FreshnessConfig::default(),
        }
    }
}

impl RunConfig {
    /// Load a config from a JSON file; missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: RunConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.window_days == 0 {
            return Err(TimelineError::Config("window_days must be positive".to_string()));
        }
        if self.threads == Some(0) {
            return Err(TimelineError::Config("threads must be positive".to_string()));
        }
        if self.freshness.warn_after_hours > self.freshness.error_after_hours {
            return Err(TimelineError::Config(format!(
                "warn_after_hours ({}) exceeds error_after_hours ({})",
                self.freshness.warn_after_hours, self.freshness.error_after_hours
            )));
        }
        Ok(())
    }
}

/// Everything a stage needs for one run: the config, the frozen schema and
/// the run's reference clock. Built once and passed by reference.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub config: RunConfig,
    pub schema: AttributeSchema,
    pub now: DateTime<Utc>,
}

impl RunContext {
    pub fn new(config: RunConfig, schema: AttributeSchema, now: DateTime<Utc>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, schema, now })
    }
}
