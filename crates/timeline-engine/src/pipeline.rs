//! One pipeline run: schema discovery, normalization, window building, the
//! point-in-time fact join and the incremental merge.
//!
//! [`Pipeline::prepare`] discovers the schema once and freezes it into the
//! run's [`RunContext`]; every later operation reads that same context.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};

use crate::config::{RunConfig, RunContext};
use crate::error::{Result, TimelineError};
use crate::normalize;
use crate::pit::{JoinStats, PointInTimeIndex};
use crate::refresh::{self, RefreshMode, RefreshState, Watermark};
use crate::schema::{self, SchemaChangeReport};
use crate::scd::{self, WindowSet};
use crate::spans;
use crate::store::{BatchWrite, FactStore, UpsertStats, WriteMode};
use crate::types::{
    AttributeState, AvailabilitySpan, DailyAvailabilityRecord, EntityId, RawSnapshot,
    StaticSnapshot, ValidityWindow,
};

/// Raw inputs of one run, as delivered by the ingestion collaborators.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceSet {
    #[serde(default)]
    pub snapshots: Vec<RawSnapshot>,
    #[serde(default)]
    pub statics: Vec<StaticSnapshot>,
    #[serde(default)]
    pub calendar: Vec<DailyAvailabilityRecord>,
}

/// Outcome of [`Pipeline::recompute`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub state: RefreshState,
    /// Late-arrival and schema-change signals raised during the run.
    pub signals: Vec<RefreshState>,
    pub rows_processed: usize,
    pub upsert: UpsertStats,
    pub join: JoinStats,
    pub watermark: Watermark,
}

pub struct Pipeline<'a> {
    ctx: RunContext,
    sources: &'a SourceSet,
    windows: WindowSet,
    statics: HashMap<EntityId, AttributeState>,
    pool: Option<ThreadPool>,
}

impl<'a> Pipeline<'a> {
    /// Discover the schema, normalize change events and build windows.
    ///
    /// # Errors
    /// `SchemaDiscovery` for unreadable attribute lists,
    /// `WindowInvariantViolation` if window construction breaks the
    /// partition invariant, `Config` for an invalid config.
    pub fn prepare(config: RunConfig, sources: &'a SourceSet, now: DateTime<Utc>) -> Result<Self> {
        let schema = schema::discover(&sources.snapshots, &sources.statics)?;
        let ctx = RunContext::new(config, schema, now)?;

        let pool = match ctx.config.threads {
            Some(n) => Some(
                ThreadPoolBuilder::new()
                    .num_threads(n)
                    .build()
                    .map_err(|e| TimelineError::Config(format!("worker pool: {}", e)))?,
            ),
            None => None,
        };

        let events = normalize::normalize(&sources.snapshots, &ctx.schema)?;
        let statics = normalize::static_states(&sources.statics, &ctx.schema)?;
        let windows = match &pool {
            Some(p) => p.install(|| scd::build_windows(&events))?,
            None => scd::build_windows(&events)?,
        };

        tracing::info!(
            attributes = ctx.schema.len(),
            entities = windows.entity_count(),
            windows = windows.window_count(),
            "pipeline prepared"
        );
        Ok(Self {
            ctx,
            sources,
            windows,
            statics,
            pool,
        })
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    pub fn windows(&self) -> &WindowSet {
        &self.windows
    }

    pub fn index(&self) -> PointInTimeIndex<'_> {
        PointInTimeIndex::new(&self.windows, &self.statics, &self.ctx.schema)
    }

    /// Full ordered window history of one entity.
    pub fn history(&self, entity_id: EntityId) -> &[ValidityWindow] {
        self.windows.history(entity_id)
    }

    /// Attribute state of `entity_id` as of `date`.
    pub fn resolve(&self, entity_id: EntityId, date: NaiveDate) -> AttributeState {
        self.index().resolve(entity_id, date).state.clone()
    }

    fn install<T: Send>(&self, f: impl FnOnce() -> T + Send) -> T {
        match &self.pool {
            Some(p) => p.install(f),
            None => f(),
        }
    }

    /// Availability spans recomputed from the full calendar.
    pub fn spans(&self) -> Vec<AvailabilitySpan> {
        self.install(|| spans::build_spans(&self.sources.calendar))
    }

    /// Spans whose entity had all `required` attributes on the first night.
    pub fn spans_with_attributes(&self, required: &[&str]) -> Vec<AvailabilitySpan> {
        let all = self.spans();
        spans::filter_spans_by_attributes(&all, &self.index(), required)
    }

    /// Compare the run's schema with the attributes already in `store`.
    pub fn check_schema<S: FactStore>(&self, store: &S) -> SchemaChangeReport {
        schema::diff(&self.ctx.schema, store.attributes())
    }

    /// Count late-arriving calendar rows relative to the output in `store`.
    pub fn check_late_arrivals<S: FactStore>(
        &self,
        store: &S,
        window_days: u32,
        lookback_hours: u32,
    ) -> usize {
        refresh::count_late_arrivals(
            &self.sources.calendar,
            store.max_fact_date(),
            window_days,
            lookback_hours,
            self.ctx.now,
        )
    }

    /// Recompute fact rows and commit them to `store` in one batch.
    ///
    /// An incremental request against an empty store runs as a full load.
    /// Late arrivals and schema growth are reported in `signals` but never
    /// change the mode. The watermark advances only if the commit succeeds.
    pub fn recompute<S: FactStore>(&self, store: &mut S, mode: RefreshMode) -> Result<RunReport> {
        let cfg = &self.ctx.config;
        let _span = tracing::info_span!("recompute", ?mode).entered();

        let prior_max = store.max_fact_date();
        let state = refresh::plan(mode, prior_max, cfg.window_days);

        let mut signals = Vec::new();
        let late = self.check_late_arrivals(store, cfg.window_days, cfg.lookback_hours);
        if late > 0 {
            signals.push(RefreshState::LateArrivalDetected { count: late });
        }
        let schema_change = self.check_schema(store);
        if schema_change.changed {
            tracing::warn!(new_attributes = ?schema_change.new_attributes, "schema grew");
            signals.push(RefreshState::SchemaChanged {
                new_attributes: schema_change.new_attributes.clone(),
            });
        }

        let scope = refresh::rows_in_scope(&self.sources.calendar, &state);
        let rows_processed = scope.len();
        let index = self.index();
        let (rows, join) = self.install(|| index.join_calendar(scope));

        let last_processed_date = rows.iter().map(|r| r.date).max().max(prior_max);
        let watermark = Watermark {
            last_processed_date,
            window_days: cfg.window_days,
            lookback_hours: cfg.lookback_hours,
        };
        let write_mode = match state {
            RefreshState::FullLoad => WriteMode::Replace,
            _ => WriteMode::Upsert,
        };

        let upsert = store.apply(BatchWrite {
            mode: write_mode,
            rows,
            new_attributes: schema_change.new_attributes,
            watermark: watermark.clone(),
            policy: cfg.conflict_policy,
        })?;

        tracing::info!(
            rows_processed,
            inserted = upsert.inserted,
            updated = upsert.updated,
            unchanged = upsert.unchanged,
            "run committed"
        );
        Ok(RunReport {
            state,
            signals,
            rows_processed,
            upsert,
            join,
            watermark,
        })
    }
}
