//! `timeline` CLI — run and inspect the rental timeline pipeline.
//!
//! ## Usage
//!
//! ```sh
//! # Full load into a JSON fact store
//! timeline recompute --mode full --snapshots amenities.json \
//!     --calendar calendar.json --store facts.json
//!
//! # Incremental run (reprocesses the trailing window)
//! timeline recompute --mode incremental --snapshots amenities.json \
//!     --calendar calendar.json --store facts.json
//!
//! # Operator checks
//! timeline check-schema --snapshots amenities.json --store facts.json
//! timeline check-late-arrivals --calendar calendar.json --store facts.json
//! timeline plan --snapshots amenities.json --calendar calendar.json --store facts.json
//!
//! # Dimension and span queries
//! timeline history --snapshots amenities.json --entity 42
//! timeline resolve --snapshots amenities.json --entity 42 --date 2022-03-14
//! timeline spans --calendar calendar.json --require Lockbox,"First aid kit"
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde::Serialize;
use timeline_engine::export::wide_rows;
use timeline_engine::freshness;
use timeline_engine::refresh::recommend_strategy;
use timeline_engine::{
    FactStore, JsonFileStore, LateArrivalReport, Pipeline, RefreshMode, RunConfig, SourceSet,
};

#[derive(Parser)]
#[command(
    name = "timeline",
    version,
    about = "Point-in-time listing history and bookable spans"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log debug-level pipeline events to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Source files and run settings shared by every pipeline subcommand.
#[derive(Args)]
struct InputArgs {
    /// JSON array of raw attribute snapshots
    #[arg(long)]
    snapshots: Option<String>,
    /// JSON array of daily calendar rows
    #[arg(long)]
    calendar: Option<String>,
    /// JSON array of static listing snapshots (fallback attribute state)
    #[arg(long)]
    listings: Option<String>,
    /// JSON run configuration file
    #[arg(long)]
    config: Option<String>,
    /// Reference clock (RFC 3339); defaults to the current time
    #[arg(long)]
    now: Option<DateTime<Utc>>,
}

#[derive(Subcommand)]
enum Commands {
    /// Recompute fact rows and merge them into the store
    Recompute {
        #[command(flatten)]
        inputs: InputArgs,
        /// JSON fact store file (created if missing)
        #[arg(long)]
        store: String,
        /// Refresh mode: full or incremental
        #[arg(long, default_value = "incremental")]
        mode: RefreshMode,
    },
    /// Report attributes discovered in the source but missing from the store
    CheckSchema {
        #[command(flatten)]
        inputs: InputArgs,
        #[arg(long)]
        store: String,
    },
    /// Count late-arriving calendar rows
    CheckLateArrivals {
        #[command(flatten)]
        inputs: InputArgs,
        #[arg(long)]
        store: String,
        /// Overrides window_days from the config
        #[arg(long)]
        window_days: Option<u32>,
        /// Overrides lookback_hours from the config
        #[arg(long)]
        lookback_hours: Option<u32>,
    },
    /// Print the advisory refresh strategy for the next run
    Plan {
        #[command(flatten)]
        inputs: InputArgs,
        #[arg(long)]
        store: String,
    },
    /// Print availability spans
    Spans {
        #[command(flatten)]
        inputs: InputArgs,
        /// Comma-separated attributes every kept span's entity must have
        #[arg(long)]
        require: Option<String>,
    },
    /// Print the validity window history of one entity
    History {
        #[command(flatten)]
        inputs: InputArgs,
        #[arg(long)]
        entity: u64,
    },
    /// Print the attribute state of one entity as of a date
    Resolve {
        #[command(flatten)]
        inputs: InputArgs,
        #[arg(long)]
        entity: u64,
        #[arg(long)]
        date: NaiveDate,
    },
    /// Check source freshness; fails when a source is critically stale
    Freshness {
        #[command(flatten)]
        inputs: InputArgs,
    },
    /// Print stored fact rows with one column per attribute
    Export {
        #[arg(long)]
        store: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .init();

    match cli.command {
        Commands::Recompute {
            inputs,
            store,
            mode,
        } => {
            let (config, sources, now) = load_run(&inputs)?;
            let pipeline = Pipeline::prepare(config, &sources, now).context("Failed to prepare run")?;
            let mut store = open_store(&store)?;
            let report = pipeline
                .recompute(&mut store, mode)
                .context("Recompute failed")?;
            print_json(&report)?;
        }
        Commands::CheckSchema { inputs, store } => {
            let (config, sources, now) = load_run(&inputs)?;
            let pipeline = Pipeline::prepare(config, &sources, now).context("Failed to prepare run")?;
            let store = open_store(&store)?;
            print_json(&pipeline.check_schema(&store))?;
        }
        Commands::CheckLateArrivals {
            inputs,
            store,
            window_days,
            lookback_hours,
        } => {
            let (config, sources, now) = load_run(&inputs)?;
            let window_days = window_days.unwrap_or(config.window_days);
            let lookback_hours = lookback_hours.unwrap_or(config.lookback_hours);
            let pipeline = Pipeline::prepare(config, &sources, now).context("Failed to prepare run")?;
            let store = open_store(&store)?;
            let count = pipeline.check_late_arrivals(&store, window_days, lookback_hours);
            println!("{}", LateArrivalReport { count });
        }
        Commands::Plan { inputs, store } => {
            let (config, sources, now) = load_run(&inputs)?;
            let (window_days, lookback_hours) = (config.window_days, config.lookback_hours);
            let pipeline = Pipeline::prepare(config, &sources, now).context("Failed to prepare run")?;
            let store = open_store(&store)?;
            let schema = pipeline.check_schema(&store);
            let late = pipeline.check_late_arrivals(&store, window_days, lookback_hours);
            let strategy = match recommend_strategy(&schema, late) {
                RefreshMode::Full => "full",
                RefreshMode::Incremental => "incremental",
            };
            print_json(&serde_json::json!({
                "strategy": strategy,
                "schema_change": schema,
                "late_arrival_count": late,
            }))?;
        }
        Commands::Spans { inputs, require } => {
            let (config, sources, now) = load_run(&inputs)?;
            let pipeline = Pipeline::prepare(config, &sources, now).context("Failed to prepare run")?;
            let required = split_list(require.as_deref());
            let spans = if required.is_empty() {
                pipeline.spans()
            } else {
                let refs: Vec<&str> = required.iter().map(|s| s.as_str()).collect();
                pipeline.spans_with_attributes(&refs)
            };
            print_json(&spans)?;
        }
        Commands::History { inputs, entity } => {
            let (config, sources, now) = load_run(&inputs)?;
            let pipeline = Pipeline::prepare(config, &sources, now).context("Failed to prepare run")?;
            print_json(&pipeline.history(entity))?;
        }
        Commands::Resolve {
            inputs,
            entity,
            date,
        } => {
            let (config, sources, now) = load_run(&inputs)?;
            let pipeline = Pipeline::prepare(config, &sources, now).context("Failed to prepare run")?;
            let index = pipeline.index();
            let resolved = index.resolve(entity, date);
            print_json(&serde_json::json!({
                "entity_id": entity,
                "date": date,
                "resolution": resolved.resolution,
                "attributes": resolved.state,
            }))?;
        }
        Commands::Freshness { inputs } => {
            let (config, sources, now) = load_run(&inputs)?;
            let report = freshness::check(
                [
                    (
                        "snapshots",
                        sources.snapshots.iter().map(|s| s.ingested_at).collect::<Vec<_>>(),
                    ),
                    (
                        "calendar",
                        sources.calendar.iter().map(|r| r.ingested_at).collect::<Vec<_>>(),
                    ),
                ],
                now,
                &config.freshness,
            );
            print_json(&report)?;
            if report.is_blocking() {
                let stale: Vec<&str> = report.errored.iter().map(|s| s.name.as_str()).collect();
                anyhow::bail!("Source freshness check failed: {}", stale.join(", "));
            }
        }
        Commands::Export { store } => {
            let store = open_store(&store)?;
            print_json(&wide_rows(&store.scan(), store.attributes()))?;
        }
    }

    Ok(())
}

/// Load the config (with defaults), every source file given, and the clock.
fn load_run(inputs: &InputArgs) -> Result<(RunConfig, SourceSet, DateTime<Utc>)> {
    let config = match inputs.config.as_deref() {
        Some(path) => RunConfig::from_json_file(Path::new(path))
            .with_context(|| format!("Failed to load config: {}", path))?,
        None => RunConfig::default(),
    };
    let sources = SourceSet {
        snapshots: read_json_array(inputs.snapshots.as_deref())?,
        statics: read_json_array(inputs.listings.as_deref())?,
        calendar: read_json_array(inputs.calendar.as_deref())?,
    };
    Ok((config, sources, inputs.now.unwrap_or_else(Utc::now)))
}

fn read_json_array<T: DeserializeOwned>(path: Option<&str>) -> Result<Vec<T>> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read file: {}", path))?;
            serde_json::from_str(&text).with_context(|| format!("Failed to parse JSON: {}", path))
        }
        None => Ok(Vec::new()),
    }
}

fn open_store(path: &str) -> Result<JsonFileStore> {
    JsonFileStore::open(path).with_context(|| format!("Failed to open store: {}", path))
}

/// `Lockbox, First aid kit` → `["Lockbox", "First aid kit"]`; blanks dropped.
fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.map(|r| {
        r.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
