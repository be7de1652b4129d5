//! sitecrawl - adaptive area crawler for map site listings
//!
//! Discovers every site inside a bounding box by querying a rate-limited map
//! source, splitting the box into quadrants wherever a listing would be
//! truncated, then resolves each site's details and merges the result into
//! the persisted dataset.
//!
//! Module structure:
//! - `domain/` - Core types (Region, Site, geodesy)
//! - `io/` - External interfaces (map sources, dataset file, geocoder)
//! - `services/` - Crawl stages (discovery, details, merge, enrichment)
//! - `infra/` - Infrastructure (Config, Metrics, Pacer)

use clap::Parser;
use rust_decimal::Decimal;
use sitecrawl::infra::{Config, CrawlMetrics, SourceKind, TokioPacer};
use sitecrawl::io::{build_source, Geocoder, GoogleGeocoder};
use sitecrawl::services::{Pipeline, RunPlan};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// sitecrawl - adaptive area crawler for map site listings
#[derive(Parser, Debug)]
#[command(name = "sitecrawl", version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_HASH"), ")"), about)]
struct Args {
    /// Path to TOML configuration file (falls back to CONFIG_FILE, then config/crawl.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Southern edge of the crawl area
    #[arg(long, allow_hyphen_values = true)]
    min_lat: Option<Decimal>,

    /// Northern edge of the crawl area
    #[arg(long, allow_hyphen_values = true)]
    max_lat: Option<Decimal>,

    /// Western edge of the crawl area
    #[arg(long, allow_hyphen_values = true)]
    min_long: Option<Decimal>,

    /// Eastern edge of the crawl area
    #[arg(long, allow_hyphen_values = true)]
    max_long: Option<Decimal>,

    /// Existing dataset to merge into (enables incremental mode)
    #[arg(short, long)]
    existing: Option<String>,

    /// Output dataset file
    #[arg(short, long)]
    output: Option<String>,

    /// Drop existing sites that this crawl did not rediscover
    #[arg(long)]
    prune_missing: bool,

    /// Listings with more entries than this are split into quadrants
    #[arg(long)]
    divide_threshold: Option<usize>,

    /// Regions larger than this (square degrees) are split before querying
    #[arg(long)]
    max_query_area: Option<f64>,

    /// Session user id sent to the map source
    #[arg(long)]
    user_id: Option<String>,

    /// Session id sent to the map source
    #[arg(long)]
    session_id: Option<String>,

    /// Google Maps API key; enables the enrichment pass
    #[arg(long)]
    google_api_key: Option<String>,

    /// Query a stored dataset file instead of the live source
    #[arg(long)]
    snapshot: Option<String>,

    /// Skip crawling; only enrich the existing dataset
    #[arg(long)]
    enrich_only: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

fn init_logging(json: bool) {
    // Default: INFO, use RUST_LOG=debug for per-query visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_timer(UtcTime::rfc_3339())
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_timer(UtcTime::rfc_3339())
            .with_target(false)
            .init();
    }
}

fn load_config(args: &Args) -> Config {
    let path = Config::resolve_config_path(args.config.as_deref());
    let mut config = Config::load_from_path(&path)
        .with_area_bounds(args.min_lat, args.max_lat, args.min_long, args.max_long)
        .with_existing_dataset(args.existing.clone())
        .with_output_file(args.output.clone())
        .with_prune_missing(args.prune_missing)
        .with_divide_threshold(args.divide_threshold)
        .with_max_query_area(args.max_query_area)
        .with_credentials(args.user_id.clone(), args.session_id.clone())
        .with_google_api_key(args.google_api_key.clone());

    if let Some(snapshot) = &args.snapshot {
        config = config.with_source_kind(SourceKind::Snapshot).with_snapshot_file(snapshot);
    }
    config
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = load_config(&args);
    config.validate()?;

    info!(
        config_file = %config.config_file(),
        source = %config.source_kind().as_str(),
        area = ?config.area()?.map(|r| r.to_string()),
        existing = ?config.existing_dataset(),
        incremental = %config.incremental(),
        output = %config.output_file(),
        prune_missing = %config.prune_missing(),
        refresh_known = %config.refresh_known(),
        max_query_area = %config.max_query_area(),
        divide_threshold = %config.divide_threshold(),
        enrichment = %config.google_api_key().is_some(),
        "config_loaded"
    );

    let source = build_source(&config)?;
    let geocoder: Option<Arc<dyn Geocoder>> = match GoogleGeocoder::from_config(&config)? {
        Some(geocoder) => Some(Arc::new(geocoder)),
        None => None,
    };
    let metrics = Arc::new(CrawlMetrics::new());

    let plan = RunPlan::from_config(&config, args.enrich_only)?;
    let pipeline = Pipeline::new(&config, source, Arc::new(TokioPacer), metrics).with_geocoder(geocoder);

    let report = pipeline.run(&plan).await?;
    info!(
        stubs = report.stubs,
        fetched = report.fetched,
        carried = report.carried,
        written = report.written,
        output = %plan.output.display(),
        "run_complete"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.json_logs);

    info!(version = env!("CARGO_PKG_VERSION"), git = env!("GIT_HASH"), "sitecrawl starting");

    if let Err(e) = run(args).await {
        error!(error = %format!("{e:#}"), "run_failed");
        return Err(e);
    }
    Ok(())
}
