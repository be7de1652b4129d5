//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/crawl.toml
//!
//! Command line flags are applied on top with the `with_*` builders, then
//! `validate()` runs before any query is issued.

use crate::domain::region::Region;
use anyhow::{bail, Context};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Live HTTP map endpoint
    Http,
    /// Previously written dataset file queried locally
    Snapshot,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Http => "http",
            SourceKind::Snapshot => "snapshot",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_source_kind")]
    pub kind: SourceKind,
    #[serde(default = "default_listing_url")]
    pub listing_url: String,
    #[serde(default = "default_detail_url")]
    pub detail_url: String,
    /// Session values sent with every request
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub session_id: String,
    /// Per-request timeout (0 to disable)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Dataset file answered by the snapshot backend
    #[serde(default = "default_snapshot_file")]
    pub snapshot_file: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: default_source_kind(),
            listing_url: default_listing_url(),
            detail_url: default_detail_url(),
            user_id: String::new(),
            session_id: String::new(),
            timeout_ms: default_timeout_ms(),
            snapshot_file: default_snapshot_file(),
        }
    }
}

fn default_source_kind() -> SourceKind {
    SourceKind::Http
}

fn default_listing_url() -> String {
    "http://127.0.0.1:8088/listing".to_string()
}

fn default_detail_url() -> String {
    "http://127.0.0.1:8088/detail".to_string()
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_snapshot_file() -> String {
    "snapshot.json".to_string()
}

/// Bounding box to crawl. Values may be given as strings to keep every digit.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AreaConfig {
    pub min_lat: Option<Decimal>,
    pub max_lat: Option<Decimal>,
    pub min_long: Option<Decimal>,
    pub max_long: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CrawlConfig {
    /// Regions larger than this (square degrees) are split before querying
    #[serde(default = "default_max_query_area")]
    pub max_query_area: f64,
    /// Listings with more entries than this are treated as truncated
    #[serde(default = "default_divide_threshold")]
    pub divide_threshold: usize,
    /// Entries with a kind marker below this are not sites of interest
    #[serde(default = "default_min_site_kind")]
    pub min_site_kind: u32,
    #[serde(default = "default_rate_limit_cooldown_secs")]
    pub rate_limit_cooldown_secs: u64,
    #[serde(default = "default_region_pacing_ms")]
    pub region_pacing_ms: u64,
    #[serde(default = "default_detail_pacing_ms")]
    pub detail_pacing_ms: u64,
    /// Overflowing regions at or below this area are accepted as-is (unset: no floor)
    #[serde(default)]
    pub min_query_area: Option<f64>,
    /// Detail-fetch sites already present in the existing dataset
    #[serde(default = "default_refresh_known")]
    pub refresh_known: bool,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_query_area: default_max_query_area(),
            divide_threshold: default_divide_threshold(),
            min_site_kind: default_min_site_kind(),
            rate_limit_cooldown_secs: default_rate_limit_cooldown_secs(),
            region_pacing_ms: default_region_pacing_ms(),
            detail_pacing_ms: default_detail_pacing_ms(),
            min_query_area: None,
            refresh_known: default_refresh_known(),
        }
    }
}

fn default_max_query_area() -> f64 {
    0.05
}

fn default_divide_threshold() -> usize {
    200
}

fn default_min_site_kind() -> u32 {
    2
}

fn default_rate_limit_cooldown_secs() -> u64 {
    300
}

fn default_region_pacing_ms() -> u64 {
    5_000
}

fn default_detail_pacing_ms() -> u64 {
    1_000
}

fn default_refresh_known() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatasetConfig {
    /// Previously written dataset; presence switches the run to incremental mode
    #[serde(default)]
    pub existing: Option<String>,
    #[serde(default = "default_output_file")]
    pub output: String,
    /// Drop existing sites that this crawl did not rediscover
    #[serde(default)]
    pub prune_missing: bool,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self { existing: None, output: default_output_file(), prune_missing: false }
    }
}

fn default_output_file() -> String {
    "sites.json".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnrichmentConfig {
    /// Google Maps API key; enrichment is skipped when absent
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_geocode_url")]
    pub geocode_url: String,
    #[serde(default = "default_places_url")]
    pub places_url: String,
    /// Distance assumed when a site has no neighbour (meters)
    #[serde(default = "default_radius_m")]
    pub default_radius_m: f64,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            geocode_url: default_geocode_url(),
            places_url: default_places_url(),
            default_radius_m: default_radius_m(),
        }
    }
}

fn default_geocode_url() -> String {
    "https://maps.googleapis.com/maps/api/geocode/json".to_string()
}

fn default_places_url() -> String {
    "https://maps.googleapis.com/maps/api/place/nearbysearch/json".to_string()
}

fn default_radius_m() -> f64 {
    30.0
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub area: AreaConfig,
    #[serde(default)]
    pub crawl: CrawlConfig,
    #[serde(default)]
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    source_kind: SourceKind,
    listing_url: String,
    detail_url: String,
    user_id: String,
    session_id: String,
    timeout_ms: u64,
    snapshot_file: String,
    min_lat: Option<Decimal>,
    max_lat: Option<Decimal>,
    min_long: Option<Decimal>,
    max_long: Option<Decimal>,
    max_query_area: f64,
    divide_threshold: usize,
    min_site_kind: u32,
    rate_limit_cooldown_secs: u64,
    region_pacing_ms: u64,
    detail_pacing_ms: u64,
    min_query_area: Option<f64>,
    refresh_known: bool,
    existing_dataset: Option<String>,
    output_file: String,
    prune_missing: bool,
    google_api_key: Option<String>,
    geocode_url: String,
    places_url: String,
    default_radius_m: f64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        Self {
            source_kind: toml_config.source.kind,
            listing_url: toml_config.source.listing_url,
            detail_url: toml_config.source.detail_url,
            user_id: toml_config.source.user_id,
            session_id: toml_config.source.session_id,
            timeout_ms: toml_config.source.timeout_ms,
            snapshot_file: toml_config.source.snapshot_file,
            min_lat: toml_config.area.min_lat,
            max_lat: toml_config.area.max_lat,
            min_long: toml_config.area.min_long,
            max_long: toml_config.area.max_long,
            max_query_area: toml_config.crawl.max_query_area,
            divide_threshold: toml_config.crawl.divide_threshold,
            min_site_kind: toml_config.crawl.min_site_kind,
            rate_limit_cooldown_secs: toml_config.crawl.rate_limit_cooldown_secs,
            region_pacing_ms: toml_config.crawl.region_pacing_ms,
            detail_pacing_ms: toml_config.crawl.detail_pacing_ms,
            min_query_area: toml_config.crawl.min_query_area,
            refresh_known: toml_config.crawl.refresh_known,
            existing_dataset: toml_config.dataset.existing,
            output_file: toml_config.dataset.output,
            prune_missing: toml_config.dataset.prune_missing,
            google_api_key: toml_config.enrichment.api_key,
            geocode_url: toml_config.enrichment.geocode_url,
            places_url: toml_config.enrichment.places_url,
            default_radius_m: toml_config.enrichment.default_radius_m,
            config_file,
        }
    }

    /// Determine config file path from the command line value or environment
    pub fn resolve_config_path(cli_path: Option<&str>) -> String {
        if let Some(path) = cli_path {
            return path.to_string();
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/crawl.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, path.display().to_string()))
    }

    /// Load configuration - tries the TOML file first, falls back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "config_fallback_to_defaults");
                Self::default()
            }
        }
    }

    /// Reject settings that would make a run loop forever or never query
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.max_query_area.is_finite() && self.max_query_area > 0.0) {
            bail!("crawl.max_query_area must be positive, got {}", self.max_query_area);
        }
        if self.divide_threshold == 0 {
            bail!("crawl.divide_threshold must be positive");
        }
        if self.rate_limit_cooldown_secs == 0 {
            bail!("crawl.rate_limit_cooldown_secs must be positive");
        }
        if self.region_pacing_ms == 0 || self.detail_pacing_ms == 0 {
            bail!("crawl.region_pacing_ms and crawl.detail_pacing_ms must be positive");
        }
        if let Some(floor) = self.min_query_area {
            if !(floor.is_finite() && floor > 0.0 && floor < self.max_query_area) {
                bail!(
                    "crawl.min_query_area must be positive and below max_query_area, got {}",
                    floor
                );
            }
        }
        if self.default_radius_m <= 0.0 {
            bail!("enrichment.default_radius_m must be positive");
        }
        match self.source_kind {
            SourceKind::Http => {
                if self.listing_url.is_empty() || self.detail_url.is_empty() {
                    bail!("source.listing_url and source.detail_url are required for http");
                }
            }
            SourceKind::Snapshot => {
                if self.snapshot_file.is_empty() {
                    bail!("source.snapshot_file is required for snapshot");
                }
            }
        }
        if self.output_file.is_empty() {
            bail!("dataset.output must not be empty");
        }
        self.area()?;
        Ok(())
    }

    /// Crawl area, if all four bounds are set
    pub fn area(&self) -> anyhow::Result<Option<Region>> {
        match (self.min_lat, self.max_lat, self.min_long, self.max_long) {
            (Some(min_lat), Some(max_lat), Some(min_long), Some(max_long)) => {
                let region = Region::new(min_lat, max_lat, min_long, max_long)
                    .context("Invalid crawl area")?;
                Ok(Some(region))
            }
            (None, None, None, None) => Ok(None),
            _ => bail!("area needs all of min_lat, max_lat, min_long and max_long"),
        }
    }

    // Builders for command line overrides
    pub fn with_area_bounds(
        mut self,
        min_lat: Option<Decimal>,
        max_lat: Option<Decimal>,
        min_long: Option<Decimal>,
        max_long: Option<Decimal>,
    ) -> Self {
        self.min_lat = min_lat.or(self.min_lat);
        self.max_lat = max_lat.or(self.max_lat);
        self.min_long = min_long.or(self.min_long);
        self.max_long = max_long.or(self.max_long);
        self
    }

    pub fn with_existing_dataset(mut self, path: Option<String>) -> Self {
        if path.is_some() {
            self.existing_dataset = path;
        }
        self
    }

    pub fn with_output_file(mut self, path: Option<String>) -> Self {
        if let Some(path) = path {
            self.output_file = path;
        }
        self
    }

    pub fn with_prune_missing(mut self, prune: bool) -> Self {
        self.prune_missing |= prune;
        self
    }

    pub fn with_divide_threshold(mut self, threshold: Option<usize>) -> Self {
        if let Some(threshold) = threshold {
            self.divide_threshold = threshold;
        }
        self
    }

    pub fn with_max_query_area(mut self, area: Option<f64>) -> Self {
        if let Some(area) = area {
            self.max_query_area = area;
        }
        self
    }

    pub fn with_credentials(mut self, user_id: Option<String>, session_id: Option<String>) -> Self {
        if let Some(user_id) = user_id {
            self.user_id = user_id;
        }
        if let Some(session_id) = session_id {
            self.session_id = session_id;
        }
        self
    }

    pub fn with_google_api_key(mut self, key: Option<String>) -> Self {
        if key.is_some() {
            self.google_api_key = key;
        }
        self
    }

    pub fn with_source_kind(mut self, kind: SourceKind) -> Self {
        self.source_kind = kind;
        self
    }

    pub fn with_snapshot_file(mut self, path: &str) -> Self {
        self.snapshot_file = path.to_string();
        self
    }

    pub fn with_pacing(mut self, region_pacing_ms: u64, detail_pacing_ms: u64) -> Self {
        self.region_pacing_ms = region_pacing_ms;
        self.detail_pacing_ms = detail_pacing_ms;
        self
    }

    // Getters for all config fields
    pub fn source_kind(&self) -> SourceKind {
        self.source_kind
    }

    pub fn listing_url(&self) -> &str {
        &self.listing_url
    }

    pub fn detail_url(&self) -> &str {
        &self.detail_url
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// `None` when the timeout is disabled
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }

    pub fn snapshot_file(&self) -> &str {
        &self.snapshot_file
    }

    pub fn max_query_area(&self) -> f64 {
        self.max_query_area
    }

    pub fn divide_threshold(&self) -> usize {
        self.divide_threshold
    }

    pub fn min_site_kind(&self) -> u32 {
        self.min_site_kind
    }

    pub fn rate_limit_cooldown(&self) -> Duration {
        Duration::from_secs(self.rate_limit_cooldown_secs)
    }

    pub fn region_pacing(&self) -> Duration {
        Duration::from_millis(self.region_pacing_ms)
    }

    pub fn detail_pacing(&self) -> Duration {
        Duration::from_millis(self.detail_pacing_ms)
    }

    pub fn min_query_area(&self) -> Option<f64> {
        self.min_query_area
    }

    pub fn refresh_known(&self) -> bool {
        self.refresh_known
    }

    pub fn existing_dataset(&self) -> Option<&str> {
        self.existing_dataset.as_deref()
    }

    /// Incremental mode is implied by an existing dataset
    pub fn incremental(&self) -> bool {
        self.existing_dataset.is_some()
    }

    pub fn output_file(&self) -> &str {
        &self.output_file
    }

    pub fn prune_missing(&self) -> bool {
        self.prune_missing
    }

    pub fn google_api_key(&self) -> Option<&str> {
        self.google_api_key.as_deref()
    }

    pub fn geocode_url(&self) -> &str {
        &self.geocode_url
    }

    pub fn places_url(&self) -> &str {
        &self.places_url
    }

    pub fn default_radius_m(&self) -> f64 {
        self.default_radius_m
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }
}
