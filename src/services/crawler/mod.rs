//! Discovery phase: adaptive quadrant subdivision over a LIFO work stack
//!
//! Each popped region is either split for size, queried, or pushed back
//! for a retry. A listing is only trusted when it holds at most
//! `divide_threshold` entries; a fuller one is assumed truncated and its
//! four quadrants are queried instead.


use crate::domain::region::Region;
use crate::domain::site::{SiteId, SiteStub};
use crate::infra::config::Config;
use crate::infra::metrics::CrawlMetrics;
use crate::infra::pacer::{PauseReason, Pacer};
use crate::io::source::{DiscoveryOutcome, ListedEntry, SiteSource, SourceError};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Stubs discovered so far, deduplicated by id
pub type StubSet = BTreeMap<SiteId, SiteStub>;

#[derive(Debug, Clone)]
pub struct CrawlSettings {
    pub max_query_area: f64,
    pub divide_threshold: usize,
    pub min_site_kind: u32,
    /// Overflowing regions at or below this area are accepted as-is
    pub min_query_area: Option<f64>,
    pub region_pacing: Duration,
    pub rate_limit_cooldown: Duration,
}

impl CrawlSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_query_area: config.max_query_area(),
            divide_threshold: config.divide_threshold(),
            min_site_kind: config.min_site_kind(),
            min_query_area: config.min_query_area(),
            region_pacing: config.region_pacing(),
            rate_limit_cooldown: config.rate_limit_cooldown(),
        }
    }
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

pub struct CrawlDriver {
    source: Arc<dyn SiteSource>,
    pacer: Arc<dyn Pacer>,
    metrics: Arc<CrawlMetrics>,
    settings: CrawlSettings,
    pending: Vec<Region>,
}

impl CrawlDriver {
    pub fn new(
        source: Arc<dyn SiteSource>,
        pacer: Arc<dyn Pacer>,
        metrics: Arc<CrawlMetrics>,
        settings: CrawlSettings,
    ) -> Self {
        Self { source, pacer, metrics, settings, pending: Vec::new() }
    }

    /// Regions still waiting on the stack (top last)
    pub fn pending(&self) -> &[Region] {
        &self.pending
    }

    /// Walk `area` until the stack drains. Rate limits and ambiguous answers
    /// are retried indefinitely; only a transport failure ends the crawl
    /// early, with the unfinished regions left in `pending()`.
    pub async fn crawl(&mut self, area: Region) -> Result<StubSet, SourceError> {
        info!(area = %area, source = %self.source.name(), "crawl_started");
        self.pending.clear();
        self.pending.push(area);

        let mut stubs = StubSet::new();

        while let Some(region) = self.pending.pop() {
            if region.area() > self.settings.max_query_area && !region.is_indivisible() {
                debug!(region = %region, area = region.area(), "region_presplit");
                self.metrics.record_presplit();
                self.pending.extend(region.children());
                continue;
            }

            let started = Instant::now();
            let outcome = match self.source.query_region(&region).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    // Leave the failed region on the stack for inspection
                    self.pending.push(region);
                    return Err(e);
                }
            };
            self.metrics.record_region_query(started.elapsed());
            debug!(region = %region, outcome = outcome.as_str(), "region_queried");

            match outcome {
                DiscoveryOutcome::RateLimited => {
                    self.metrics.record_rate_limited();
                    warn!(region = %region, "region_rate_limited");
                    self.pending.push(region);
                    self.pause(self.settings.rate_limit_cooldown, PauseReason::Cooldown).await;
                    continue;
                }
                DiscoveryOutcome::Ambiguous => {
                    self.metrics.record_ambiguous();
                    warn!(region = %region, "region_ambiguous_retry");
                    self.pending.push(region);
                }
                DiscoveryOutcome::Empty => {
                    self.metrics.record_empty_region();
                    info!(region = %region, sites = 0, "region_listed");
                }
                DiscoveryOutcome::Overflow(count) => {
                    if self.at_floor(&region) {
                        self.metrics.record_overflow_dropped();
                        warn!(region = %region, reported = count, "region_overflow_unresolvable");
                    } else {
                        self.split_overflow(region, count);
                    }
                }
                DiscoveryOutcome::Listing(entries) => {
                    let count = entries.len();
                    if count <= self.settings.divide_threshold {
                        self.accept(&region, entries, &mut stubs);
                    } else if self.at_floor(&region) {
                        self.metrics.record_floor_accept();
                        warn!(region = %region, listed = count, "region_overflow_accepted_at_floor");
                        self.accept(&region, entries, &mut stubs);
                    } else {
                        self.split_overflow(region, count);
                    }
                }
            }

            self.pause(self.settings.region_pacing, PauseReason::Pacing).await;
        }

        self.metrics.set_stubs_discovered(stubs.len() as u64);
        info!(stubs = stubs.len(), queries = self.metrics.region_queries(), "crawl_complete");
        Ok(stubs)
    }

    fn at_floor(&self, region: &Region) -> bool {
        region.is_indivisible()
            || self.settings.min_query_area.is_some_and(|floor| region.area() <= floor)
    }

    fn split_overflow(&mut self, region: Region, count: usize) {
        info!(region = %region, listed = count, "region_overflow_subdivided");
        self.metrics.record_overflow_split();
        self.pending.extend(region.children());
    }

    fn accept(&self, region: &Region, entries: Vec<ListedEntry>, stubs: &mut StubSet) {
        let listed = entries.len();
        let mut malformed = 0u64;
        let mut filtered = 0u64;
        let mut accepted = 0usize;

        for entry in entries {
            match entry {
                Err(bad) => {
                    malformed += 1;
                    warn!(region = %region, key = %bad.key, reason = %bad.reason, "malformed_record");
                }
                Ok(record) if record.kind < self.settings.min_site_kind => {
                    filtered += 1;
                    debug!(site_id = %record.id, name = %record.name, kind = record.kind, "record_filtered");
                }
                Ok(record) => {
                    accepted += 1;
                    stubs.insert(record.id.clone(), SiteStub { id: record.id, name: record.name });
                }
            }
        }

        self.metrics.record_malformed(malformed);
        self.metrics.record_filtered(filtered);
        info!(region = %region, sites = listed, accepted = accepted, "region_listed");
    }

    async fn pause(&self, duration: Duration, reason: PauseReason) {
        self.pacer.pause(duration, reason).await;
        self.metrics.record_pause(duration);
    }
}
