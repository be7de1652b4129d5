//! Detail phase: resolve each discovered stub into a located site

use crate::domain::site::{Dataset, Site, SiteStub};
use crate::infra::config::Config;
use crate::infra::metrics::CrawlMetrics;
use crate::infra::pacer::{PauseReason, Pacer};
use crate::io::source::{DetailOutcome, SiteSource, SourceError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct DetailSettings {
    pub detail_pacing: Duration,
    pub rate_limit_cooldown: Duration,
}

impl DetailSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            detail_pacing: config.detail_pacing(),
            rate_limit_cooldown: config.rate_limit_cooldown(),
        }
    }
}

pub struct DetailStage {
    source: Arc<dyn SiteSource>,
    pacer: Arc<dyn Pacer>,
    metrics: Arc<CrawlMetrics>,
    settings: DetailSettings,
}

impl DetailStage {
    pub fn new(
        source: Arc<dyn SiteSource>,
        pacer: Arc<dyn Pacer>,
        metrics: Arc<CrawlMetrics>,
        settings: DetailSettings,
    ) -> Self {
        Self { source, pacer, metrics, settings }
    }

    /// Query every stub in ascending id order. Only stubs whose detail was
    /// found make it into the result.
    pub async fn fetch<I>(&self, stubs: I) -> Result<Dataset, SourceError>
    where
        I: IntoIterator<Item = SiteStub>,
    {
        let mut pending: Vec<SiteStub> = stubs.into_iter().collect();
        // Stack pops from the end, so sort descending to visit ids ascending
        pending.sort_by(|a, b| b.id.cmp(&a.id));
        info!(stubs = pending.len(), "detail_fetch_started");

        let mut sites = Dataset::new();

        while let Some(stub) = pending.pop() {
            let started = Instant::now();
            let outcome = self.source.query_detail(&stub.id).await?;
            self.metrics.record_detail_query(started.elapsed());
            debug!(site_id = %stub.id, outcome = outcome.as_str(), "detail_queried");

            match outcome {
                DetailOutcome::RateLimited => {
                    self.metrics.record_rate_limited();
                    warn!(site_id = %stub.id, "detail_rate_limited");
                    pending.push(stub);
                    self.pause(self.settings.rate_limit_cooldown, PauseReason::Cooldown).await;
                    continue;
                }
                DetailOutcome::Ambiguous => {
                    self.metrics.record_ambiguous();
                    warn!(site_id = %stub.id, "detail_ambiguous_retry");
                    pending.push(stub);
                }
                DetailOutcome::Missing => {
                    self.metrics.record_detail_missing();
                    warn!(site_id = %stub.id, name = %stub.name, "detail_missing");
                }
                DetailOutcome::Found(detail) => {
                    self.metrics.record_detail_found();
                    info!(site_id = %stub.id, name = %stub.name, "site_located");
                    let site = Site::located(stub, detail);
                    sites.insert(site.id.clone(), site);
                }
            }

            self.pause(self.settings.detail_pacing, PauseReason::Pacing).await;
        }

        info!(sites = sites.len(), queries = self.metrics.detail_queries(), "detail_fetch_complete");
        Ok(sites)
    }

    async fn pause(&self, duration: Duration, reason: PauseReason) {
        self.pacer.pause(duration, reason).await;
        self.metrics.record_pause(duration);
    }
}
