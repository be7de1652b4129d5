//! One complete run: discovery, details, merge, enrichment, write
//!
//! The output file is only written once every stage succeeded, so a failed
//! run never leaves a partial dataset behind.

use crate::domain::region::Region;
use crate::domain::site::{Dataset, Enrichment};
use crate::infra::config::Config;
use crate::infra::metrics::CrawlMetrics;
use crate::infra::pacer::Pacer;
use crate::io::dataset::{load_dataset, write_dataset};
use crate::io::geocoder::Geocoder;
use crate::io::source::SiteSource;
use crate::services::crawler::{CrawlDriver, CrawlSettings};
use crate::services::details::{DetailSettings, DetailStage};
use crate::services::enrichment::EnrichmentPass;
use crate::services::reconcile::{reconcile, MergePolicy, ReconcileReport};
use anyhow::{bail, Context};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// What a single run should do
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub area: Option<Region>,
    pub existing: Option<PathBuf>,
    pub output: PathBuf,
    pub prune_missing: bool,
    pub refresh_known: bool,
    /// Skip crawling and only enrich the existing dataset
    pub enrich_only: bool,
}

impl RunPlan {
    pub fn from_config(config: &Config, enrich_only: bool) -> anyhow::Result<Self> {
        Ok(Self {
            area: config.area()?,
            existing: config.existing_dataset().map(PathBuf::from),
            output: PathBuf::from(config.output_file()),
            prune_missing: config.prune_missing(),
            refresh_known: config.refresh_known(),
            enrich_only,
        })
    }

    pub fn policy(&self) -> MergePolicy {
        MergePolicy::new(self.existing.is_some(), self.prune_missing)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub stubs: usize,
    pub fetched: usize,
    pub carried: usize,
    pub reconcile: Option<ReconcileReport>,
    pub written: usize,
}

pub struct Pipeline {
    source: Arc<dyn SiteSource>,
    pacer: Arc<dyn Pacer>,
    metrics: Arc<CrawlMetrics>,
    geocoder: Option<Arc<dyn Geocoder>>,
    crawl_settings: CrawlSettings,
    detail_settings: DetailSettings,
    default_radius_m: f64,
}

impl Pipeline {
    pub fn new(
        config: &Config,
        source: Arc<dyn SiteSource>,
        pacer: Arc<dyn Pacer>,
        metrics: Arc<CrawlMetrics>,
    ) -> Self {
        Self {
            source,
            pacer,
            metrics,
            geocoder: None,
            crawl_settings: CrawlSettings::from_config(config),
            detail_settings: DetailSettings::from_config(config),
            default_radius_m: config.default_radius_m(),
        }
    }

    pub fn with_geocoder(mut self, geocoder: Option<Arc<dyn Geocoder>>) -> Self {
        self.geocoder = geocoder;
        self
    }

    pub async fn run(&self, plan: &RunPlan) -> anyhow::Result<RunReport> {
        let existing = match &plan.existing {
            Some(path) => load_dataset(path)?,
            None => Dataset::new(),
        };

        if plan.enrich_only {
            return self.enrich_only(plan, existing).await;
        }

        let Some(area) = plan.area.clone() else {
            bail!("no crawl area configured (set [area] or pass the bounding box flags)");
        };
        let policy = plan.policy();
        if policy.prunes() {
            warn!(
                area = %area,
                "prune_enabled: existing sites outside this area will be dropped"
            );
        }

        let mut driver = CrawlDriver::new(
            self.source.clone(),
            self.pacer.clone(),
            self.metrics.clone(),
            self.crawl_settings.clone(),
        );
        let stubs = driver.crawl(area).await.context("Discovery failed")?;
        self.metrics.summary().log("discovery");

        let stub_count = stubs.len();
        let (to_fetch, known): (Vec<_>, Vec<_>) = stubs
            .into_values()
            .partition(|stub| plan.refresh_known || !existing.contains_key(&stub.id));
        if !known.is_empty() {
            self.metrics.record_known_skipped(known.len() as u64);
            info!(known = known.len(), "known_sites_skipped");
        }

        let stage = DetailStage::new(
            self.source.clone(),
            self.pacer.clone(),
            self.metrics.clone(),
            self.detail_settings.clone(),
        );
        let mut fresh = stage.fetch(to_fetch).await.context("Detail fetch failed")?;
        let fetched = fresh.len();
        self.metrics.summary().log("details");

        // Known sites count as rediscovered so pruning keeps them
        let carried = known.len();
        for stub in known {
            if let Some(site) = existing.get(&stub.id) {
                fresh.insert(stub.id, site.clone());
            }
        }

        // Refetched records keep enrichment computed by an earlier run
        for (id, site) in fresh.iter_mut() {
            if let Some(previous) = existing.get(id) {
                if site.enrichment == Enrichment::default() {
                    site.enrichment = previous.enrichment.clone();
                }
            }
        }

        let (mut output, report) = reconcile(existing, fresh, policy);
        report.log(policy);

        self.enrich(&mut output, policy.is_incremental()).await;

        write_dataset(&plan.output, &output)?;
        self.metrics.summary().log("run");

        Ok(RunReport {
            stubs: stub_count,
            fetched,
            carried,
            reconcile: Some(report),
            written: output.len(),
        })
    }

    async fn enrich_only(&self, plan: &RunPlan, mut dataset: Dataset) -> anyhow::Result<RunReport> {
        if plan.existing.is_none() {
            bail!("enrich-only mode needs an existing dataset");
        }
        if self.geocoder.is_none() {
            bail!("enrich-only mode needs a geocoding API key");
        }

        self.enrich(&mut dataset, true).await;
        write_dataset(&plan.output, &dataset)?;
        self.metrics.summary().log("enrichment");

        Ok(RunReport { written: dataset.len(), ..Default::default() })
    }

    async fn enrich(&self, dataset: &mut Dataset, incremental: bool) {
        let Some(geocoder) = &self.geocoder else {
            return;
        };
        EnrichmentPass::new(geocoder.clone(), self.metrics.clone(), self.default_radius_m, incremental)
            .run(dataset)
            .await;
    }
}
