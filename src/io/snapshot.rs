//! Snapshot backend: answers queries from a previously written dataset file
//!
//! Listing is an inclusive bounds filter on the stored coordinates. Records
//! in a dataset were vetted when they were first crawled, so every match is
//! reported with `VETTED_KIND`.

use crate::domain::region::Region;
use crate::domain::site::{Dataset, SiteDetail, SiteId};
use crate::io::dataset::load_dataset;
use crate::io::source::{
    DetailOutcome, DiscoveryOutcome, ListedEntry, RawRecord, SiteSource, SourceError, VETTED_KIND,
};
use async_trait::async_trait;
use std::path::Path;

pub struct SnapshotSource {
    sites: Dataset,
}

impl SnapshotSource {
    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        Ok(Self::from_dataset(load_dataset(path)?))
    }

    pub fn from_dataset(sites: Dataset) -> Self {
        Self { sites }
    }
}

#[async_trait]
impl SiteSource for SnapshotSource {
    fn name(&self) -> &str {
        "snapshot"
    }

    async fn query_region(&self, region: &Region) -> Result<DiscoveryOutcome, SourceError> {
        let entries: Vec<ListedEntry> = self
            .sites
            .values()
            .filter(|site| match (site.latitude, site.longitude) {
                (Some(lat), Some(long)) => region.contains(lat, long),
                _ => false,
            })
            .map(|site| {
                Ok(RawRecord {
                    id: site.id.clone(),
                    name: site.display_name.clone(),
                    kind: VETTED_KIND,
                })
            })
            .collect();

        if entries.is_empty() {
            Ok(DiscoveryOutcome::Empty)
        } else {
            Ok(DiscoveryOutcome::Listing(entries))
        }
    }

    async fn query_detail(&self, id: &SiteId) -> Result<DetailOutcome, SourceError> {
        let Some(site) = self.sites.get(id) else {
            return Ok(DetailOutcome::Missing);
        };
        match (site.latitude, site.longitude) {
            (Some(latitude), Some(longitude)) => Ok(DetailOutcome::Found(SiteDetail {
                description: site.description.clone().unwrap_or_default(),
                latitude,
                longitude,
            })),
            _ => Ok(DetailOutcome::Missing),
        }
    }
}
