//! Site source abstraction
//!
//! A `SiteSource` answers two kinds of queries: a listing of the sites inside
//! a region, and the detail record of one site. Backends only classify what
//! the upstream said; retry, cooldown and subdivision policy live in the
//! crawl services.

use crate::domain::region::Region;
use crate::domain::site::{SiteDetail, SiteId};
use crate::infra::config::{Config, SourceKind};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Kind marker for records a backend has already vetted as sites of interest
pub const VETTED_KIND: u32 = u32::MAX;

/// Transport-level failures. These are fatal to a run: the upstream did not
/// answer at all, as opposed to answering "not now".
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected status {status} from {endpoint}")]
    Status { status: u16, endpoint: String },
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        SourceError::Transport(err.to_string())
    }
}

/// One listing entry that decoded cleanly
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub id: SiteId,
    pub name: String,
    /// Source-defined type marker; the crawler filters on it
    pub kind: u32,
}

/// Listing entry that could not be decoded into a `RawRecord`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedRecord {
    pub key: String,
    pub reason: String,
}

impl fmt::Display for MalformedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entry '{}': {}", self.key, self.reason)
    }
}

pub type ListedEntry = Result<RawRecord, MalformedRecord>;

/// Classified answer to a listing query
#[derive(Debug, Clone, PartialEq)]
pub enum DiscoveryOutcome {
    /// Upstream asked us to back off
    RateLimited,
    /// Response was neither a payload nor a definite empty answer
    Ambiguous,
    /// Nothing in this region
    Empty,
    /// Upstream reported truncation with this many matches
    Overflow(usize),
    /// Every entry of the response, decoded or not
    Listing(Vec<ListedEntry>),
}

impl DiscoveryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscoveryOutcome::RateLimited => "rate_limited",
            DiscoveryOutcome::Ambiguous => "ambiguous",
            DiscoveryOutcome::Empty => "empty",
            DiscoveryOutcome::Overflow(_) => "overflow",
            DiscoveryOutcome::Listing(_) => "listing",
        }
    }
}

/// Classified answer to a detail query
#[derive(Debug, Clone, PartialEq)]
pub enum DetailOutcome {
    RateLimited,
    Ambiguous,
    /// Upstream has no detail record for this id
    Missing,
    Found(SiteDetail),
}

impl DetailOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetailOutcome::RateLimited => "rate_limited",
            DetailOutcome::Ambiguous => "ambiguous",
            DetailOutcome::Missing => "missing",
            DetailOutcome::Found(_) => "found",
        }
    }
}

/// Upstream capable of listing sites in a region and resolving site details.
///
/// Calls block the crawl until they return; a backend that wants bounded
/// latency must enforce its own timeout.
#[async_trait]
pub trait SiteSource: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &str;

    async fn query_region(&self, region: &Region) -> Result<DiscoveryOutcome, SourceError>;

    async fn query_detail(&self, id: &SiteId) -> Result<DetailOutcome, SourceError>;
}

/// Build the backend selected by `source.kind`
pub fn build_source(config: &Config) -> anyhow::Result<Arc<dyn SiteSource>> {
    let source: Arc<dyn SiteSource> = match config.source_kind() {
        SourceKind::Http => Arc::new(crate::io::http_source::HttpMapSource::new(config)?),
        SourceKind::Snapshot => {
            Arc::new(crate::io::snapshot::SnapshotSource::open(config.snapshot_file())?)
        }
    };
    Ok(source)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_labels() {
        assert_eq!(DiscoveryOutcome::Overflow(3).as_str(), "overflow");
        assert_eq!(DiscoveryOutcome::Listing(Vec::new()).as_str(), "listing");
        assert_eq!(DiscoveryOutcome::RateLimited.as_str(), "rate_limited");
        assert_eq!(DetailOutcome::Missing.as_str(), "missing");
        assert_eq!(DetailOutcome::Ambiguous.as_str(), "ambiguous");
    }

    #[test]
    fn test_build_source_snapshot_requires_readable_file() {
        let config = Config::default()
            .with_source_kind(SourceKind::Snapshot)
            .with_snapshot_file("/nonexistent/snapshot.json");
        assert!(build_source(&config).is_err());
    }
}
