//! Scripted in-memory collaborators for service tests

use crate::domain::region::Region;
use crate::domain::site::{Address, SiteDetail, SiteId};
use crate::io::geocoder::Geocoder;
use crate::io::source::{DetailOutcome, DiscoveryOutcome, RawRecord, SiteSource, SourceError};
use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};

type Step<T> = Result<T, String>;

/// Source answering from per-region and per-id scripts.
///
/// Unscripted regions are empty; unscripted ids resolve to a detail at the
/// origin. Every query is recorded in order.
#[derive(Default)]
pub struct ScriptedSource {
    regions: Mutex<HashMap<Region, VecDeque<Step<DiscoveryOutcome>>>>,
    details: Mutex<HashMap<SiteId, VecDeque<Step<DetailOutcome>>>>,
    region_log: Mutex<Vec<Region>>,
    detail_log: Mutex<Vec<SiteId>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_region(&self, region: &Region, outcome: DiscoveryOutcome) -> &Self {
        self.regions.lock().entry(region.clone()).or_default().push_back(Ok(outcome));
        self
    }

    pub fn fail_region(&self, region: &Region, message: &str) -> &Self {
        self.regions.lock().entry(region.clone()).or_default().push_back(Err(message.to_string()));
        self
    }

    pub fn on_detail(&self, id: &str, outcome: DetailOutcome) -> &Self {
        self.details.lock().entry(SiteId::from(id)).or_default().push_back(Ok(outcome));
        self
    }

    pub fn fail_detail(&self, id: &str, message: &str) -> &Self {
        self.details.lock().entry(SiteId::from(id)).or_default().push_back(Err(message.to_string()));
        self
    }

    pub fn queried_regions(&self) -> Vec<Region> {
        self.region_log.lock().clone()
    }

    pub fn queried_details(&self) -> Vec<SiteId> {
        self.detail_log.lock().clone()
    }
}

#[async_trait]
impl SiteSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn query_region(&self, region: &Region) -> Result<DiscoveryOutcome, SourceError> {
        self.region_log.lock().push(region.clone());
        let step = self.regions.lock().get_mut(region).and_then(VecDeque::pop_front);
        match step {
            Some(Ok(outcome)) => Ok(outcome),
            Some(Err(message)) => Err(SourceError::Transport(message)),
            None => Ok(DiscoveryOutcome::Empty),
        }
    }

    async fn query_detail(&self, id: &SiteId) -> Result<DetailOutcome, SourceError> {
        self.detail_log.lock().push(id.clone());
        let step = self.details.lock().get_mut(id).and_then(VecDeque::pop_front);
        match step {
            Some(Ok(outcome)) => Ok(outcome),
            Some(Err(message)) => Err(SourceError::Transport(message)),
            None => Ok(DetailOutcome::Found(detail_at(0, 0))),
        }
    }
}

pub fn record(id: &str, name: &str, kind: u32) -> RawRecord {
    RawRecord { id: SiteId::from(id), name: name.to_string(), kind }
}

pub fn listing(records: Vec<RawRecord>) -> DiscoveryOutcome {
    DiscoveryOutcome::Listing(records.into_iter().map(Ok).collect())
}

/// Detail located at (lat/1000, long/1000)
pub fn detail_at(lat_milli: i64, long_milli: i64) -> SiteDetail {
    SiteDetail {
        description: "scripted".to_string(),
        latitude: Decimal::new(lat_milli, 3),
        longitude: Decimal::new(long_milli, 3),
    }
}

/// Geocoder that echoes the query back in its answers
#[derive(Default)]
pub struct FakeGeocoder {
    pub fail: bool,
    calls: Mutex<Vec<(f64, f64, Option<u32>)>>,
}

impl FakeGeocoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self { fail: true, ..Self::default() }
    }

    /// (lat, long, radius) per call; radius is `None` for reverse geocoding
    pub fn calls(&self) -> Vec<(f64, f64, Option<u32>)> {
        self.calls.lock().clone()
    }

    pub fn radii(&self) -> Vec<u32> {
        self.calls.lock().iter().filter_map(|c| c.2).collect()
    }
}

#[async_trait]
impl Geocoder for FakeGeocoder {
    async fn reverse_geocode(&self, lat: f64, long: f64) -> anyhow::Result<Vec<Address>> {
        self.calls.lock().push((lat, long, None));
        if self.fail {
            anyhow::bail!("geocoder unavailable");
        }
        Ok(vec![Address { formatted_address: format!("{lat},{long}"), components: Vec::new() }])
    }

    async fn nearby_places(&self, lat: f64, long: f64, radius_m: u32) -> anyhow::Result<Vec<String>> {
        self.calls.lock().push((lat, long, Some(radius_m)));
        if self.fail {
            anyhow::bail!("geocoder unavailable");
        }
        Ok(vec!["Park".to_string(), "Cafe".to_string(), "Park".to_string()])
    }
}
