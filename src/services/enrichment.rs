//! Optional reverse-geocoding pass over the reconciled dataset
//!
//! Each located site gets its nearest neighbour (haversine), the addresses at
//! its position, and the notable places within half the neighbour distance.
//! In incremental runs a site whose nearest neighbour has not changed keeps
//! the enrichment it already has.

use crate::domain::geo::haversine_m;
use crate::domain::site::{Dataset, SiteId};
use crate::infra::metrics::CrawlMetrics;
use crate::io::geocoder::Geocoder;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct EnrichmentPass {
    geocoder: Arc<dyn Geocoder>,
    metrics: Arc<CrawlMetrics>,
    default_radius_m: f64,
    incremental: bool,
}

/// Nearest other located site and its distance in meters
fn nearest_neighbour(
    id: &SiteId,
    position: (f64, f64),
    located: &[(SiteId, (f64, f64))],
) -> Option<(SiteId, f64)> {
    located
        .iter()
        .filter(|(other, _)| other != id)
        .map(|(other, (lat, long))| (other, haversine_m(position.0, position.1, *lat, *long)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(other, distance)| (other.clone(), distance))
}

/// Half the neighbour distance, whole meters, never zero
fn search_radius(distance_m: f64) -> u32 {
    ((distance_m.round() as u32) / 2).max(1)
}

impl EnrichmentPass {
    pub fn new(
        geocoder: Arc<dyn Geocoder>,
        metrics: Arc<CrawlMetrics>,
        default_radius_m: f64,
        incremental: bool,
    ) -> Self {
        Self { geocoder, metrics, default_radius_m, incremental }
    }

    /// Enrich in place. Lookup failures leave the site as it was.
    pub async fn run(&self, dataset: &mut Dataset) {
        let located: Vec<(SiteId, (f64, f64))> = dataset
            .values()
            .filter_map(|site| site.position().map(|p| (site.id.clone(), p)))
            .collect();
        info!(sites = dataset.len(), located = located.len(), "enrichment_started");

        let mut refreshed = 0usize;
        let mut unchanged = 0usize;

        for (id, position) in &located {
            let Some(site) = dataset.get_mut(id) else {
                continue;
            };

            let (nearest, distance) = match nearest_neighbour(id, *position, &located) {
                Some((other, distance)) => (Some(other), distance),
                None => (None, self.default_radius_m),
            };

            if self.incremental
                && site.enrichment.nearest_site.is_some()
                && site.enrichment.nearest_site == nearest
            {
                debug!(site_id = %id, "enrichment_unchanged");
                unchanged += 1;
                continue;
            }

            let (lat, long) = *position;
            let radius_m = search_radius(distance);
            let addresses = self.geocoder.reverse_geocode(lat, long).await;
            let places = match addresses {
                Ok(_) => self.geocoder.nearby_places(lat, long, radius_m).await,
                Err(_) => Ok(Vec::new()),
            };

            match (addresses, places) {
                (Ok(addresses), Ok(places)) => {
                    site.enrichment.address_components = Some(addresses);
                    site.enrichment.places = Some(places.into_iter().collect::<BTreeSet<_>>());
                    site.enrichment.nearest_site = nearest;
                    self.metrics.record_enriched();
                    refreshed += 1;
                    debug!(site_id = %id, radius_m = radius_m, "site_enriched");
                }
                (Err(e), _) | (_, Err(e)) => {
                    self.metrics.record_enrichment_error();
                    warn!(site_id = %id, error = %format!("{e:#}"), "enrichment_failed");
                }
            }
        }

        info!(refreshed = refreshed, unchanged = unchanged, "enrichment_complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::site::{dataset_from, Site, SiteStub};
    use crate::services::fakes::{detail_at, FakeGeocoder};

    fn site(id: &str, lat_milli: i64, long_milli: i64) -> Site {
        Site::located(
            SiteStub { id: SiteId::from(id), name: id.to_string() },
            detail_at(lat_milli, long_milli),
        )
    }

    fn pass(geocoder: Arc<FakeGeocoder>, incremental: bool) -> EnrichmentPass {
        EnrichmentPass::new(geocoder, Arc::new(CrawlMetrics::new()), 30.0, incremental)
    }

    #[test]
    fn test_search_radius() {
        assert_eq!(search_radius(30.0), 15);
        assert_eq!(search_radius(111.4), 55);
        assert_eq!(search_radius(0.4), 1);
    }

    #[test]
    fn test_nearest_neighbour_skips_self() {
        let located = vec![
            (SiteId::from("a"), (0.0, 0.0)),
            (SiteId::from("b"), (0.0, 0.001)),
            (SiteId::from("c"), (0.0, 0.01)),
        ];
        let (nearest, distance) = nearest_neighbour(&SiteId::from("a"), (0.0, 0.0), &located).unwrap();
        assert_eq!(nearest, SiteId::from("b"));
        assert!((distance - 111.19).abs() < 0.1);

        assert!(nearest_neighbour(&SiteId::from("a"), (0.0, 0.0), &located[..1]).is_none());
    }

    #[tokio::test]
    async fn test_enriches_with_nearest_and_half_distance_radius() {
        let geocoder = Arc::new(FakeGeocoder::new());
        let mut dataset = dataset_from(vec![site("a", 0, 0), site("b", 0, 1)]);

        pass(geocoder.clone(), false).run(&mut dataset).await;

        let a = &dataset[&SiteId::from("a")];
        assert_eq!(a.enrichment.nearest_site, Some(SiteId::from("b")));
        assert_eq!(a.enrichment.address_components.as_ref().unwrap().len(), 1);
        let places: Vec<_> = a.enrichment.places.as_ref().unwrap().iter().cloned().collect();
        assert_eq!(places, vec!["Cafe", "Park"]);
        // 0.001 degrees of longitude at the equator is ~111 m
        assert_eq!(geocoder.radii(), vec![55, 55]);
    }

    #[tokio::test]
    async fn test_lone_site_uses_default_radius() {
        let geocoder = Arc::new(FakeGeocoder::new());
        let mut dataset = dataset_from(vec![site("solo", 10_000, 10_000)]);

        pass(geocoder.clone(), false).run(&mut dataset).await;

        assert_eq!(geocoder.radii(), vec![15]);
        assert_eq!(dataset[&SiteId::from("solo")].enrichment.nearest_site, None);
    }

    #[tokio::test]
    async fn test_incremental_skips_unchanged_neighbour() {
        let geocoder = Arc::new(FakeGeocoder::new());
        let mut dataset = dataset_from(vec![site("a", 0, 0), site("b", 0, 1), site("c", 0, 5)]);
        dataset.get_mut(&SiteId::from("a")).unwrap().enrichment.nearest_site = Some(SiteId::from("b"));
        dataset.get_mut(&SiteId::from("c")).unwrap().enrichment.nearest_site = Some(SiteId::from("a"));

        pass(geocoder.clone(), true).run(&mut dataset).await;

        // a keeps its neighbour; b was never enriched; c's nearest is now b
        let reverse_calls: Vec<_> = geocoder.calls().into_iter().filter(|c| c.2.is_none()).collect();
        assert_eq!(reverse_calls.len(), 2);
        assert!(dataset[&SiteId::from("a")].enrichment.places.is_none());
        assert_eq!(dataset[&SiteId::from("c")].enrichment.nearest_site, Some(SiteId::from("b")));
    }

    #[tokio::test]
    async fn test_failures_leave_site_unenriched() {
        let geocoder = Arc::new(FakeGeocoder::failing());
        let metrics = Arc::new(CrawlMetrics::new());
        let mut dataset = dataset_from(vec![site("a", 0, 0), site("b", 0, 1)]);
        let before = dataset.clone();

        EnrichmentPass::new(geocoder, metrics.clone(), 30.0, false).run(&mut dataset).await;

        assert_eq!(dataset, before);
        assert_eq!(metrics.summary().enrichment_errors, 2);
    }

    #[tokio::test]
    async fn test_unlocated_sites_are_skipped() {
        let geocoder = Arc::new(FakeGeocoder::new());
        let mut unlocated = site("x", 0, 0);
        unlocated.latitude = None;
        let mut dataset = dataset_from(vec![unlocated]);

        pass(geocoder.clone(), false).run(&mut dataset).await;
        assert!(geocoder.calls().is_empty());
    }
}
