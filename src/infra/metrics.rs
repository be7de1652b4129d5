//! Lock-free crawl counters and the end-of-stage summary
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are statistical
//! counters only. Do NOT use them for coordination or logic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::info;

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

pub struct CrawlMetrics {
    started_at: Instant,
    /// Listing queries issued
    region_queries: AtomicU64,
    /// Regions split for size before any query
    presplits: AtomicU64,
    /// Regions split because the listing overflowed
    overflow_splits: AtomicU64,
    /// Overflowing listings accepted at the depth floor
    floor_accepts: AtomicU64,
    /// Reported overflows at the depth floor, dropped with no entries to keep
    overflow_dropped: AtomicU64,
    rate_limited: AtomicU64,
    ambiguous: AtomicU64,
    empty_regions: AtomicU64,
    malformed_records: AtomicU64,
    filtered_records: AtomicU64,
    /// Unique stubs after dedup
    stubs_discovered: AtomicU64,
    detail_queries: AtomicU64,
    details_found: AtomicU64,
    details_missing: AtomicU64,
    /// Stubs not detail-fetched because the site was already known
    known_skipped: AtomicU64,
    sites_enriched: AtomicU64,
    enrichment_errors: AtomicU64,
    /// Query round-trip, microseconds
    query_latency_sum_us: AtomicU64,
    query_latency_max_us: AtomicU64,
    /// Time spent in pacing and cooldown pauses
    paused_ms: AtomicU64,
}

impl Default for CrawlMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl CrawlMetrics {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            region_queries: AtomicU64::new(0),
            presplits: AtomicU64::new(0),
            overflow_splits: AtomicU64::new(0),
            floor_accepts: AtomicU64::new(0),
            overflow_dropped: AtomicU64::new(0),
            rate_limited: AtomicU64::new(0),
            ambiguous: AtomicU64::new(0),
            empty_regions: AtomicU64::new(0),
            malformed_records: AtomicU64::new(0),
            filtered_records: AtomicU64::new(0),
            stubs_discovered: AtomicU64::new(0),
            detail_queries: AtomicU64::new(0),
            details_found: AtomicU64::new(0),
            details_missing: AtomicU64::new(0),
            known_skipped: AtomicU64::new(0),
            sites_enriched: AtomicU64::new(0),
            enrichment_errors: AtomicU64::new(0),
            query_latency_sum_us: AtomicU64::new(0),
            query_latency_max_us: AtomicU64::new(0),
            paused_ms: AtomicU64::new(0),
        }
    }

    #[inline]
    fn record_latency(&self, latency: Duration) {
        let latency_us = latency.as_micros() as u64;
        self.query_latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        update_atomic_max(&self.query_latency_max_us, latency_us);
    }

    pub fn record_region_query(&self, latency: Duration) {
        self.region_queries.fetch_add(1, Ordering::Relaxed);
        self.record_latency(latency);
    }

    pub fn record_detail_query(&self, latency: Duration) {
        self.detail_queries.fetch_add(1, Ordering::Relaxed);
        self.record_latency(latency);
    }

    pub fn record_presplit(&self) {
        self.presplits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_overflow_split(&self) {
        self.overflow_splits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_floor_accept(&self) {
        self.floor_accepts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_overflow_dropped(&self) {
        self.overflow_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ambiguous(&self) {
        self.ambiguous.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_empty_region(&self) {
        self.empty_regions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self, count: u64) {
        self.malformed_records.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_filtered(&self, count: u64) {
        self.filtered_records.fetch_add(count, Ordering::Relaxed);
    }

    pub fn set_stubs_discovered(&self, count: u64) {
        self.stubs_discovered.store(count, Ordering::Relaxed);
    }

    pub fn record_detail_found(&self) {
        self.details_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_detail_missing(&self) {
        self.details_missing.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_known_skipped(&self, count: u64) {
        self.known_skipped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_enriched(&self) {
        self.sites_enriched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_enrichment_error(&self) {
        self.enrichment_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pause(&self, duration: Duration) {
        self.paused_ms.fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn region_queries(&self) -> u64 {
        self.region_queries.load(Ordering::Relaxed)
    }

    pub fn detail_queries(&self) -> u64 {
        self.detail_queries.load(Ordering::Relaxed)
    }

    pub fn rate_limited(&self) -> u64 {
        self.rate_limited.load(Ordering::Relaxed)
    }

    /// Snapshot all counters without resetting them
    pub fn summary(&self) -> CrawlSummary {
        let region_queries = self.region_queries.load(Ordering::Relaxed);
        let detail_queries = self.detail_queries.load(Ordering::Relaxed);
        let total_queries = region_queries + detail_queries;
        let avg_query_latency_us = if total_queries > 0 {
            self.query_latency_sum_us.load(Ordering::Relaxed) / total_queries
        } else {
            0
        };

        CrawlSummary {
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
            region_queries,
            presplits: self.presplits.load(Ordering::Relaxed),
            overflow_splits: self.overflow_splits.load(Ordering::Relaxed),
            floor_accepts: self.floor_accepts.load(Ordering::Relaxed),
            overflow_dropped: self.overflow_dropped.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            ambiguous: self.ambiguous.load(Ordering::Relaxed),
            empty_regions: self.empty_regions.load(Ordering::Relaxed),
            malformed_records: self.malformed_records.load(Ordering::Relaxed),
            filtered_records: self.filtered_records.load(Ordering::Relaxed),
            stubs_discovered: self.stubs_discovered.load(Ordering::Relaxed),
            detail_queries,
            details_found: self.details_found.load(Ordering::Relaxed),
            details_missing: self.details_missing.load(Ordering::Relaxed),
            known_skipped: self.known_skipped.load(Ordering::Relaxed),
            sites_enriched: self.sites_enriched.load(Ordering::Relaxed),
            enrichment_errors: self.enrichment_errors.load(Ordering::Relaxed),
            avg_query_latency_us,
            max_query_latency_us: self.query_latency_max_us.load(Ordering::Relaxed),
            paused_secs: self.paused_ms.load(Ordering::Relaxed) / 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CrawlSummary {
    pub elapsed_secs: f64,
    pub region_queries: u64,
    pub presplits: u64,
    pub overflow_splits: u64,
    pub floor_accepts: u64,
    pub overflow_dropped: u64,
    pub rate_limited: u64,
    pub ambiguous: u64,
    pub empty_regions: u64,
    pub malformed_records: u64,
    pub filtered_records: u64,
    pub stubs_discovered: u64,
    pub detail_queries: u64,
    pub details_found: u64,
    pub details_missing: u64,
    pub known_skipped: u64,
    pub sites_enriched: u64,
    pub enrichment_errors: u64,
    pub avg_query_latency_us: u64,
    pub max_query_latency_us: u64,
    pub paused_secs: u64,
}

impl CrawlSummary {
    pub fn log(&self, stage: &str) {
        info!(
            stage = stage,
            elapsed_secs = format!("{:.1}", self.elapsed_secs),
            region_queries = %self.region_queries,
            presplits = %self.presplits,
            overflow_splits = %self.overflow_splits,
            floor_accepts = %self.floor_accepts,
            overflow_dropped = %self.overflow_dropped,
            rate_limited = %self.rate_limited,
            ambiguous = %self.ambiguous,
            empty_regions = %self.empty_regions,
            malformed = %self.malformed_records,
            filtered = %self.filtered_records,
            stubs = %self.stubs_discovered,
            detail_queries = %self.detail_queries,
            found = %self.details_found,
            missing = %self.details_missing,
            known_skipped = %self.known_skipped,
            enriched = %self.sites_enriched,
            enrichment_errors = %self.enrichment_errors,
            avg_query_us = %self.avg_query_latency_us,
            max_query_us = %self.max_query_latency_us,
            paused_secs = %self.paused_secs,
            "crawl_metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = CrawlMetrics::new();
        let summary = metrics.summary();
        assert_eq!(summary.region_queries, 0);
        assert_eq!(summary.avg_query_latency_us, 0);
    }

    #[test]
    fn test_query_latency() {
        let metrics = CrawlMetrics::new();
        metrics.record_region_query(Duration::from_micros(100));
        metrics.record_region_query(Duration::from_micros(300));
        metrics.record_detail_query(Duration::from_micros(200));

        let summary = metrics.summary();
        assert_eq!(summary.region_queries, 2);
        assert_eq!(summary.detail_queries, 1);
        assert_eq!(summary.avg_query_latency_us, 200);
        assert_eq!(summary.max_query_latency_us, 300);
    }

    #[test]
    fn test_counters_accumulate() {
        let metrics = CrawlMetrics::new();
        metrics.record_malformed(2);
        metrics.record_malformed(1);
        metrics.record_filtered(4);
        metrics.record_rate_limited();
        metrics.record_floor_accept();
        metrics.record_overflow_dropped();
        metrics.record_overflow_dropped();
        metrics.set_stubs_discovered(7);
        metrics.set_stubs_discovered(9);
        metrics.record_pause(Duration::from_secs(300));
        metrics.record_pause(Duration::from_millis(1500));

        let summary = metrics.summary();
        assert_eq!(summary.malformed_records, 3);
        assert_eq!(summary.filtered_records, 4);
        assert_eq!(summary.rate_limited, 1);
        assert_eq!(summary.floor_accepts, 1);
        assert_eq!(summary.overflow_dropped, 2);
        assert_eq!(summary.stubs_discovered, 9);
        assert_eq!(summary.paused_secs, 301);
    }

    #[test]
    fn test_update_atomic_max() {
        let max = AtomicU64::new(5);
        update_atomic_max(&max, 3);
        assert_eq!(max.load(Ordering::Relaxed), 5);
        update_atomic_max(&max, 9);
        assert_eq!(max.load(Ordering::Relaxed), 9);
    }
}
