//! Services - crawl stages and run orchestration
//!
//! This module contains the core business logic services:
//! - `crawler` - Adaptive region subdivision and site discovery
//! - `details` - Per-site detail queries
//! - `reconcile` - Merge of fresh results into the persisted dataset
//! - `enrichment` - Nearest neighbour and reverse geocoding
//! - `pipeline` - Wires the stages for one run

pub mod crawler;
pub mod details;
pub mod enrichment;
pub mod pipeline;
pub mod reconcile;

#[cfg(test)]
pub(crate) mod fakes;

// Re-export commonly used types
pub use crawler::{CrawlDriver, CrawlSettings};
pub use pipeline::{Pipeline, RunPlan, RunReport};
pub use reconcile::{reconcile, MergePolicy, ReconcileReport};
