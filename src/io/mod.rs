//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `source` - `SiteSource` trait and response classification
//! - `http_source` - Live map endpoint backend
//! - `snapshot` - Backend answering from a stored dataset
//! - `dataset` - Dataset file load and atomic write
//! - `geocoder` - Reverse geocoding / nearby places (Google Maps)

pub mod dataset;
pub mod geocoder;
pub mod http_source;
pub mod snapshot;
pub mod source;

// Re-export commonly used types
pub use dataset::{load_dataset, write_dataset};
pub use geocoder::{Geocoder, GoogleGeocoder};
pub use source::{build_source, DetailOutcome, DiscoveryOutcome, SiteSource, SourceError};
