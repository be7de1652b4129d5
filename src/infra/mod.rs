//! Infrastructure - configuration, metrics, and pacing
//!
//! This module contains infrastructure concerns:
//! - `config` - Application configuration (TOML loading, defaults, overrides)
//! - `metrics` - Lock-free crawl counters
//! - `pacer` - Pauses between upstream queries

pub mod config;
pub mod metrics;
pub mod pacer;

// Re-export commonly used types
pub use config::{Config, SourceKind};
pub use metrics::CrawlMetrics;
pub use pacer::{Pacer, TokioPacer};
