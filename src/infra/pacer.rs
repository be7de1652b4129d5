//! Suspension between upstream queries
//!
//! Crawl stages never call `tokio::time::sleep` directly; every pause goes
//! through a `Pacer` so tests can record pauses instead of waiting.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseReason {
    /// Courtesy delay after a query
    Pacing,
    /// Back-off after the upstream rate-limited us
    Cooldown,
}

#[async_trait]
pub trait Pacer: Send + Sync {
    async fn pause(&self, duration: Duration, reason: PauseReason);
}

/// Real wall-clock pauses
pub struct TokioPacer;

#[async_trait]
impl Pacer for TokioPacer {
    async fn pause(&self, duration: Duration, reason: PauseReason) {
        if duration.is_zero() {
            return;
        }
        match reason {
            PauseReason::Cooldown => {
                warn!(secs = duration.as_secs(), "rate_limit_cooldown");
            }
            PauseReason::Pacing => {
                debug!(ms = duration.as_millis() as u64, "pacing_pause");
            }
        }
        tokio::time::sleep(duration).await;
    }
}

/// Records pauses without sleeping
#[derive(Default)]
pub struct RecordingPacer {
    pauses: Mutex<Vec<(Duration, PauseReason)>>,
}

impl RecordingPacer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pauses(&self) -> Vec<(Duration, PauseReason)> {
        self.pauses.lock().clone()
    }

    pub fn count(&self, reason: PauseReason) -> usize {
        self.pauses.lock().iter().filter(|(_, r)| *r == reason).count()
    }

    pub fn total(&self, reason: PauseReason) -> Duration {
        self.pauses.lock().iter().filter(|(_, r)| *r == reason).map(|(d, _)| *d).sum()
    }
}

#[async_trait]
impl Pacer for RecordingPacer {
    async fn pause(&self, duration: Duration, reason: PauseReason) {
        self.pauses.lock().push((duration, reason));
    }
}
