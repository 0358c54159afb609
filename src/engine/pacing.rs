//! Random pause between consecutive signers.

use rand::Rng;
use std::time::Duration;
use tracing::debug;

use crate::config::RunConfig;

/// Bounds (inclusive, whole seconds) of the pause between two signers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub min_secs: u64,
    pub max_secs: u64,
}

impl Pacing {
    pub fn between(min_secs: u64, max_secs: u64) -> Self {
        // Swapped bounds are tolerated rather than rejected.
        Self {
            min_secs: min_secs.min(max_secs),
            max_secs: min_secs.max(max_secs),
        }
    }

    /// No pause at all. Used by tests and by `max_delay_secs = 0`.
    pub fn none() -> Self {
        Self::between(0, 0)
    }

    pub fn is_none(&self) -> bool {
        self.max_secs == 0
    }

    /// Pick the next pause length.
    pub fn next_delay(&self) -> Duration {
        if self.min_secs == self.max_secs {
            return Duration::from_secs(self.min_secs);
        }
        let secs = rand::thread_rng().gen_range(self.min_secs..=self.max_secs);
        Duration::from_secs(secs)
    }

    pub async fn pause(&self) {
        if self.is_none() {
            return;
        }
        // The RNG handle is not Send; draw before awaiting.
        let delay = self.next_delay();
        debug!(delay_secs = delay.as_secs(), "Pausing before next signer");
        tokio::time::sleep(delay).await;
    }
}

impl From<&RunConfig> for Pacing {
    fn from(run: &RunConfig) -> Self {
        Self::between(run.min_delay_secs, run.max_delay_secs)
    }
}
