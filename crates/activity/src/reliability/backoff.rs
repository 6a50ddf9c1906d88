//! Adaptive polling interval

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::duration_millis;

/// Polling backoff used while every remaining bucket is delegated elsewhere
///
/// Grows by `multiplier` on each idle poll, capped at `max_interval`, and
/// resets to `min_interval` once work is found.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollBackoff {
    #[serde(with = "duration_millis")]
    pub min_interval: Duration,

    #[serde(with = "duration_millis")]
    pub max_interval: Duration,

    pub multiplier: f64,

    #[serde(skip)]
    current: Option<Duration>,
}

impl Default for PollBackoff {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(5),
            multiplier: 1.5,
            current: None,
        }
    }
}

impl PollBackoff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    /// Interval to wait now; the following call returns a longer one
    pub fn next_interval(&mut self) -> Duration {
        let interval = self.current.unwrap_or(self.min_interval);
        let next = Duration::from_secs_f64(interval.as_secs_f64() * self.multiplier);
        self.current = Some(next.min(self.max_interval));
        interval.min(self.max_interval)
    }

    pub fn reset(&mut self) {
        self.current = None;
    }
}
