//! Item statistics

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Per-item counters of an activity (or of one bucket)
///
/// `processed = succeeded + failed + skipped`; `retried` counts scheduled
/// retries and is not part of `processed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStatistics {
    #[serde(default)]
    pub processed: u64,
    #[serde(default)]
    pub succeeded: u64,
    #[serde(default)]
    pub failed: u64,
    #[serde(default)]
    pub skipped: u64,
    #[serde(default)]
    pub retried: u64,
}

impl ItemStatistics {
    pub fn merge(&mut self, other: &ItemStatistics) {
        self.processed += other.processed;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.retried += other.retried;
    }

    /// Any item failed or was skipped
    pub fn has_problems(&self) -> bool {
        self.failed > 0 || self.skipped > 0
    }
}

/// Outcome class of one finished item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemResultKind {
    Succeeded,
    Failed,
    Skipped,
    Retried,
}

/// Lock-free counters shared by the coordinator's workers
#[derive(Debug, Default)]
pub struct ItemCounters {
    succeeded: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    retried: AtomicU64,
}

impl ItemCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one outcome; returns the number of finished items so far
    pub fn record(&self, kind: ItemResultKind) -> u64 {
        let counter = match kind {
            ItemResultKind::Succeeded => &self.succeeded,
            ItemResultKind::Failed => &self.failed,
            ItemResultKind::Skipped => &self.skipped,
            ItemResultKind::Retried => {
                self.retried.fetch_add(1, Ordering::Relaxed);
                return self.processed();
            }
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.processed()
    }

    fn processed(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed)
            + self.failed.load(Ordering::Relaxed)
            + self.skipped.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> ItemStatistics {
        let succeeded = self.succeeded.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let skipped = self.skipped.load(Ordering::Relaxed);
        ItemStatistics {
            processed: succeeded + failed + skipped,
            succeeded,
            failed,
            skipped,
            retried: self.retried.load(Ordering::Relaxed),
        }
    }
}

impl ItemStatistics {
    pub(crate) fn record(&mut self, kind: ItemResultKind) {
        match kind {
            ItemResultKind::Succeeded => self.succeeded += 1,
            ItemResultKind::Failed => self.failed += 1,
            ItemResultKind::Skipped => self.skipped += 1,
            ItemResultKind::Retried => {
                self.retried += 1;
                return;
            }
        }
        self.processed += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_snapshot() {
        let counters = ItemCounters::new();
        counters.record(ItemResultKind::Succeeded);
        counters.record(ItemResultKind::Retried);
        counters.record(ItemResultKind::Succeeded);
        assert_eq!(counters.record(ItemResultKind::Skipped), 3);

        let stats = counters.snapshot();
        assert_eq!(stats.processed, 3);
        assert_eq!(stats.succeeded, 2);
        assert_eq!(stats.retried, 1);
        assert!(stats.has_problems());
    }

    #[test]
    fn test_merge() {
        let mut total = ItemStatistics::default();
        let mut bucket = ItemStatistics::default();
        bucket.record(ItemResultKind::Succeeded);
        bucket.record(ItemResultKind::Failed);
        total.merge(&bucket);
        total.merge(&bucket);

        assert_eq!(total.processed, 4);
        assert_eq!(total.failed, 2);
    }
}
