//! Execution counters for a pool.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Counters updated while batches execute.
///
/// `peak_active` is the high-water mark of simultaneously live workers,
/// which is what the concurrency bound promises to cap.
#[derive(Debug, Default)]
pub struct BatchMetrics {
    launched: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    active: AtomicUsize,
    peak_active: AtomicUsize,
}

impl BatchMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_launch(&self) {
        self.launched.fetch_add(1, Ordering::Relaxed);
        let now_active = self.active.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_active.fetch_max(now_active, Ordering::Relaxed);
    }

    pub(crate) fn record_completion(&self, failed: bool) {
        self.active.fetch_sub(1, Ordering::Relaxed);
        self.completed.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn launched(&self) -> u64 {
        self.launched.load(Ordering::Relaxed)
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    pub fn peak_active(&self) -> usize {
        self.peak_active.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            launched: self.launched(),
            completed: self.completed(),
            failed: self.failed(),
            active: self.active(),
            peak_active: self.peak_active(),
        }
    }
}

/// Point-in-time copy of [`BatchMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub launched: u64,
    pub completed: u64,
    pub failed: u64,
    pub active: usize,
    pub peak_active: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peak_tracks_high_water_mark() {
        let metrics = BatchMetrics::new();

        metrics.record_launch();
        metrics.record_launch();
        metrics.record_completion(false);
        metrics.record_launch();
        metrics.record_completion(true);
        metrics.record_completion(false);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.launched, 3);
        assert_eq!(snapshot.completed, 3);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.active, 0);
        assert_eq!(snapshot.peak_active, 2);
    }
}
