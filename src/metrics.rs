//! Engine counters

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

pub struct EngineMetrics {
    start_time: Instant,
    wagers_placed: AtomicU64,
    draws_won: AtomicU64,
    draws_lost: AtomicU64,
    draws_recovered: AtomicU64,
    stale_deliveries: AtomicU64,
    rejected_deliveries: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub wagers_placed: u64,
    pub draws_won: u64,
    pub draws_lost: u64,
    pub draws_recovered: u64,
    pub stale_deliveries: u64,
    pub rejected_deliveries: u64,
    pub uptime_secs: u64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            wagers_placed: AtomicU64::new(0),
            draws_won: AtomicU64::new(0),
            draws_lost: AtomicU64::new(0),
            draws_recovered: AtomicU64::new(0),
            stale_deliveries: AtomicU64::new(0),
            rejected_deliveries: AtomicU64::new(0),
        }
    }

    pub fn record_wager(&self) {
        self.wagers_placed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_win(&self) {
        self.draws_won.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_loss(&self) {
        self.draws_lost.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_recovery(&self) {
        self.draws_recovered.fetch_add(1, Ordering::SeqCst);
    }

    /// Delivery for a request that is no longer open
    pub fn record_stale_delivery(&self) {
        self.stale_deliveries.fetch_add(1, Ordering::SeqCst);
    }

    /// Delivery from the wrong identity
    pub fn record_rejected_delivery(&self) {
        self.rejected_deliveries.fetch_add(1, Ordering::SeqCst);
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            wagers_placed: self.wagers_placed.load(Ordering::SeqCst),
            draws_won: self.draws_won.load(Ordering::SeqCst),
            draws_lost: self.draws_lost.load(Ordering::SeqCst),
            draws_recovered: self.draws_recovered.load(Ordering::SeqCst),
            stale_deliveries: self.stale_deliveries.load(Ordering::SeqCst),
            rejected_deliveries: self.rejected_deliveries.load(Ordering::SeqCst),
            uptime_secs: self.uptime().as_secs(),
        }
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = EngineMetrics::new();
        metrics.record_wager();
        metrics.record_wager();
        metrics.record_loss();
        metrics.record_stale_delivery();

        let snap = metrics.snapshot();
        assert_eq!(snap.wagers_placed, 2);
        assert_eq!(snap.draws_lost, 1);
        assert_eq!(snap.draws_won, 0);
        assert_eq!(snap.stale_deliveries, 1);
    }
}
