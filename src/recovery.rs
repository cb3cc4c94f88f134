//! Timeout recovery watchdog
//!
//! `recover_stuck_draw` needs no authority, so any party can run this loop
//! to keep the pool live when the oracle stops answering.

use crate::engine::WagerPool;
use crate::errors::WagerError;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub struct RecoveryWatchdog {
    pool: Arc<WagerPool>,
    check_interval: Duration,
    running: AtomicBool,
    recovered: AtomicU64,
}

impl RecoveryWatchdog {
    pub fn spawn(pool: Arc<WagerPool>, check_interval: Duration) -> Arc<Self> {
        let watchdog = Arc::new(Self {
            pool,
            check_interval,
            running: AtomicBool::new(true),
            recovered: AtomicU64::new(0),
        });

        watchdog.clone().spawn_task();
        watchdog
    }

    fn spawn_task(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(self.check_interval);
            while self.running.load(Ordering::SeqCst) {
                tick.tick().await;
                self.check_once();
            }
            tracing::debug!("Recovery watchdog for {} stopped", self.pool.identity());
        });
    }

    /// One pass: recovers the open draw if its timeout has elapsed.
    pub fn check_once(&self) -> bool {
        if !self.pool.is_recoverable() {
            return false;
        }
        match self.pool.recover_stuck_draw() {
            Ok(refunded) => {
                self.recovered.fetch_add(1, Ordering::SeqCst);
                tracing::info!("Watchdog recovered a stuck draw, refunded {}", refunded);
                true
            }
            // Lost the race to a delivery or another recoverer
            Err(WagerError::State(_)) | Err(WagerError::Timeout(_)) => false,
            Err(e) => {
                tracing::warn!("Watchdog recovery failed: {}", e);
                false
            }
        }
    }

    pub fn recovered(&self) -> u64 {
        self.recovered.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
