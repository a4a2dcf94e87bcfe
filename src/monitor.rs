//! The Progress Monitor: counters, throughput, and a periodic emission
//! loop through the Logging Port.
//!
//! A periodic interval loop emitting a summary line, run as a dedicated
//! background task.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::logging::Logger;

/// Shared, lock-free counters the dispatcher updates as it completes keys.
#[derive(Debug, Default)]
pub struct ProgressCounters {
    total: AtomicUsize,
    processed: AtomicUsize,
    failed: AtomicUsize,
}

impl ProgressCounters {
    pub fn new(total: usize) -> Self {
        Self {
            total: AtomicUsize::new(total),
            processed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        }
    }

    pub fn set_total(&self, total: usize) {
        self.total.store(total, Ordering::Relaxed);
    }

    pub fn increment_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> (usize, usize, usize) {
        (
            self.total.load(Ordering::Relaxed),
            self.processed.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed),
        )
    }
}

/// Throughput is a simple average over the window since the monitor
/// started, refreshed on every emission (a simple average, not an EMA).
pub struct ProgressMonitor {
    counters: Arc<ProgressCounters>,
    started_at: Instant,
    interval: Duration,
}

impl ProgressMonitor {
    pub fn new(counters: Arc<ProgressCounters>, interval: Duration) -> Self {
        Self {
            counters,
            started_at: Instant::now(),
            interval,
        }
    }

    fn throughput(&self, processed: usize) -> f64 {
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            0.0
        } else {
            processed as f64 / elapsed
        }
    }

    /// Runs the emission loop until `cancel` fires. Intended to be spawned
    /// as a background task by the engine.
    pub async fn run(self, logger: Arc<dyn Logger>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let (total, processed, failed) = self.counters.snapshot();
                    logger.log_progress(total, processed, failed, self.throughput(processed));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::NullLogger;

    #[test]
    fn counters_accumulate() {
        let counters = ProgressCounters::new(10);
        counters.increment_processed();
        counters.increment_processed();
        counters.increment_failed();
        let (total, processed, failed) = counters.snapshot();
        assert_eq!(total, 10);
        assert_eq!(processed, 2);
        assert_eq!(failed, 1);
    }

    #[tokio::test]
    async fn monitor_stops_promptly_when_cancelled() {
        let counters = Arc::new(ProgressCounters::new(5));
        let monitor = ProgressMonitor::new(counters, Duration::from_millis(10));
        let cancel = CancellationToken::new();
        let logger: Arc<dyn Logger> = Arc::new(NullLogger);

        let cancel_clone = cancel.clone();
        let handle = tokio::spawn(monitor.run(logger, cancel_clone));
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }
}
