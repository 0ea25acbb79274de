//! Coordinator metrics collection and reporting.
//!
//! Counters are process-lifetime totals:
//! - Cycles completed, skipped and failed
//! - Endpoints probed, succeeded, failed and quarantined
//! - Quarantine records purged

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::info;
use serde::Serialize;

use crate::database::CycleCounts;

/// Run coordinator metrics.
pub struct CoordinatorMetrics {
    /// Process start time.
    start_time: Instant,
    cycles_completed: AtomicU64,
    cycles_skipped: AtomicU64,
    cycles_failed: AtomicU64,
    endpoints_probed: AtomicU64,
    endpoints_succeeded: AtomicU64,
    endpoints_failed: AtomicU64,
    endpoints_quarantined: AtomicU64,
    quarantine_purged: AtomicU64,
    /// Duration of the last finished cycle (milliseconds).
    last_cycle_duration_ms: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub cycles_completed: u64,
    pub cycles_skipped: u64,
    pub cycles_failed: u64,
    pub endpoints_probed: u64,
    pub endpoints_succeeded: u64,
    pub endpoints_failed: u64,
    pub endpoints_quarantined: u64,
    pub quarantine_purged: u64,
    pub last_cycle_duration_ms: u64,
}

impl CoordinatorMetrics {
    /// Create a new metrics instance.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record a finished cycle and its counts.
    pub fn record_cycle(&self, counts: &CycleCounts, duration: Duration) {
        self.cycles_completed.fetch_add(1, Ordering::Relaxed);
        self.endpoints_probed
            .fetch_add(counts.probed as u64, Ordering::Relaxed);
        self.endpoints_succeeded
            .fetch_add(counts.succeeded as u64, Ordering::Relaxed);
        self.endpoints_failed
            .fetch_add(counts.failed as u64, Ordering::Relaxed);
        self.endpoints_quarantined
            .fetch_add(counts.quarantined as u64, Ordering::Relaxed);
        self.quarantine_purged
            .fetch_add(counts.purged as u64, Ordering::Relaxed);
        self.last_cycle_duration_ms
            .store(duration.as_millis() as u64, Ordering::Relaxed);
    }

    /// Record a request skipped because another task held the guard.
    pub fn record_skipped(&self) {
        self.cycles_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a task that ended in an error.
    pub fn record_failed(&self, duration: Duration) {
        self.cycles_failed.fetch_add(1, Ordering::Relaxed);
        self.last_cycle_duration_ms
            .store(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn cycles_completed(&self) -> u64 {
        self.cycles_completed.load(Ordering::Relaxed)
    }

    pub fn cycles_skipped(&self) -> u64 {
        self.cycles_skipped.load(Ordering::Relaxed)
    }

    pub fn cycles_failed(&self) -> u64 {
        self.cycles_failed.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.start_time.elapsed().as_secs(),
            cycles_completed: self.cycles_completed(),
            cycles_skipped: self.cycles_skipped(),
            cycles_failed: self.cycles_failed(),
            endpoints_probed: self.endpoints_probed.load(Ordering::Relaxed),
            endpoints_succeeded: self.endpoints_succeeded.load(Ordering::Relaxed),
            endpoints_failed: self.endpoints_failed.load(Ordering::Relaxed),
            endpoints_quarantined: self.endpoints_quarantined.load(Ordering::Relaxed),
            quarantine_purged: self.quarantine_purged.load(Ordering::Relaxed),
            last_cycle_duration_ms: self.last_cycle_duration_ms.load(Ordering::Relaxed),
        }
    }

    /// Print a coordinator metrics report.
    pub fn print_report(&self) {
        let m = self.snapshot();
        info!(
            "[Coordinator] Metrics: cycles={} (skipped={}, failed={}), \
             probed={}, succeeded={}, failed={}, quarantined={}, purged={}",
            m.cycles_completed,
            m.cycles_skipped,
            m.cycles_failed,
            m.endpoints_probed,
            m.endpoints_succeeded,
            m.endpoints_failed,
            m.endpoints_quarantined,
            m.quarantine_purged
        );
    }
}

impl Default for CoordinatorMetrics {
    fn default() -> Self {
        Self {
            start_time: Instant::now(),
            cycles_completed: AtomicU64::new(0),
            cycles_skipped: AtomicU64::new(0),
            cycles_failed: AtomicU64::new(0),
            endpoints_probed: AtomicU64::new(0),
            endpoints_succeeded: AtomicU64::new(0),
            endpoints_failed: AtomicU64::new(0),
            endpoints_quarantined: AtomicU64::new(0),
            quarantine_purged: AtomicU64::new(0),
            last_cycle_duration_ms: AtomicU64::new(0),
        }
    }
}
