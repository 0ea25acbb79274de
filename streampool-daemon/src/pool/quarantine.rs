//! Failure tracking and quarantine policy.

use std::time::Duration;

use chrono::{DateTime, Utc};
use streampool_protocol::EndpointState;

use crate::database::{self, Database};

/// Quarantine policy configuration.
#[derive(Debug, Clone)]
pub struct QuarantineConfig {
    /// Consecutive failed cycles that evict an endpoint.
    pub failure_threshold: u32,
    /// How long quarantine records are kept before purge.
    pub retention: Duration,
}

impl Default for QuarantineConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            retention: Duration::from_secs(20 * 24 * 60 * 60),
        }
    }
}

/// Next state of an endpoint after one cycle outcome.
///
/// Any success resets to `Healthy`. A failure that brings the streak to
/// `threshold` yields `Quarantined`, which is terminal.
pub fn transition(state: EndpointState, success: bool, threshold: u32) -> EndpointState {
    match (state, success) {
        (EndpointState::Quarantined, _) => EndpointState::Quarantined,
        (_, true) => EndpointState::Healthy,
        (state, false) => {
            let failures = state.failure_count() + 1;
            if failures >= threshold {
                EndpointState::Quarantined
            } else {
                EndpointState::Failing(failures)
            }
        }
    }
}

/// Applies the quarantine policy.
#[derive(Debug, Clone, Default)]
pub struct QuarantineManager {
    config: QuarantineConfig,
}

impl QuarantineManager {
    pub fn new(config: QuarantineConfig) -> Self {
        Self { config }
    }

    pub fn next_state(&self, state: EndpointState, success: bool) -> EndpointState {
        transition(state, success, self.config.failure_threshold)
    }

    /// Oldest `quarantined_at` that survives a purge at `now`.
    pub fn purge_cutoff(&self, now: DateTime<Utc>) -> i64 {
        let retention = i64::try_from(self.config.retention.as_secs()).unwrap_or(i64::MAX);
        now.timestamp().saturating_sub(retention)
    }

    /// Delete quarantine records older than the retention period.
    pub fn purge(&self, db: &Database, now: DateTime<Utc>) -> database::Result<usize> {
        let cutoff = self.purge_cutoff(now);
        let purged = db.purge_quarantine_before(cutoff)?;
        if purged > 0 {
            log::info!("Quarantine: purged {} records older than {}", purged, cutoff);
        } else {
            log::debug!("Quarantine: nothing to purge");
        }
        Ok(purged)
    }
}
