//! Database model definitions.

use serde::Serialize;
use streampool_protocol::{Codec, CycleKind, EndpointState, Reputation, Resolution, SnapshotEntry};

/// Endpoint record from the active pool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointRecord {
    pub id: i64,
    pub channel_key: String,
    pub url: String,
    pub priority: i64,
    // Last measurements
    pub latency_ms: Option<u64>,
    pub throughput_kbps: f64,
    pub resolution: Resolution,
    pub codec: Codec,
    // Reputation
    pub reputation: Reputation,
    pub score: f64,
    // Failure tracking
    pub state: EndpointState,
    pub last_failed_at: Option<i64>,
    pub last_checked_at: Option<i64>,
    // Metadata
    pub created_at: i64,
    pub updated_at: i64,
}

impl EndpointRecord {
    pub fn failure_count(&self) -> u32 {
        self.state.failure_count()
    }
}

/// Active endpoint joined with its channel metadata, for snapshot building.
#[derive(Debug, Clone)]
pub struct EndpointWithChannel {
    pub endpoint: EndpointRecord,
    pub title: Option<String>,
    pub group_title: Option<String>,
    pub display_order: i64,
}

/// New per-endpoint values computed at the end of a health cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointUpdate {
    pub id: i64,
    pub latency_ms: Option<u64>,
    pub throughput_kbps: f64,
    pub resolution: Resolution,
    pub codec: Codec,
    pub reputation: Reputation,
    pub score: f64,
    pub state: EndpointState,
    /// Consecutive failures, carried into quarantine on eviction.
    pub failure_count: u32,
    pub last_failed_at: Option<i64>,
    pub checked_at: i64,
}

/// Result of applying a cycle's updates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ApplySummary {
    pub updated: usize,
    pub quarantined: usize,
    /// Updates whose endpoint vanished from the pool.
    pub missing: usize,
}

/// Result of ingesting a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub inserted: usize,
    pub updated: usize,
    /// Records whose URL is currently quarantined.
    pub quarantined: usize,
    pub rejected: usize,
}

/// Quarantined endpoint record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuarantineRecord {
    pub id: i64,
    pub channel_key: String,
    pub url: String,
    pub priority: i64,
    pub stability: Option<f64>,
    pub success_rate: Option<f64>,
    pub score: Option<f64>,
    pub failure_count: u32,
    pub last_failed_at: Option<i64>,
    pub quarantined_at: i64,
}

/// A persisted snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSnapshot {
    pub version: u64,
    pub created_at: i64,
    pub kind: Option<CycleKind>,
    pub entries: Vec<StoredSnapshotEntry>,
}

/// Snapshot entry with the channel ordering it was published under.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSnapshotEntry {
    pub display_order: i64,
    pub entry: SnapshotEntry,
}

/// Cycle history record.
#[derive(Debug, Clone, Serialize)]
pub struct CycleHistoryRecord {
    pub id: i64,
    pub kind: String,
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub probed: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub quarantined: i64,
    pub purged: i64,
    pub success: Option<bool>,
    pub error_message: Option<String>,
}

/// Counters written when a cycle finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleCounts {
    pub probed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub quarantined: usize,
    pub purged: usize,
}
