//! Endpoint pool policy: scoring, quarantine and snapshot publication.

pub mod quarantine;
pub mod scorer;
pub mod snapshot;

pub use quarantine::{QuarantineConfig, QuarantineManager};
pub use scorer::ReputationScorer;
pub use snapshot::{PublishFilter, Snapshot, SnapshotPublisher};

use streampool_protocol::{EndpointState, ProbeResult};

use crate::database::{EndpointRecord, EndpointUpdate};

/// Compute the stored values an endpoint carries after one cycle.
///
/// A success refreshes the measurements and adds to the score. A failure
/// leaves the score and media fields alone, clears latency and throughput
/// so the endpoint stops being routable, and advances the failure streak.
pub fn evaluate(
    endpoint: &EndpointRecord,
    result: &ProbeResult,
    quarantine: &QuarantineManager,
) -> EndpointUpdate {
    let reputation = ReputationScorer::update_reputation(endpoint.reputation, result.success);
    let state = quarantine.next_state(endpoint.state, result.success);
    let checked_at = result.checked_at.timestamp();

    if result.success {
        let latency_ms = result.latency_ms.unwrap_or(0);
        let score = ReputationScorer::compute_score(
            result.resolution,
            &result.codec,
            scorer::ms_to_secs(latency_ms),
            scorer::kbps_to_mbps(result.throughput_kbps),
            reputation,
            endpoint.score,
        );
        EndpointUpdate {
            id: endpoint.id,
            latency_ms: Some(latency_ms),
            throughput_kbps: result.throughput_kbps,
            resolution: result.resolution,
            codec: result.codec.clone(),
            reputation,
            score,
            state,
            failure_count: 0,
            last_failed_at: None,
            checked_at,
        }
    } else {
        let failure_count = match state {
            EndpointState::Failing(k) => k,
            _ => endpoint.failure_count() + 1,
        };
        EndpointUpdate {
            id: endpoint.id,
            latency_ms: None,
            throughput_kbps: 0.0,
            resolution: endpoint.resolution,
            codec: endpoint.codec.clone(),
            reputation,
            score: endpoint.score,
            state,
            failure_count,
            last_failed_at: Some(checked_at),
            checked_at,
        }
    }
}
