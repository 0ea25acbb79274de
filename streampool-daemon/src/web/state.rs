//! Web server shared state.

use std::sync::Arc;

use crate::database::DatabaseHandle;
use crate::metrics::CoordinatorMetrics;
use crate::pool::SnapshotPublisher;
use crate::scheduler::RunCoordinator;

/// Shared state for the web server.
pub struct WebState {
    /// Database handle, for the read-only history and quarantine views.
    pub database: DatabaseHandle,
    /// Source of the current snapshot. Routing reads nothing else.
    pub publisher: Arc<SnapshotPublisher>,
    /// Entry point for on-demand cycles and ingestion.
    pub coordinator: Arc<RunCoordinator>,
    pub metrics: Arc<CoordinatorMetrics>,
    /// Base URL of this server as seen by playlist clients, without a trailing slash.
    pub public_base_url: String,
}

impl WebState {
    pub fn new(
        database: DatabaseHandle,
        coordinator: Arc<RunCoordinator>,
        public_base_url: impl Into<String>,
    ) -> Self {
        let runner = coordinator.runner();
        Self {
            database,
            publisher: Arc::clone(runner.publisher()),
            metrics: Arc::clone(runner.metrics()),
            coordinator,
            public_base_url: public_base_url.into(),
        }
    }
}
