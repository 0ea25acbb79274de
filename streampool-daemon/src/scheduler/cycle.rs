//! Execution of one pool-mutating task.
//!
//! The [`CycleRunner`] knows how to run each [`CycleTask`] end to end. It
//! does not guard against overlap; the run coordinator only calls it while
//! holding the single-flight guard.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::Serialize;
use streampool_protocol::{CycleKind, IngestRecord};
use thiserror::Error;

use super::Clock;
use crate::database::{CycleCounts, DatabaseError, DatabaseHandle, IngestSummary};
use crate::metrics::CoordinatorMetrics;
use crate::pool::{self, QuarantineManager, SnapshotPublisher};
use crate::probe::ProbeEngine;

/// Cycle error types.
#[derive(Error, Debug)]
pub enum CycleError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// A unit of work for the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleTask {
    Health,
    MediaRecheck,
    QuarantinePurge,
    /// Merge a batch into the pool, then run a health pass.
    Ingest(Vec<IngestRecord>),
}

impl CycleTask {
    pub fn kind(&self) -> CycleKind {
        match self {
            CycleTask::Health => CycleKind::Health,
            CycleTask::MediaRecheck => CycleKind::MediaRecheck,
            CycleTask::QuarantinePurge => CycleKind::QuarantinePurge,
            CycleTask::Ingest(_) => CycleKind::Ingest,
        }
    }

    /// Task for a periodic kind. Ingestion only arrives from outside.
    pub fn periodic(kind: CycleKind) -> Option<Self> {
        match kind {
            CycleKind::Health => Some(CycleTask::Health),
            CycleKind::MediaRecheck => Some(CycleTask::MediaRecheck),
            CycleKind::QuarantinePurge => Some(CycleTask::QuarantinePurge),
            CycleKind::Ingest => None,
        }
    }
}

/// What a finished task did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub kind: CycleKind,
    pub counts: CycleCounts,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingested: Option<IngestSummary>,
    /// Version published by the task, if it published one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_version: Option<u64>,
}

impl CycleReport {
    fn new(kind: CycleKind) -> Self {
        Self {
            kind,
            counts: CycleCounts::default(),
            ingested: None,
            snapshot_version: None,
        }
    }
}

/// Runs cycle tasks against the pool.
pub struct CycleRunner {
    database: DatabaseHandle,
    engine: Arc<ProbeEngine>,
    quarantine: QuarantineManager,
    publisher: Arc<SnapshotPublisher>,
    metrics: Arc<CoordinatorMetrics>,
    clock: Arc<dyn Clock>,
}

impl CycleRunner {
    pub fn new(
        database: DatabaseHandle,
        engine: Arc<ProbeEngine>,
        quarantine: QuarantineManager,
        publisher: Arc<SnapshotPublisher>,
        metrics: Arc<CoordinatorMetrics>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            database,
            engine,
            quarantine,
            publisher,
            metrics,
            clock,
        }
    }

    pub fn publisher(&self) -> &Arc<SnapshotPublisher> {
        &self.publisher
    }

    pub fn metrics(&self) -> &Arc<CoordinatorMetrics> {
        &self.metrics
    }

    /// Run a task, recording it in cycle history and metrics.
    pub async fn run(&self, task: &CycleTask) -> Result<CycleReport, CycleError> {
        let kind = task.kind();
        let started = Instant::now();
        let history_id = {
            let db = self.database.lock().await;
            db.insert_cycle_start(kind, self.clock.now().timestamp())?
        };

        let result = match task {
            CycleTask::Health => self.run_health(CycleKind::Health).await,
            CycleTask::MediaRecheck => self.run_media_recheck().await,
            CycleTask::QuarantinePurge => self.run_purge().await,
            CycleTask::Ingest(records) => self.run_ingest(records).await,
        };

        let elapsed = started.elapsed();
        let finished_at = self.clock.now().timestamp();
        let db = self.database.lock().await;
        match &result {
            Ok(report) => {
                self.metrics.record_cycle(&report.counts, elapsed);
                if let Err(e) = db.finish_cycle(history_id, finished_at, &report.counts, true, None) {
                    warn!("Cycle {}: failed to record history: {}", kind, e);
                }
                info!(
                    "Cycle {} finished in {:.1}s: probed={}, succeeded={}, failed={}, quarantined={}, purged={}",
                    kind,
                    elapsed.as_secs_f64(),
                    report.counts.probed,
                    report.counts.succeeded,
                    report.counts.failed,
                    report.counts.quarantined,
                    report.counts.purged
                );
            }
            Err(e) => {
                self.metrics.record_failed(elapsed);
                let message = e.to_string();
                if let Err(db_err) = db.finish_cycle(
                    history_id,
                    finished_at,
                    &CycleCounts::default(),
                    false,
                    Some(&message),
                ) {
                    warn!("Cycle {}: failed to record history: {}", kind, db_err);
                }
                error!("Cycle {} failed: {}", kind, e);
            }
        }

        result
    }

    /// Probe the whole pool, apply the outcomes, publish a snapshot.
    async fn run_health(&self, kind: CycleKind) -> Result<CycleReport, CycleError> {
        let endpoints = self.database.lock().await.get_active_endpoints()?;
        info!("Cycle {}: probing {} endpoints", kind, endpoints.len());

        let outcomes = self.engine.run_cycle(&endpoints).await;

        let mut report = CycleReport::new(kind);
        let mut updates = Vec::with_capacity(outcomes.len());
        for (endpoint, outcome) in endpoints.iter().zip(&outcomes) {
            report.counts.probed += 1;
            if outcome.result.success {
                report.counts.succeeded += 1;
            } else {
                report.counts.failed += 1;
            }
            updates.push(pool::evaluate(endpoint, &outcome.result, &self.quarantine));
        }

        let now = self.clock.now();
        let summary = {
            let mut db = self.database.lock().await;
            db.apply_updates(&updates, now.timestamp())?
        };
        report.counts.quarantined = summary.quarantined;
        if summary.quarantined > 0 {
            info!("Cycle {}: quarantined {} endpoints", kind, summary.quarantined);
        }

        report.snapshot_version = Some(self.publish(kind, now).await?);
        Ok(report)
    }

    /// Re-inspect resolution and codec of the pool.
    ///
    /// Values that come back unknown keep what the endpoint had before.
    async fn run_media_recheck(&self) -> Result<CycleReport, CycleError> {
        let endpoints = self.database.lock().await.get_active_endpoints()?;
        info!("Cycle media: inspecting {} endpoints", endpoints.len());

        let outcomes = self.engine.inspect_all(&endpoints).await;

        let mut report = CycleReport::new(CycleKind::MediaRecheck);
        let mut updates = Vec::new();
        for (endpoint, outcome) in endpoints.iter().zip(&outcomes) {
            report.counts.probed += 1;
            let Some(info) = &outcome.info else {
                report.counts.failed += 1;
                continue;
            };
            report.counts.succeeded += 1;

            let resolution = if info.resolution.is_known() {
                info.resolution
            } else {
                endpoint.resolution
            };
            let codec = if info.codec.is_known() {
                info.codec.clone()
            } else {
                endpoint.codec.clone()
            };
            if resolution != endpoint.resolution || codec != endpoint.codec {
                updates.push((endpoint.id, resolution, codec));
            }
        }

        let changed = self.database.lock().await.update_media(&updates)?;
        info!("Cycle media: {} endpoints changed", changed);

        let now = self.clock.now();
        report.snapshot_version = Some(self.publish(CycleKind::MediaRecheck, now).await?);
        Ok(report)
    }

    async fn run_purge(&self) -> Result<CycleReport, CycleError> {
        let now = self.clock.now();
        let purged = {
            let db = self.database.lock().await;
            self.quarantine.purge(&db, now)?
        };

        let mut report = CycleReport::new(CycleKind::QuarantinePurge);
        report.counts.purged = purged;
        Ok(report)
    }

    async fn run_ingest(&self, records: &[IngestRecord]) -> Result<CycleReport, CycleError> {
        let summary = self.database.lock().await.ingest_records(records)?;
        info!(
            "Cycle ingest: inserted={}, updated={}, quarantined={}, rejected={}",
            summary.inserted, summary.updated, summary.quarantined, summary.rejected
        );

        let mut report = self.run_health(CycleKind::Ingest).await?;
        report.ingested = Some(summary);
        Ok(report)
    }

    /// Persist and publish the pool as it stands now.
    async fn publish(&self, kind: CycleKind, now: DateTime<Utc>) -> Result<u64, CycleError> {
        let snapshot = {
            let mut db = self.database.lock().await;
            let pool = db.get_endpoints_with_channels()?;
            let snapshot = self.publisher.prepare(&pool, kind, now).await;
            db.commit_snapshot(&snapshot.to_stored())?;
            snapshot
        };
        let published = self.publisher.publish(snapshot).await;
        Ok(published.version())
    }
}
