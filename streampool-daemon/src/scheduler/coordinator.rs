//! Single-flight run coordinator.
//!
//! # How It Works
//!
//! 1. Three independent timers (health, media, purge) fire on their own intervals
//! 2. A firing timer submits a periodic task, unless a task is already running
//! 3. External callers submit tasks (ingestion, on-demand cycles) to the same queue
//! 4. One worker drains the queue in order, taking the cycle guard for each task
//!
//! A periodic task that finds the guard held is skipped. An external task
//! waits for it. A task error is logged and recorded; the worker carries on.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;
use streampool_protocol::CycleKind;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::{Clock, CycleReport, CycleRunner, CycleTask};

/// Coordinator configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub health_interval: Duration,
    pub media_interval: Duration,
    pub purge_interval: Duration,
    /// Submit one health cycle as soon as the coordinator starts.
    pub run_on_start: bool,
    /// Pending submissions the queue holds.
    pub queue_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            health_interval: Duration::from_secs(30 * 60),  // 30 minutes
            media_interval: Duration::from_secs(120 * 60),  // 2 hours
            purge_interval: Duration::from_secs(24 * 3600), // daily
            run_on_start: false,
            queue_capacity: 32,
        }
    }
}

/// Coordinator error types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    #[error("Task queue is closed")]
    QueueClosed,

    #[error("Task queue is full")]
    QueueFull,
}

/// How a submitted task ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CycleOutcome {
    Completed(CycleReport),
    /// Another task held the guard.
    Skipped,
    Failed { error: String },
}

/// Current guard state, for status reporting.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleLockStatus {
    pub running: Option<CycleKind>,
    pub next_runs: BTreeMap<CycleKind, DateTime<Utc>>,
}

enum Submission {
    Periodic(CycleTask),
    External(CycleTask, Option<oneshot::Sender<CycleOutcome>>),
}

/// Serializes pool-mutating tasks.
pub struct RunCoordinator {
    runner: Arc<CycleRunner>,
    config: CoordinatorConfig,
    clock: Arc<dyn Clock>,
    /// Held for the whole lifetime of one task.
    guard: Arc<Mutex<()>>,
    /// Set while `execute` runs. Read instead of polling the guard.
    busy: AtomicBool,
    status: StdMutex<CycleLockStatus>,
    sender: mpsc::Sender<Submission>,
    receiver: Mutex<Option<mpsc::Receiver<Submission>>>,
    cancel: CancellationToken,
}

impl RunCoordinator {
    pub fn new(
        runner: Arc<CycleRunner>,
        config: CoordinatorConfig,
        clock: Arc<dyn Clock>,
        cancel: CancellationToken,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        Self {
            runner,
            config,
            clock,
            guard: Arc::new(Mutex::new(())),
            busy: AtomicBool::new(false),
            status: StdMutex::new(CycleLockStatus::default()),
            sender,
            receiver: Mutex::new(Some(receiver)),
            cancel,
        }
    }

    pub fn runner(&self) -> &Arc<CycleRunner> {
        &self.runner
    }

    pub fn status(&self) -> CycleLockStatus {
        self.status.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_running(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Stop the timers and the worker. A running task finishes first.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Start the worker and the periodic timers.
    ///
    /// The returned handle completes once the cancellation token fires.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let Some(receiver) = self.receiver.lock().await.take() else {
                warn!("RunCoordinator: already started");
                return;
            };
            info!(
                "RunCoordinator: starting (health every {}s, media every {}s, purge every {}s)",
                self.config.health_interval.as_secs(),
                self.config.media_interval.as_secs(),
                self.config.purge_interval.as_secs()
            );

            if self.config.run_on_start {
                self.submit_periodic(CycleTask::Health);
            }

            tokio::join!(
                self.run_worker(receiver),
                self.run_timer(CycleKind::Health, self.config.health_interval),
                self.run_timer(CycleKind::MediaRecheck, self.config.media_interval),
                self.run_timer(CycleKind::QuarantinePurge, self.config.purge_interval),
            );
            info!("RunCoordinator: stopped");
        })
    }

    /// Queue an external task. It waits for any running task to finish.
    ///
    /// The returned receiver yields the outcome; dropping it is fine.
    pub async fn submit(
        &self,
        task: CycleTask,
    ) -> Result<oneshot::Receiver<CycleOutcome>, CoordinatorError> {
        let (reply, outcome) = oneshot::channel();
        self.sender
            .send(Submission::External(task, Some(reply)))
            .await
            .map_err(|_| CoordinatorError::QueueClosed)?;
        Ok(outcome)
    }

    /// Queue a periodic task unless one is running. Returns whether it was queued.
    pub fn submit_periodic(&self, task: CycleTask) -> bool {
        let kind = task.kind();
        if self.is_running() {
            info!("RunCoordinator: {} skipped, another task is running", kind);
            self.runner.metrics().record_skipped();
            return false;
        }
        match self.sender.try_send(Submission::Periodic(task)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                info!("RunCoordinator: {} skipped, queue is full", kind);
                self.runner.metrics().record_skipped();
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("RunCoordinator: {} dropped, queue closed", kind);
                false
            }
        }
    }

    /// Run a task right now if nothing else is running.
    pub async fn run_now(&self, task: CycleTask) -> CycleOutcome {
        match Arc::clone(&self.guard).try_lock_owned() {
            Ok(guard) => self.execute(task, guard).await,
            Err(_) => {
                info!(
                    "RunCoordinator: on-demand {} skipped, another task is running",
                    task.kind()
                );
                self.runner.metrics().record_skipped();
                CycleOutcome::Skipped
            }
        }
    }

    async fn run_worker(&self, mut receiver: mpsc::Receiver<Submission>) {
        loop {
            let submission = tokio::select! {
                _ = self.cancel.cancelled() => break,
                received = receiver.recv() => match received {
                    Some(submission) => submission,
                    None => break,
                },
            };

            match submission {
                Submission::Periodic(task) => match Arc::clone(&self.guard).try_lock_owned() {
                    Ok(guard) => {
                        self.execute(task, guard).await;
                    }
                    Err(_) => {
                        info!("RunCoordinator: {} skipped, another task is running", task.kind());
                        self.runner.metrics().record_skipped();
                    }
                },
                Submission::External(task, reply) => {
                    let guard = tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        guard = Arc::clone(&self.guard).lock_owned() => guard,
                    };
                    let outcome = self.execute(task, guard).await;
                    if let Some(reply) = reply {
                        let _ = reply.send(outcome);
                    }
                }
            }
        }
        debug!("RunCoordinator: worker exiting");
    }

    async fn run_timer(&self, kind: CycleKind, period: Duration) {
        let Some(task) = CycleTask::periodic(kind) else {
            return;
        };
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.set_next_run(kind, period);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.set_next_run(kind, period);
                    debug!("RunCoordinator: {} timer fired", kind);
                    self.submit_periodic(task.clone());
                }
            }
        }
    }

    fn set_next_run(&self, kind: CycleKind, period: Duration) {
        let next = self.clock.now()
            + chrono::Duration::from_std(period).unwrap_or_else(|_| chrono::Duration::zero());
        let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
        status.next_runs.insert(kind, next);
    }

    fn set_running(&self, kind: Option<CycleKind>) {
        self.busy.store(kind.is_some(), Ordering::Release);
        let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
        status.running = kind;
    }

    /// Run one task while holding the guard.
    async fn execute(&self, task: CycleTask, _guard: OwnedMutexGuard<()>) -> CycleOutcome {
        let kind = task.kind();
        self.set_running(Some(kind));
        let _running = RunningMark(self);
        debug!("RunCoordinator: running {}", kind);

        let outcome = match self.runner.run(&task).await {
            Ok(report) => CycleOutcome::Completed(report),
            Err(e) => {
                error!("RunCoordinator: {} failed: {}", kind, e);
                CycleOutcome::Failed {
                    error: e.to_string(),
                }
            }
        };

        outcome
    }
}

/// Clears the running state when a task ends, even if its future is dropped.
struct RunningMark<'a>(&'a RunCoordinator);

impl Drop for RunningMark<'_> {
    fn drop(&mut self) {
        self.0.set_running(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::cycle::tests::{harness, harness_with, FixedMedia, Harness};
    use streampool_protocol::IngestRecord;

    fn coordinator(h: &Harness, config: CoordinatorConfig) -> Arc<RunCoordinator> {
        Arc::new(RunCoordinator::new(
            h.runner.clone(),
            config,
            h.clock.clone(),
            CancellationToken::new(),
        ))
    }

    fn slow_harness() -> Harness {
        harness_with(FixedMedia {
            read_delay: Duration::from_secs(5),
            ..Default::default()
        })
    }

    async fn seed(h: &Harness) {
        h.db
            .lock()
            .await
            .ingest_records(&[IngestRecord::new("cctv1", "http://a/1", 0)])
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_now_skips_while_busy() {
        let h = slow_harness();
        seed(&h).await;
        let coordinator = coordinator(&h, CoordinatorConfig::default());

        let first = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.run_now(CycleTask::Health).await })
        };
        // Let the first cycle take the guard and block in the stream read.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(coordinator.is_running());
        assert_eq!(coordinator.status().running, Some(CycleKind::Health));

        let second = coordinator.run_now(CycleTask::Health).await;
        assert_eq!(second, CycleOutcome::Skipped);

        let first = first.await.unwrap();
        assert!(matches!(first, CycleOutcome::Completed(_)));
        assert!(!coordinator.is_running());

        // The skipped request did not touch the pool: one history row, one version.
        let db = h.db.lock().await;
        assert_eq!(db.get_cycle_history(10).unwrap().len(), 1);
        assert_eq!(db.get_current_snapshot_version().unwrap(), Some(1));
        assert_eq!(h.runner.metrics().cycles_skipped(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_submission_skipped_while_busy() {
        let h = slow_harness();
        seed(&h).await;
        let coordinator = coordinator(&h, CoordinatorConfig::default());

        let running = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.run_now(CycleTask::Health).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(!coordinator.submit_periodic(CycleTask::MediaRecheck));
        running.await.unwrap();
        assert!(coordinator.submit_periodic(CycleTask::MediaRecheck));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_status_readers_do_not_block_run_now() {
        let h = harness();
        seed(&h).await;
        let coordinator = coordinator(&h, CoordinatorConfig::default());

        let stop = Arc::new(AtomicBool::new(false));
        let watcher = {
            let coordinator = coordinator.clone();
            let stop = stop.clone();
            tokio::spawn(async move {
                let mut seen_busy = 0usize;
                while !stop.load(Ordering::Relaxed) {
                    if coordinator.is_running() {
                        seen_busy += 1;
                    }
                    let _ = coordinator.status();
                    tokio::task::yield_now().await;
                }
                seen_busy
            })
        };

        for _ in 0..20 {
            let outcome = coordinator.run_now(CycleTask::QuarantinePurge).await;
            assert!(matches!(outcome, CycleOutcome::Completed(_)), "{:?}", outcome);
        }
        stop.store(true, Ordering::Relaxed);
        watcher.await.unwrap();

        assert_eq!(h.runner.metrics().cycles_skipped(), 0);
        assert!(!coordinator.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_run_clears_running_state() {
        let h = slow_harness();
        seed(&h).await;
        let coordinator = coordinator(&h, CoordinatorConfig::default());

        let run = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.run_now(CycleTask::Health).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(coordinator.is_running());

        run.abort();
        let _ = run.await;
        assert!(!coordinator.is_running());
        assert_eq!(coordinator.status().running, None);
        assert!(matches!(
            coordinator.run_now(CycleTask::QuarantinePurge).await,
            CycleOutcome::Completed(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_tasks_run_in_order() {
        let h = harness();
        let coordinator = coordinator(&h, CoordinatorConfig::default());
        let handle = coordinator.clone().start();

        let ingest = coordinator
            .submit(CycleTask::Ingest(vec![IngestRecord::new("cctv1", "http://a/1", 0)]))
            .await
            .unwrap();
        let health = coordinator.submit(CycleTask::Health).await.unwrap();

        let CycleOutcome::Completed(first) = ingest.await.unwrap() else {
            panic!("ingest did not complete");
        };
        let CycleOutcome::Completed(second) = health.await.unwrap() else {
            panic!("health did not complete");
        };
        assert_eq!(first.snapshot_version, Some(1));
        assert_eq!(second.snapshot_version, Some(2));

        coordinator.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_continues_after_error() {
        let h = harness();
        let coordinator = coordinator(&h, CoordinatorConfig::default());
        let handle = coordinator.clone().start();

        h.db
            .lock()
            .await
            .connection()
            .execute_batch("ALTER TABLE endpoints RENAME TO endpoints_gone;")
            .unwrap();
        let failed = coordinator.submit(CycleTask::Health).await.unwrap();
        assert!(matches!(failed.await.unwrap(), CycleOutcome::Failed { .. }));

        let purge = coordinator.submit(CycleTask::QuarantinePurge).await.unwrap();
        assert!(matches!(purge.await.unwrap(), CycleOutcome::Completed(_)));
        assert_eq!(h.runner.metrics().cycles_failed(), 1);

        coordinator.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_timers_drive_periodic_cycles() {
        let h = harness();
        seed(&h).await;
        let config = CoordinatorConfig {
            health_interval: Duration::from_secs(60),
            media_interval: Duration::from_secs(3600),
            purge_interval: Duration::from_secs(7200),
            ..Default::default()
        };
        let coordinator = coordinator(&h, config);
        let handle = coordinator.clone().start();

        tokio::time::sleep(Duration::from_secs(185)).await;
        assert!(coordinator.status().next_runs.contains_key(&CycleKind::QuarantinePurge));

        coordinator.shutdown();
        handle.await.unwrap();

        let db = h.db.lock().await;
        let health_cycles = db
            .get_cycle_history(100)
            .unwrap()
            .into_iter()
            .filter(|r| r.kind == "health")
            .count();
        assert_eq!(health_cycles, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_on_start() {
        let h = harness();
        seed(&h).await;
        let config = CoordinatorConfig {
            run_on_start: true,
            ..Default::default()
        };
        let coordinator = coordinator(&h, config);
        let handle = coordinator.clone().start();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(h.runner.publisher().current().await.version(), 1);

        coordinator.shutdown();
        handle.await.unwrap();
    }
}
