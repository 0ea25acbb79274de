//! streampool: health-probing and routing daemon for streaming endpoints.
//!
//! The daemon keeps a pool of candidate stream URLs grouped by channel,
//! probes them on a schedule, scores and quarantines them, and publishes
//! an immutable snapshot that the HTTP router redirects from.

use std::sync::Arc;

use clap::Parser;
use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

mod config;
mod database;
mod ingest;
mod logging;
mod metrics;
mod pool;
mod probe;
mod scheduler;
mod web;

use config::{AppConfig, Args, ConfigFile};
use database::Database;
use metrics::CoordinatorMetrics;
use pool::{QuarantineManager, Snapshot, SnapshotPublisher};
use probe::{FfmpegMediaProbe, HttpReachability, ProbeEngine};
use scheduler::{Clock, CycleRunner, CycleTask, RunCoordinator, SystemClock};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load config file: explicit path > auto-detect > default
    let file_config = match config::resolve_config_path(args.config.as_deref()) {
        Some(path) => match config::load_config(&path) {
            Ok(c) => {
                eprintln!("Loaded config from: {}", path.display());
                c
            }
            Err(e) => {
                eprintln!("Failed to load config file: {}", e);
                return Err(e.into());
            }
        },
        None => ConfigFile::default(),
    };
    let config = AppConfig::merge(args, file_config)?;

    logging::init_logging(
        &config.log_dir,
        config.log_retention_days,
        config.verbose,
        config.log_level.as_deref(),
    )?;

    info!("streampool starting...");
    info!("  Listen address: {}", config.listen);
    info!("  Public base URL: {}", config.public_base_url);
    info!("  Database: {:?}", config.database_path);
    info!(
        "  Probe: concurrency={}, latency_limit={}ms, retries={}",
        config.probe.max_concurrency,
        config.probe.latency_limit.as_millis(),
        config.probe.retry_limit
    );
    info!(
        "  Quarantine: threshold={}, retention={}d",
        config.quarantine.failure_threshold,
        config.quarantine.retention.as_secs() / 86_400
    );

    let db = match Database::open(&config.database_path) {
        Ok(db) => db,
        Err(e) => {
            error!("Failed to open database: {}", e);
            return Err(e.into());
        }
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // Serve the last published snapshot until the first cycle completes.
    let initial = Snapshot::restore(&db, clock.now());
    let db = Arc::new(tokio::sync::Mutex::new(db));

    let publisher = Arc::new(SnapshotPublisher::new(initial, config.filter.clone()));
    let tools = &config.media_tools;
    let engine = Arc::new(ProbeEngine::new(
        config.probe.clone(),
        Arc::new(HttpReachability::new()),
        Arc::new(FfmpegMediaProbe::new(
            tools.ffmpeg.clone(),
            tools.ffprobe.clone(),
            tools.threads,
        )),
        Arc::clone(&clock),
    ));
    let metrics = CoordinatorMetrics::new();
    let runner = Arc::new(CycleRunner::new(
        db.clone(),
        engine,
        QuarantineManager::new(config.quarantine.clone()),
        publisher,
        Arc::clone(&metrics),
        Arc::clone(&clock),
    ));

    let shutdown = CancellationToken::new();
    let coordinator = Arc::new(RunCoordinator::new(
        runner,
        config.coordinator.clone(),
        Arc::clone(&clock),
        shutdown.child_token(),
    ));
    let coordinator_handle = Arc::clone(&coordinator).start();

    if let Some(path) = &config.ingest_file {
        match ingest::load_records_file(path) {
            Ok(records) if records.is_empty() => warn!("Ingest file {} is empty", path.display()),
            Ok(records) => {
                if let Err(e) = coordinator.submit(CycleTask::Ingest(records)).await {
                    error!("Failed to queue startup ingest: {}", e);
                }
            }
            Err(e) => error!("{}", e),
        }
    }

    let web_state = Arc::new(web::WebState::new(
        db.clone(),
        Arc::clone(&coordinator),
        config.public_base_url.clone(),
    ));
    let web_shutdown = shutdown.child_token();
    let listen = config.listen;
    let web_handle = tokio::spawn(async move {
        if let Err(e) = web::start_web_server(listen, web_state, web_shutdown).await {
            error!("Web server error: {}", e);
        }
    });

    info!("streampool ready");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }

    info!("Shutting down...");
    shutdown.cancel();
    let _ = coordinator_handle.await;
    let _ = web_handle.await;
    metrics.print_report();

    Ok(())
}
