//! Bounded-concurrency probe cycles.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use streampool_protocol::ProbeResult;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::{MediaInfo, MediaProbe, ProbeError, Reachability};
use crate::database::EndpointRecord;
use crate::scheduler::Clock;

/// Seconds of warm-up excluded from the throughput denominator.
const WARMUP_SECS: f64 = 2.0;
/// Floor of the throughput denominator.
const MIN_EFFECTIVE_SECS: f64 = 0.5;

/// Probe engine configuration.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Endpoints probed at the same time.
    pub max_concurrency: usize,
    /// Reachability timeout.
    pub latency_limit: Duration,
    /// Additional attempts after the first.
    pub retry_limit: u32,
    /// Pause between attempts.
    pub retry_delay: Duration,
    /// Stream time read for the throughput measurement.
    pub read_duration: Duration,
    /// Extra time the read may take before it is abandoned.
    pub read_grace: Duration,
    /// Media inspection timeout.
    pub media_timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            latency_limit: Duration::from_millis(10_000),
            retry_limit: 2,
            retry_delay: Duration::from_secs(2),
            read_duration: Duration::from_secs(10),
            read_grace: Duration::from_secs(2),
            media_timeout: Duration::from_secs(10),
        }
    }
}

/// Terminal result of one endpoint in a cycle.
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub endpoint_id: i64,
    pub url: String,
    pub result: ProbeResult,
}

/// Result of re-inspecting one endpoint's media. `None` when inspection failed.
#[derive(Debug, Clone)]
pub struct MediaOutcome {
    pub endpoint_id: i64,
    pub info: Option<MediaInfo>,
}

/// Sustained throughput in whole KB/s.
pub fn throughput_kbps(bytes: u64, elapsed: Duration) -> f64 {
    let effective = (elapsed.as_secs_f64() - WARMUP_SECS).max(MIN_EFFECTIVE_SECS);
    ((bytes as f64 / 1024.0) / effective).round()
}

/// Probes the pool.
pub struct ProbeEngine {
    prober: Prober,
    semaphore: Arc<Semaphore>,
}

#[derive(Clone)]
struct Prober {
    config: ProbeConfig,
    reachability: Arc<dyn Reachability>,
    media: Arc<dyn MediaProbe>,
    clock: Arc<dyn Clock>,
}

impl ProbeEngine {
    pub fn new(
        config: ProbeConfig,
        reachability: Arc<dyn Reachability>,
        media: Arc<dyn MediaProbe>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
        Self {
            prober: Prober {
                config,
                reachability,
                media,
                clock,
            },
            semaphore,
        }
    }

    /// Probe every endpoint and wait for all of them to finish.
    ///
    /// Outcomes are returned in input order. An endpoint whose probe task
    /// panicked gets a failed outcome.
    pub async fn run_cycle(&self, endpoints: &[EndpointRecord]) -> Vec<ProbeOutcome> {
        let mut tasks = JoinSet::new();
        for endpoint in endpoints {
            let prober = self.prober.clone();
            let semaphore = Arc::clone(&self.semaphore);
            let id = endpoint.id;
            let url = endpoint.url.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let result = prober.probe(&url).await;
                ProbeOutcome {
                    endpoint_id: id,
                    url,
                    result,
                }
            });
        }

        let mut finished: HashMap<i64, ProbeOutcome> = HashMap::with_capacity(endpoints.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => {
                    finished.insert(outcome.endpoint_id, outcome);
                }
                Err(e) => warn!("Probe task failed: {}", e),
            }
        }

        endpoints
            .iter()
            .map(|endpoint| {
                finished.remove(&endpoint.id).unwrap_or_else(|| ProbeOutcome {
                    endpoint_id: endpoint.id,
                    url: endpoint.url.clone(),
                    result: ProbeResult::failure(
                        0,
                        "probe task aborted",
                        self.prober.clock.now(),
                    ),
                })
            })
            .collect()
    }

    /// Re-inspect media of every endpoint, sharing the probe concurrency bound.
    pub async fn inspect_all(&self, endpoints: &[EndpointRecord]) -> Vec<MediaOutcome> {
        let mut tasks = JoinSet::new();
        for endpoint in endpoints {
            let prober = self.prober.clone();
            let semaphore = Arc::clone(&self.semaphore);
            let id = endpoint.id;
            let url = endpoint.url.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                MediaOutcome {
                    endpoint_id: id,
                    info: prober.inspect(&url).await,
                }
            });
        }

        let mut finished: HashMap<i64, MediaOutcome> = HashMap::with_capacity(endpoints.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => {
                    finished.insert(outcome.endpoint_id, outcome);
                }
                Err(e) => warn!("Media inspection task failed: {}", e),
            }
        }

        endpoints
            .iter()
            .map(|endpoint| {
                finished.remove(&endpoint.id).unwrap_or(MediaOutcome {
                    endpoint_id: endpoint.id,
                    info: None,
                })
            })
            .collect()
    }
}

impl Prober {
    async fn probe(&self, url: &str) -> ProbeResult {
        let total_attempts = self.config.retry_limit + 1;
        let mut last_error = String::new();

        for attempt in 1..=total_attempts {
            match self.attempt(url).await {
                Ok((latency, kbps)) => {
                    let media = self.inspect(url).await.unwrap_or_default();
                    debug!(
                        "Probe OK: {} | latency {} ms | {} KB/s | {} {}",
                        url,
                        latency.as_millis(),
                        kbps,
                        media.resolution,
                        media.codec
                    );
                    return ProbeResult {
                        success: true,
                        latency_ms: Some(latency.as_millis() as u64),
                        throughput_kbps: kbps,
                        resolution: media.resolution,
                        codec: media.codec,
                        attempts: attempt,
                        error: None,
                        checked_at: self.clock.now(),
                    };
                }
                Err(e) => {
                    debug!(
                        "Probe attempt {}/{} failed for {}: {}",
                        attempt, total_attempts, url, e
                    );
                    last_error = e.to_string();
                    if attempt < total_attempts {
                        tokio::time::sleep(self.config.retry_delay).await;
                    }
                }
            }
        }

        ProbeResult::failure(total_attempts, last_error, self.clock.now())
    }

    /// Reachability followed by a throughput read.
    async fn attempt(&self, url: &str) -> Result<(Duration, f64), ProbeError> {
        let limit = self.config.latency_limit;
        let latency = tokio::time::timeout(limit, self.reachability.check(url, limit))
            .await
            .map_err(|_| ProbeError::Timeout)??;

        let bound = self.config.read_duration + self.config.read_grace;
        let read = tokio::time::timeout(
            bound,
            self.media.read(url, self.config.read_duration, bound),
        )
        .await
        .map_err(|_| ProbeError::Timeout)??;

        let kbps = throughput_kbps(read.bytes_transferred, read.elapsed);
        if kbps <= 0.0 {
            return Err(ProbeError::NoThroughput);
        }
        Ok((latency, kbps))
    }

    async fn inspect(&self, url: &str) -> Option<MediaInfo> {
        let limit = self.config.media_timeout;
        match tokio::time::timeout(limit, self.media.inspect(url, limit)).await {
            Ok(Ok(info)) => Some(info),
            Ok(Err(e)) => {
                debug!("Media inspection failed for {}: {}", url, e);
                None
            }
            Err(_) => {
                debug!("Media inspection timed out for {}", url);
                None
            }
        }
    }
}
