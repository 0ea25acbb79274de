//! Endpoint health probing.
//!
//! The [`ProbeEngine`] checks every endpoint of the pool with bounded
//! concurrency. External capabilities are injected as traits:
//! - [`Reachability`]: request/response latency
//! - [`MediaProbe`]: bounded stream read and media inspection

pub mod engine;
pub mod media;
pub mod reachability;

pub use engine::{ProbeConfig, ProbeEngine};
pub use media::{FfmpegMediaProbe, MediaInfo, MediaProbe, MediaProbeError, StreamRead};
pub use reachability::{HttpReachability, Reachability};

use thiserror::Error;

/// Failure of one probe attempt.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Timed out")]
    Timeout,

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Unexpected status: {0}")]
    Status(u16),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Stream read failed: {0}")]
    Media(#[from] MediaProbeError),

    #[error("Stream read returned no throughput")]
    NoThroughput,
}
