//! Reachability and latency probing.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use tokio::net::TcpStream;

use super::ProbeError;

/// Default RTSP port when the URL names none.
const RTSP_DEFAULT_PORT: u16 = 554;

/// Measures whether an endpoint answers, and how fast.
#[async_trait]
pub trait Reachability: Send + Sync {
    /// Return the elapsed time of a successful check.
    async fn check(&self, url: &str, timeout: Duration) -> Result<Duration, ProbeError>;
}

/// HTTP GET reachability. Succeeds only on `200 OK`.
///
/// RTSP endpoints are checked with a TCP connect to the server instead.
#[derive(Debug, Clone)]
pub struct HttpReachability {
    client: Client,
}

impl HttpReachability {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    async fn check_http(&self, url: &str) -> Result<(), ProbeError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProbeError::Timeout
                } else {
                    ProbeError::Connect(e.to_string())
                }
            })?;

        if response.status() == StatusCode::OK {
            Ok(())
        } else {
            Err(ProbeError::Status(response.status().as_u16()))
        }
    }

    async fn check_tcp(parsed: &Url) -> Result<(), ProbeError> {
        let host = parsed
            .host_str()
            .ok_or_else(|| ProbeError::InvalidUrl(parsed.to_string()))?;
        let port = parsed.port().unwrap_or(RTSP_DEFAULT_PORT);
        TcpStream::connect((host, port))
            .await
            .map_err(|e| ProbeError::Connect(e.to_string()))?;
        Ok(())
    }
}

impl Default for HttpReachability {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Reachability for HttpReachability {
    async fn check(&self, url: &str, timeout: Duration) -> Result<Duration, ProbeError> {
        let parsed = Url::parse(url).map_err(|_| ProbeError::InvalidUrl(url.to_string()))?;
        let start = Instant::now();

        let probe = async {
            match parsed.scheme() {
                "http" | "https" => self.check_http(url).await,
                "rtsp" => Self::check_tcp(&parsed).await,
                other => Err(ProbeError::UnsupportedScheme(other.to_string())),
            }
        };

        match tokio::time::timeout(timeout, probe).await {
            Ok(Ok(())) => Ok(start.elapsed()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ProbeError::Timeout),
        }
    }
}
