//! Value types shared between the pool daemon and its collaborators.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// URL schemes accepted from the ingestion side.
pub const ACCEPTED_SCHEMES: [&str; 3] = ["http://", "https://", "rtsp://"];

/// Vertical resolution of a stream's first video track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "Option<u32>", into = "Option<u32>")]
pub enum Resolution {
    /// Pixel height reported by media inspection.
    Height(u32),
    /// Inspection failed or reported no video track.
    #[default]
    Unknown,
}

impl Resolution {
    pub fn height(self) -> Option<u32> {
        match self {
            Resolution::Height(h) => Some(h),
            Resolution::Unknown => None,
        }
    }

    pub fn is_known(self) -> bool {
        matches!(self, Resolution::Height(_))
    }
}

impl From<Option<u32>> for Resolution {
    fn from(value: Option<u32>) -> Self {
        match value {
            Some(h) if h > 0 => Resolution::Height(h),
            _ => Resolution::Unknown,
        }
    }
}

impl From<Resolution> for Option<u32> {
    fn from(value: Resolution) -> Self {
        value.height()
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Height(h) => write!(f, "{}p", h),
            Resolution::Unknown => f.write_str("Unknown"),
        }
    }
}

/// Video codec of a stream, as named by ffprobe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "Option<String>")]
pub enum Codec {
    Hevc,
    H264,
    Avs2,
    Mpeg2Video,
    Cavs,
    /// A codec name outside the ranking table.
    Other(String),
    #[default]
    Unknown,
}

impl Codec {
    /// Parse an ffprobe `codec_name`. Empty and "unknown" map to [`Codec::Unknown`].
    pub fn from_name(name: &str) -> Self {
        let name = name.trim();
        match name.to_ascii_lowercase().as_str() {
            "" | "unknown" => Codec::Unknown,
            "hevc" | "h265" => Codec::Hevc,
            "h264" => Codec::H264,
            "avs2" => Codec::Avs2,
            "mpeg2video" => Codec::Mpeg2Video,
            "cavs" => Codec::Cavs,
            other => Codec::Other(other.to_string()),
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Codec::Hevc => Some("hevc"),
            Codec::H264 => Some("h264"),
            Codec::Avs2 => Some("avs2"),
            Codec::Mpeg2Video => Some("mpeg2video"),
            Codec::Cavs => Some("cavs"),
            Codec::Other(name) => Some(name.as_str()),
            Codec::Unknown => None,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Codec::Unknown)
    }
}

impl From<Option<String>> for Codec {
    fn from(value: Option<String>) -> Self {
        value.as_deref().map(Codec::from_name).unwrap_or(Codec::Unknown)
    }
}

impl From<Codec> for Option<String> {
    fn from(value: Codec) -> Self {
        value.name().map(str::to_string)
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name().unwrap_or("Unknown"))
    }
}

/// Health state of an endpoint in the pool.
///
/// `Failing(k)` carries the consecutive failure count; it is stored as
/// `state = 'failing'` plus the `failure_count` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "failures", rename_all = "snake_case")]
pub enum EndpointState {
    #[default]
    Untested,
    Healthy,
    Failing(u32),
    Quarantined,
}

impl EndpointState {
    pub fn as_str(self) -> &'static str {
        match self {
            EndpointState::Untested => "untested",
            EndpointState::Healthy => "healthy",
            EndpointState::Failing(_) => "failing",
            EndpointState::Quarantined => "quarantined",
        }
    }

    /// Consecutive failures implied by the state.
    pub fn failure_count(self) -> u32 {
        match self {
            EndpointState::Failing(k) => k,
            _ => 0,
        }
    }

    /// Rebuild a state from its stored columns.
    pub fn from_parts(state: &str, failure_count: u32) -> Result<Self, ProtocolError> {
        match state {
            "untested" => Ok(EndpointState::Untested),
            "healthy" => Ok(EndpointState::Healthy),
            "failing" if failure_count > 0 => Ok(EndpointState::Failing(failure_count)),
            "failing" => Err(ProtocolError::InvalidState(
                "failing state with zero failures".to_string(),
            )),
            "quarantined" => Ok(EndpointState::Quarantined),
            other => Err(ProtocolError::InvalidState(other.to_string())),
        }
    }
}

impl fmt::Display for EndpointState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointState::Failing(k) => write!(f, "failing({})", k),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Historical reliability of an endpoint. Both fields stay within `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reputation {
    pub stability: f64,
    pub success_rate: f64,
}

impl Reputation {
    /// Reputation given to a freshly ingested endpoint.
    pub const INITIAL: Reputation = Reputation {
        stability: 0.9,
        success_rate: 0.95,
    };
}

impl Default for Reputation {
    fn default() -> Self {
        Self::INITIAL
    }
}

/// Outcome of probing one endpoint for one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub success: bool,
    /// Reachability latency of the successful attempt.
    pub latency_ms: Option<u64>,
    /// Sustained throughput in KB/s; 0 on failure.
    pub throughput_kbps: f64,
    pub resolution: Resolution,
    pub codec: Codec,
    /// Attempts consumed, including the first.
    pub attempts: u32,
    /// Error of the last failed attempt.
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl ProbeResult {
    pub fn failure(attempts: u32, error: impl Into<String>, checked_at: DateTime<Utc>) -> Self {
        Self {
            success: false,
            latency_ms: None,
            throughput_kbps: 0.0,
            resolution: Resolution::Unknown,
            codec: Codec::Unknown,
            attempts,
            error: Some(error.into()),
            checked_at,
        }
    }
}

/// One candidate delivered by the ingestion collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestRecord {
    pub channel_key: String,
    pub url: String,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub group_title: Option<String>,
    #[serde(default)]
    pub tvg_id: Option<String>,
    #[serde(default)]
    pub logo_url: Option<String>,
}

impl IngestRecord {
    pub fn new(channel_key: impl Into<String>, url: impl Into<String>, priority: i64) -> Self {
        Self {
            channel_key: channel_key.into(),
            url: url.into(),
            priority,
            title: None,
            group_title: None,
            tvg_id: None,
            logo_url: None,
        }
    }

    /// Check the record can enter the pool.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.channel_key.trim().is_empty() {
            return Err(ProtocolError::InvalidRecord("empty channel key".to_string()));
        }
        let url = self.url.trim();
        if !ACCEPTED_SCHEMES.iter().any(|scheme| url.starts_with(scheme)) {
            return Err(ProtocolError::InvalidRecord(format!(
                "unsupported URL scheme: {}",
                url
            )));
        }
        Ok(())
    }
}

/// A routable endpoint as published in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub channel_key: String,
    pub url: String,
    pub title: Option<String>,
    pub group_title: Option<String>,
    pub priority: i64,
    pub latency_ms: u64,
    pub throughput_kbps: f64,
    pub resolution: Resolution,
    pub codec: Codec,
    pub score: f64,
}

/// All published endpoints of one channel, best first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelView {
    pub channel_key: String,
    pub title: Option<String>,
    pub group_title: Option<String>,
    pub entries: Vec<SnapshotEntry>,
}

/// Kinds of pool-mutating work the coordinator runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleKind {
    /// Full reachability, throughput, media and scoring pass.
    Health,
    /// Resolution and codec re-inspection only.
    MediaRecheck,
    /// Removal of aged quarantine records.
    QuarantinePurge,
    /// Ingestion followed by a health pass.
    Ingest,
}

impl CycleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CycleKind::Health => "health",
            CycleKind::MediaRecheck => "media",
            CycleKind::QuarantinePurge => "purge",
            CycleKind::Ingest => "ingest",
        }
    }
}

impl fmt::Display for CycleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CycleKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "health" => Ok(CycleKind::Health),
            "media" => Ok(CycleKind::MediaRecheck),
            "purge" => Ok(CycleKind::QuarantinePurge),
            "ingest" => Ok(CycleKind::Ingest),
            other => Err(ProtocolError::UnknownCycleKind(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_from_option() {
        assert_eq!(Resolution::from(Some(1080)), Resolution::Height(1080));
        assert_eq!(Resolution::from(Some(0)), Resolution::Unknown);
        assert_eq!(Resolution::from(None), Resolution::Unknown);
        assert_eq!(Resolution::Height(720).to_string(), "720p");
    }

    #[test]
    fn test_codec_from_name() {
        assert_eq!(Codec::from_name("HEVC"), Codec::Hevc);
        assert_eq!(Codec::from_name("h264"), Codec::H264);
        assert_eq!(Codec::from_name("Unknown"), Codec::Unknown);
        assert_eq!(Codec::from_name("vp9"), Codec::Other("vp9".to_string()));
        assert_eq!(Codec::Unknown.name(), None);
    }

    #[test]
    fn test_state_from_parts() {
        assert_eq!(
            EndpointState::from_parts("failing", 2).unwrap(),
            EndpointState::Failing(2)
        );
        assert!(EndpointState::from_parts("failing", 0).is_err());
        assert!(EndpointState::from_parts("bogus", 0).is_err());
        assert_eq!(EndpointState::Failing(2).failure_count(), 2);
        assert_eq!(EndpointState::Healthy.failure_count(), 0);
    }

    #[test]
    fn test_ingest_record_validation() {
        assert!(IngestRecord::new("cctv1", "http://a/b.m3u8", 1).validate().is_ok());
        assert!(IngestRecord::new("cctv1", "rtsp://a/b", 1).validate().is_ok());
        assert!(IngestRecord::new("cctv1", "ftp://a/b", 1).validate().is_err());
        assert!(IngestRecord::new("  ", "http://a/b", 1).validate().is_err());
    }

    #[test]
    fn test_ingest_record_defaults() {
        let record: IngestRecord =
            serde_json::from_str(r#"{"channel_key":"cctv1","url":"http://a/b"}"#).unwrap();
        assert_eq!(record.priority, 0);
        assert!(record.title.is_none());
    }

    #[test]
    fn test_snapshot_entry_serializes_unknowns_as_null() {
        let entry = SnapshotEntry {
            channel_key: "cctv1".to_string(),
            url: "http://a/b".to_string(),
            title: None,
            group_title: None,
            priority: 0,
            latency_ms: 12,
            throughput_kbps: 800.0,
            resolution: Resolution::Unknown,
            codec: Codec::Unknown,
            score: 0.5,
        };
        let value = serde_json::to_value(&entry).unwrap();
        assert!(value["resolution"].is_null());
        assert!(value["codec"].is_null());
    }

    #[test]
    fn test_cycle_kind_round_trip_names() {
        for kind in [
            CycleKind::Health,
            CycleKind::MediaRecheck,
            CycleKind::QuarantinePurge,
            CycleKind::Ingest,
        ] {
            assert_eq!(kind.as_str().parse::<CycleKind>().unwrap(), kind);
        }
        assert!("nope".parse::<CycleKind>().is_err());
    }
}
