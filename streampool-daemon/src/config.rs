//! Command line and configuration file handling.
//!
//! Precedence: explicit CLI flag, then the config file, then the built-in default.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;
use thiserror::Error;

use crate::pool::{PublishFilter, QuarantineConfig};
use crate::probe::ProbeConfig;
use crate::scheduler::CoordinatorConfig;

/// Config file looked up in the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "streampool.toml";

const DEFAULT_LISTEN: &str = "0.0.0.0:8080";
const DEFAULT_DATABASE: &str = "streampool.db";
const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_LOG_RETENTION_DAYS: u64 = 7;

/// streampool - Health-probing and routing daemon for streaming endpoints
#[derive(Parser, Debug, Default)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Address for the HTTP server to listen on
    #[arg(short, long)]
    pub listen: Option<SocketAddr>,

    /// Base URL written into the generated playlist
    #[arg(long)]
    pub public_base_url: Option<String>,

    /// Path to the database file
    #[arg(short, long)]
    pub database: Option<PathBuf>,

    /// Configuration file path
    #[arg(short = 'f', long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Directory where log files are stored
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Number of days to keep log files
    #[arg(long)]
    pub log_retention_days: Option<u64>,

    /// JSON file of ingest records submitted at startup
    #[arg(long)]
    pub ingest: Option<PathBuf>,

    /// Run a health cycle as soon as the daemon starts
    #[arg(long)]
    pub run_on_start: bool,

    /// Maximum endpoints probed concurrently
    #[arg(short = 'c', long)]
    pub max_concurrency: Option<usize>,
}

/// Configuration file format.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ConfigFile {
    pub server: ServerSection,
    pub database: DatabaseSection,
    pub logging: LoggingSection,
    pub probe: ProbeSection,
    pub quarantine: QuarantineSection,
    pub scheduler: SchedulerSection,
    pub filter: FilterSection,
}

#[derive(Debug, Deserialize, Default)]
pub struct ServerSection {
    pub listen: Option<String>,
    pub public_base_url: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct DatabaseSection {
    pub path: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct LoggingSection {
    pub log_dir: Option<String>,
    pub retention_days: Option<u64>,
    pub level: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ProbeSection {
    pub max_concurrency: Option<usize>,
    pub latency_limit_ms: Option<u64>,
    pub retry_limit: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub read_duration_secs: Option<u64>,
    pub read_grace_secs: Option<u64>,
    pub media_timeout_secs: Option<u64>,
    pub ffmpeg_path: Option<String>,
    pub ffprobe_path: Option<String>,
    pub ffmpeg_threads: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
pub struct QuarantineSection {
    pub failure_threshold: Option<u32>,
    pub retention_days: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct SchedulerSection {
    pub health_interval_minutes: Option<u64>,
    pub media_interval_minutes: Option<u64>,
    pub purge_interval_hours: Option<u64>,
    pub run_on_start: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
pub struct FilterSection {
    pub min_height: Option<u32>,
    pub codec_exclude: Option<Vec<String>>,
}

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    Read(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid listen address: {0}")]
    InvalidListen(String),

    #[error("Invalid value for {0}: must be greater than zero")]
    Zero(&'static str),

    #[error("Invalid value for {0}: too large")]
    TooLarge(&'static str),
}

/// ffmpeg/ffprobe invocation settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaToolConfig {
    pub ffmpeg: String,
    pub ffprobe: String,
    pub threads: u32,
}

/// Fully merged runtime configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen: SocketAddr,
    pub public_base_url: String,
    pub database_path: PathBuf,
    pub log_dir: PathBuf,
    pub log_retention_days: u64,
    pub log_level: Option<String>,
    pub verbose: bool,
    pub ingest_file: Option<PathBuf>,
    pub probe: ProbeConfig,
    pub media_tools: MediaToolConfig,
    pub quarantine: QuarantineConfig,
    pub coordinator: CoordinatorConfig,
    pub filter: PublishFilter,
}

/// Parse a config file.
pub fn load_config(path: &Path) -> Result<ConfigFile, ConfigError> {
    let contents =
        std::fs::read_to_string(path).map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
    Ok(toml::from_str(&contents)?)
}

/// Config file to load: explicit path, else `streampool.toml` if present.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    explicit.map(Path::to_path_buf).or_else(|| {
        let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
        default_path.exists().then_some(default_path)
    })
}

/// Longest accepted duration setting (100 years).
const MAX_DURATION_SECS: u64 = 100 * 365 * 24 * 3600;

/// `value` counted in units of `unit_secs` seconds.
fn duration_secs(value: u64, unit_secs: u64, name: &'static str) -> Result<Duration, ConfigError> {
    value
        .checked_mul(unit_secs)
        .filter(|secs| *secs <= MAX_DURATION_SECS)
        .map(Duration::from_secs)
        .ok_or(ConfigError::TooLarge(name))
}

fn duration_millis(value: u64, name: &'static str) -> Result<Duration, ConfigError> {
    if value / 1000 > MAX_DURATION_SECS {
        return Err(ConfigError::TooLarge(name));
    }
    Ok(Duration::from_millis(value))
}

fn non_zero<T: PartialEq + Default>(value: T, name: &'static str) -> Result<T, ConfigError> {
    if value == T::default() {
        Err(ConfigError::Zero(name))
    } else {
        Ok(value)
    }
}

impl AppConfig {
    /// Merge CLI arguments over a config file.
    pub fn merge(args: Args, file: ConfigFile) -> Result<Self, ConfigError> {
        let listen = match args.listen {
            Some(addr) => addr,
            None => {
                let raw = file.server.listen.as_deref().unwrap_or(DEFAULT_LISTEN);
                raw.parse()
                    .map_err(|_| ConfigError::InvalidListen(raw.to_string()))?
            }
        };
        let public_base_url = args
            .public_base_url
            .or(file.server.public_base_url)
            .unwrap_or_else(|| format!("http://{}", listen));

        let database_path = args
            .database
            .or_else(|| file.database.path.map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE));
        let log_dir = args
            .log_dir
            .or_else(|| file.logging.log_dir.map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR));
        let log_retention_days = args
            .log_retention_days
            .or(file.logging.retention_days)
            .unwrap_or(DEFAULT_LOG_RETENTION_DAYS);
        duration_secs(log_retention_days, 24 * 3600, "logging.retention_days")?;

        let probe_defaults = ProbeConfig::default();
        let p = &file.probe;
        let probe = ProbeConfig {
            max_concurrency: non_zero(
                args.max_concurrency
                    .or(p.max_concurrency)
                    .unwrap_or(probe_defaults.max_concurrency),
                "probe.max_concurrency",
            )?,
            latency_limit: p
                .latency_limit_ms
                .map(|ms| {
                    non_zero(ms, "probe.latency_limit_ms")
                        .and_then(|ms| duration_millis(ms, "probe.latency_limit_ms"))
                })
                .transpose()?
                .unwrap_or(probe_defaults.latency_limit),
            retry_limit: p.retry_limit.unwrap_or(probe_defaults.retry_limit),
            retry_delay: p
                .retry_delay_ms
                .map(|ms| duration_millis(ms, "probe.retry_delay_ms"))
                .transpose()?
                .unwrap_or(probe_defaults.retry_delay),
            read_duration: p
                .read_duration_secs
                .map(|s| {
                    non_zero(s, "probe.read_duration_secs")
                        .and_then(|s| duration_secs(s, 1, "probe.read_duration_secs"))
                })
                .transpose()?
                .unwrap_or(probe_defaults.read_duration),
            read_grace: p
                .read_grace_secs
                .map(|s| duration_secs(s, 1, "probe.read_grace_secs"))
                .transpose()?
                .unwrap_or(probe_defaults.read_grace),
            media_timeout: p
                .media_timeout_secs
                .map(|s| {
                    non_zero(s, "probe.media_timeout_secs")
                        .and_then(|s| duration_secs(s, 1, "probe.media_timeout_secs"))
                })
                .transpose()?
                .unwrap_or(probe_defaults.media_timeout),
        };
        let media_tools = MediaToolConfig {
            ffmpeg: p.ffmpeg_path.clone().unwrap_or_else(|| "ffmpeg".to_string()),
            ffprobe: p.ffprobe_path.clone().unwrap_or_else(|| "ffprobe".to_string()),
            threads: non_zero(p.ffmpeg_threads.unwrap_or(2), "probe.ffmpeg_threads")?,
        };

        let quarantine_defaults = QuarantineConfig::default();
        let quarantine = QuarantineConfig {
            failure_threshold: non_zero(
                file.quarantine
                    .failure_threshold
                    .unwrap_or(quarantine_defaults.failure_threshold),
                "quarantine.failure_threshold",
            )?,
            retention: file
                .quarantine
                .retention_days
                .map(|d| duration_secs(d, 24 * 3600, "quarantine.retention_days"))
                .transpose()?
                .unwrap_or(quarantine_defaults.retention),
        };

        let coordinator_defaults = CoordinatorConfig::default();
        let s = &file.scheduler;
        let coordinator = CoordinatorConfig {
            health_interval: s
                .health_interval_minutes
                .map(|m| non_zero(m, "scheduler.health_interval_minutes"))
                .transpose()?
                .map(|m| duration_secs(m, 60, "scheduler.health_interval_minutes"))
                .transpose()?
                .unwrap_or(coordinator_defaults.health_interval),
            media_interval: s
                .media_interval_minutes
                .map(|m| non_zero(m, "scheduler.media_interval_minutes"))
                .transpose()?
                .map(|m| duration_secs(m, 60, "scheduler.media_interval_minutes"))
                .transpose()?
                .unwrap_or(coordinator_defaults.media_interval),
            purge_interval: s
                .purge_interval_hours
                .map(|h| non_zero(h, "scheduler.purge_interval_hours"))
                .transpose()?
                .map(|h| duration_secs(h, 3600, "scheduler.purge_interval_hours"))
                .transpose()?
                .unwrap_or(coordinator_defaults.purge_interval),
            run_on_start: args.run_on_start || s.run_on_start.unwrap_or(false),
            queue_capacity: coordinator_defaults.queue_capacity,
        };

        let filter = PublishFilter {
            min_height: file.filter.min_height,
            codec_exclude: file
                .filter
                .codec_exclude
                .unwrap_or_default()
                .into_iter()
                .map(|c| c.to_ascii_lowercase())
                .collect(),
        };

        Ok(Self {
            listen,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            database_path,
            log_dir,
            log_retention_days,
            log_level: file.logging.level,
            verbose: args.verbose,
            ingest_file: args.ingest,
            probe,
            media_tools,
            quarantine,
            coordinator,
            filter,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_text: &str) -> ConfigFile {
        toml::from_str(toml_text).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::merge(Args::default(), ConfigFile::default()).unwrap();
        assert_eq!(config.listen, "0.0.0.0:8080".parse::<SocketAddr>().unwrap());
        assert_eq!(config.public_base_url, "http://0.0.0.0:8080");
        assert_eq!(config.database_path, PathBuf::from("streampool.db"));
        assert_eq!(config.probe.max_concurrency, 10);
        assert_eq!(config.probe.retry_limit, 2);
        assert_eq!(config.quarantine.failure_threshold, 3);
        assert_eq!(config.coordinator.health_interval, Duration::from_secs(1800));
        assert_eq!(config.media_tools.ffprobe, "ffprobe");
        assert!(config.filter.min_height.is_none());
    }

    #[test]
    fn test_file_values() {
        let file = parse(
            r#"
            [server]
            listen = "127.0.0.1:9000"
            public_base_url = "http://tv.example/"

            [probe]
            max_concurrency = 4
            latency_limit_ms = 5000
            retry_limit = 0

            [quarantine]
            failure_threshold = 5
            retention_days = 10

            [scheduler]
            health_interval_minutes = 15
            purge_interval_hours = 6

            [filter]
            min_height = 720
            codec_exclude = ["MPEG2VIDEO"]
            "#,
        );
        let config = AppConfig::merge(Args::default(), file).unwrap();

        assert_eq!(config.listen.port(), 9000);
        assert_eq!(config.public_base_url, "http://tv.example");
        assert_eq!(config.probe.max_concurrency, 4);
        assert_eq!(config.probe.latency_limit, Duration::from_millis(5000));
        assert_eq!(config.probe.retry_limit, 0);
        assert_eq!(config.quarantine.failure_threshold, 5);
        assert_eq!(config.quarantine.retention, Duration::from_secs(10 * 86_400));
        assert_eq!(config.coordinator.health_interval, Duration::from_secs(900));
        assert_eq!(config.coordinator.purge_interval, Duration::from_secs(6 * 3600));
        assert_eq!(config.filter.min_height, Some(720));
        assert_eq!(config.filter.codec_exclude, vec!["mpeg2video".to_string()]);
    }

    #[test]
    fn test_cli_overrides_file() {
        let file = parse(
            r#"
            [server]
            listen = "127.0.0.1:9000"
            [database]
            path = "file.db"
            [probe]
            max_concurrency = 4
            "#,
        );
        let args = Args {
            listen: Some("127.0.0.1:7000".parse().unwrap()),
            database: Some(PathBuf::from("cli.db")),
            max_concurrency: Some(16),
            run_on_start: true,
            ..Default::default()
        };
        let config = AppConfig::merge(args, file).unwrap();

        assert_eq!(config.listen.port(), 7000);
        assert_eq!(config.database_path, PathBuf::from("cli.db"));
        assert_eq!(config.probe.max_concurrency, 16);
        assert!(config.coordinator.run_on_start);
    }

    #[test]
    fn test_zero_values_rejected() {
        for text in [
            "[probe]\nmax_concurrency = 0",
            "[quarantine]\nfailure_threshold = 0",
            "[scheduler]\nhealth_interval_minutes = 0",
            "[scheduler]\npurge_interval_hours = 0",
        ] {
            let err = AppConfig::merge(Args::default(), parse(text)).unwrap_err();
            assert!(matches!(err, ConfigError::Zero(_)), "{}", text);
        }
    }

    #[test]
    fn test_oversized_durations_rejected() {
        for (text, field) in [
            ("[quarantine]\nretention_days = 9223372036854775807", "quarantine.retention_days"),
            (
                "[scheduler]\nhealth_interval_minutes = 9223372036854775807",
                "scheduler.health_interval_minutes",
            ),
            ("[scheduler]\npurge_interval_hours = 9000000000000000", "scheduler.purge_interval_hours"),
            ("[probe]\nread_grace_secs = 9223372036854775807", "probe.read_grace_secs"),
            ("[logging]\nretention_days = 9223372036854775807", "logging.retention_days"),
        ] {
            let err = AppConfig::merge(Args::default(), parse(text)).unwrap_err();
            assert!(matches!(err, ConfigError::TooLarge(name) if name == field), "{}", text);
        }

        let config = AppConfig::merge(Args::default(), parse("[quarantine]\nretention_days = 3650")).unwrap();
        assert_eq!(config.quarantine.retention, Duration::from_secs(3650 * 86_400));
    }

    #[test]
    fn test_invalid_listen() {
        let err = AppConfig::merge(Args::default(), parse("[server]\nlisten = \"nope\"")).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidListen(_)));
    }

    #[test]
    fn test_wrong_value_type_is_parse_error() {
        assert!(toml::from_str::<ConfigFile>("[probe]\nmax_concurrency = \"ten\"").is_err());
    }
}
