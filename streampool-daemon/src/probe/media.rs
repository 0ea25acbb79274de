//! Stream read and media inspection through ffmpeg/ffprobe.

use std::process::Stdio;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use streampool_protocol::{Codec, Resolution};
use thiserror::Error;
use tokio::process::Command;

/// Media capability error types.
#[derive(Error, Debug)]
pub enum MediaProbeError {
    #[error("Failed to spawn {0}: {1}")]
    Spawn(&'static str, std::io::Error),

    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("{0} exited with status {1}")]
    ExitStatus(&'static str, i32),

    #[error("Failed to parse {0} output: {1}")]
    Parse(&'static str, String),

    #[error("No media data received")]
    NoData,
}

/// Result of reading a stream for a bounded duration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamRead {
    pub bytes_transferred: u64,
    pub elapsed: Duration,
}

/// First video track properties.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MediaInfo {
    pub resolution: Resolution,
    pub codec: Codec,
}

/// External media capability used by the probe engine.
#[async_trait]
pub trait MediaProbe: Send + Sync {
    /// Read up to `duration` of the stream, giving up after `timeout`.
    async fn read(
        &self,
        url: &str,
        duration: Duration,
        timeout: Duration,
    ) -> Result<StreamRead, MediaProbeError>;

    /// Inspect the first video track.
    async fn inspect(&self, url: &str, timeout: Duration) -> Result<MediaInfo, MediaProbeError>;
}

/// [`MediaProbe`] backed by the ffmpeg and ffprobe binaries.
#[derive(Debug, Clone)]
pub struct FfmpegMediaProbe {
    ffmpeg: String,
    ffprobe: String,
    threads: u32,
}

impl FfmpegMediaProbe {
    pub fn new(ffmpeg: impl Into<String>, ffprobe: impl Into<String>, threads: u32) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
            threads: threads.max(1),
        }
    }
}

impl Default for FfmpegMediaProbe {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe", 2)
    }
}

#[async_trait]
impl MediaProbe for FfmpegMediaProbe {
    async fn read(
        &self,
        url: &str,
        duration: Duration,
        timeout: Duration,
    ) -> Result<StreamRead, MediaProbeError> {
        let seconds = duration.as_secs().max(1).to_string();
        let threads = self.threads.to_string();
        let child = Command::new(&self.ffmpeg)
            .args(["-threads", threads.as_str(), "-i", url, "-t", seconds.as_str()])
            .args(["-f", "null", "-loglevel", "info", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MediaProbeError::Spawn("ffmpeg", e))?;

        let start = Instant::now();
        // Dropping the future on timeout drops the child, which kills it.
        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| MediaProbeError::Timeout("ffmpeg"))?
            .map_err(|e| MediaProbeError::Spawn("ffmpeg", e))?;
        let elapsed = start.elapsed();

        let stderr = String::from_utf8_lossy(&output.stderr);
        let bytes_transferred = parse_transferred_bytes(&stderr);
        if bytes_transferred == 0 {
            if !output.status.success() {
                return Err(MediaProbeError::ExitStatus(
                    "ffmpeg",
                    output.status.code().unwrap_or(-1),
                ));
            }
            return Err(MediaProbeError::NoData);
        }

        Ok(StreamRead {
            bytes_transferred,
            elapsed,
        })
    }

    async fn inspect(&self, url: &str, timeout: Duration) -> Result<MediaInfo, MediaProbeError> {
        let child = Command::new(&self.ffprobe)
            .args(["-v", "error", "-select_streams", "v:0"])
            .args(["-show_entries", "stream=width,height,codec_name"])
            .args(["-of", "json", url])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MediaProbeError::Spawn("ffprobe", e))?;

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| MediaProbeError::Timeout("ffprobe"))?
            .map_err(|e| MediaProbeError::Spawn("ffprobe", e))?;

        if !output.status.success() {
            return Err(MediaProbeError::ExitStatus(
                "ffprobe",
                output.status.code().unwrap_or(-1),
            ));
        }

        parse_ffprobe_output(&output.stdout)
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    height: Option<u32>,
    codec_name: Option<String>,
}

/// Parse `ffprobe -of json` output for the first video stream.
pub fn parse_ffprobe_output(stdout: &[u8]) -> Result<MediaInfo, MediaProbeError> {
    let parsed: FfprobeOutput = serde_json::from_slice(stdout)
        .map_err(|e| MediaProbeError::Parse("ffprobe", e.to_string()))?;

    Ok(parsed
        .streams
        .into_iter()
        .next()
        .map(|stream| MediaInfo {
            resolution: Resolution::from(stream.height),
            codec: Codec::from(stream.codec_name),
        })
        .unwrap_or_default())
}

/// Sum the `video:` and `audio:` sizes from ffmpeg's final summary line.
///
/// Units are 1024-based; both `kB` and `KiB` spellings are accepted.
pub fn parse_transferred_bytes(stderr: &str) -> u64 {
    static SIZE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(video|audio):\s*([\d.]+)\s*([kKMG]?)i?B").expect("valid regex")
    });

    let mut video = None;
    let mut audio = None;
    // The summary is printed last; later matches win.
    for caps in SIZE_RE.captures_iter(stderr) {
        let Ok(value) = caps[2].parse::<f64>() else {
            continue;
        };
        let multiplier = match &caps[3] {
            "k" | "K" => 1024.0,
            "M" => 1024.0 * 1024.0,
            "G" => 1024.0 * 1024.0 * 1024.0,
            _ => 1.0,
        };
        let bytes = (value * multiplier) as u64;
        match &caps[1] {
            "video" => video = Some(bytes),
            _ => audio = Some(bytes),
        }
    }

    video.unwrap_or(0) + audio.unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_transferred_bytes() {
        let stderr = "Input #0, hls, from 'http://a/live.m3u8':\n\
            frame=  250 fps= 25 q=-0.0 Lsize=N/A time=00:00:10.00 bitrate=N/A speed=1.0x\n\
            video:1536kB audio:160kB subtitle:0kB other streams:0kB global headers:0kB muxing overhead: unknown\n";
        assert_eq!(parse_transferred_bytes(stderr), (1536 + 160) * 1024);
    }

    #[test]
    fn test_parse_transferred_bytes_newer_units() {
        let stderr = "[out#0/null] video:2.5MiB audio:512KiB subtitle:0KiB";
        assert_eq!(
            parse_transferred_bytes(stderr),
            (2.5 * 1024.0 * 1024.0) as u64 + 512 * 1024
        );
    }

    #[test]
    fn test_parse_transferred_bytes_without_summary() {
        assert_eq!(
            parse_transferred_bytes("http://a/live.m3u8: Connection refused"),
            0
        );
    }

    #[test]
    fn test_parse_ffprobe_output() {
        let json = br#"{"programs":[],"streams":[{"codec_name":"hevc","width":1920,"height":1080}]}"#;
        let info = parse_ffprobe_output(json).unwrap();
        assert_eq!(info.resolution, Resolution::Height(1080));
        assert_eq!(info.codec, Codec::Hevc);
    }

    #[test]
    fn test_parse_ffprobe_output_without_video() {
        let info = parse_ffprobe_output(br#"{"streams":[]}"#).unwrap();
        assert_eq!(info, MediaInfo::default());

        let info = parse_ffprobe_output(br#"{}"#).unwrap();
        assert_eq!(info.codec, Codec::Unknown);

        assert!(parse_ffprobe_output(b"not json").is_err());
    }
}
