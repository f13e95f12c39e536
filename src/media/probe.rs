//! FFprobe wrapper for media analysis.

use std::path::Path;
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::debug;

use crate::error::TranscodeError;

/// Result of probing a media file.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    /// General media information.
    pub info: MediaInfo,
    /// Video streams in the file.
    pub video_streams: Vec<VideoStream>,
    /// Number of audio streams in the file.
    pub audio_stream_count: usize,
}

impl ProbeResult {
    /// Returns the first video stream, which is the one HLS variants are cut from.
    pub fn primary_video(&self) -> Option<&VideoStream> {
        self.video_streams.first()
    }

    /// Returns true if the file carries at least one audio stream.
    pub fn has_audio(&self) -> bool {
        self.audio_stream_count > 0
    }
}

/// General media file information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaInfo {
    /// Container format.
    pub format: String,
    /// Duration in seconds.
    pub duration: f64,
    /// File size in bytes.
    pub size: u64,
    /// Overall bitrate in bits per second.
    pub bitrate: u64,
}

/// Video stream information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoStream {
    /// Stream index.
    pub index: usize,
    /// Codec name.
    pub codec: String,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Stream bitrate in bits per second, when the container reports it.
    pub bitrate: Option<u64>,
}

/// Probes a media file using ffprobe.
pub async fn probe(ffprobe: &Path, path: &Path) -> Result<ProbeResult, TranscodeError> {
    let output = Command::new(ffprobe)
        .args([
            "-v", "quiet",
            "-print_format", "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| TranscodeError::SpawnFailed(format!("ffprobe: {}", e)))?;

    if !output.status.success() {
        return Err(TranscodeError::ProbeFailed {
            path: path.to_path_buf(),
            message: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }

    let json: serde_json::Value =
        serde_json::from_slice(&output.stdout).map_err(|e| TranscodeError::ProbeFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    let result = parse_probe_output(&json).ok_or_else(|| TranscodeError::ProbeFailed {
        path: path.to_path_buf(),
        message: "Missing format or streams in ffprobe output".to_string(),
    })?;

    debug!(?path, streams = result.video_streams.len(), "Probed source");
    Ok(result)
}

/// Parses ffprobe JSON output into structured data.
fn parse_probe_output(json: &serde_json::Value) -> Option<ProbeResult> {
    let format = json.get("format")?;
    let streams = json.get("streams")?.as_array()?;

    let info = MediaInfo {
        format: format.get("format_name")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string(),
        duration: parse_numeric(format.get("duration")).unwrap_or(0.0),
        size: parse_numeric(format.get("size")).unwrap_or(0),
        bitrate: parse_numeric(format.get("bit_rate")).unwrap_or(0),
    };

    let mut video_streams = Vec::new();
    let mut audio_stream_count = 0;

    for stream in streams {
        match stream.get("codec_type").and_then(|v| v.as_str()) {
            Some("video") => {
                if let Some(vs) = parse_video_stream(stream) {
                    video_streams.push(vs);
                }
            }
            Some("audio") => audio_stream_count += 1,
            _ => {}
        }
    }

    Some(ProbeResult {
        info,
        video_streams,
        audio_stream_count,
    })
}

/// Parses a video stream from ffprobe JSON.
fn parse_video_stream(stream: &serde_json::Value) -> Option<VideoStream> {
    // Cover art is reported as a video stream
    let attached_pic = stream
        .get("disposition")
        .and_then(|d| d.get("attached_pic"))
        .and_then(|v| v.as_i64())
        == Some(1);
    if attached_pic {
        return None;
    }

    Some(VideoStream {
        index: stream.get("index")?.as_u64()? as usize,
        codec: stream.get("codec_name")?.as_str()?.to_string(),
        width: stream.get("width")?.as_u64()? as u32,
        height: stream.get("height")?.as_u64()? as u32,
        bitrate: parse_numeric(stream.get("bit_rate")),
    })
}

/// ffprobe reports numbers as JSON strings.
fn parse_numeric<T: std::str::FromStr>(value: Option<&serde_json::Value>) -> Option<T> {
    value.and_then(|v| v.as_str()).and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_video_and_audio_streams() {
        let json = serde_json::json!({
            "format": { "format_name": "mov,mp4", "duration": "12.5", "size": "1048576", "bit_rate": "671088" },
            "streams": [
                { "index": 0, "codec_type": "video", "codec_name": "h264", "width": 1920, "height": 1080, "bit_rate": "600000" },
                { "index": 1, "codec_type": "audio", "codec_name": "aac" },
                { "index": 2, "codec_type": "video", "codec_name": "mjpeg", "width": 300, "height": 300,
                  "disposition": { "attached_pic": 1 } }
            ]
        });

        let result = parse_probe_output(&json).unwrap();
        assert_eq!(result.info.duration, 12.5);
        assert_eq!(result.info.size, 1_048_576);
        assert_eq!(result.video_streams.len(), 1);
        assert!(result.has_audio());

        let video = result.primary_video().unwrap();
        assert_eq!((video.width, video.height), (1920, 1080));
        assert_eq!(video.bitrate, Some(600_000));
    }

    #[test]
    fn missing_sections_are_rejected() {
        assert!(parse_probe_output(&serde_json::json!({ "streams": [] })).is_none());
    }
}
