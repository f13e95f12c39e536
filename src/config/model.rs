//! Configuration data structures.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure containing all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global application settings.
    pub global: GlobalConfig,

    /// Upload folder watching.
    #[serde(default)]
    pub watch: WatchConfig,
}

/// Global application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Directory uploaded source videos land in.
    pub upload_dir: PathBuf,

    /// Redis connection settings for the job status store.
    pub redis: RedisConfig,

    /// Object storage settings.
    pub storage: StorageConfig,

    /// HLS transcoding settings.
    #[serde(default)]
    pub transcoder: TranscoderConfig,

    /// Encoding queue settings.
    #[serde(default)]
    pub queue: QueueConfig,

    /// File stability detection settings.
    #[serde(default)]
    pub stability_check: StabilityConfig,

    /// Prometheus metrics settings.
    #[serde(default)]
    pub prometheus: PrometheusConfig,
}

/// Redis connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis server hostname.
    #[serde(default = "default_redis_host")]
    pub host: String,

    /// Redis server port.
    #[serde(default = "default_redis_port")]
    pub port: u16,

    /// Redis database number.
    #[serde(default)]
    pub db: u8,

    /// Optional Redis password.
    #[serde(default)]
    pub password: Option<String>,
}

impl RedisConfig {
    /// Builds the connection URL.
    pub fn url(&self) -> String {
        match &self.password {
            Some(pass) => format!("redis://:{}@{}:{}/{}", pass, self.host, self.port, self.db),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }
}

/// S3-compatible object storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Bucket that receives encoded output.
    pub bucket: String,

    /// Bucket region.
    #[serde(default = "default_region")]
    pub region: String,

    /// Custom endpoint (e.g. MinIO). Enables path-style addressing.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Key prefix every job's files are stored under.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Base URL objects are served from, if not the bucket URL.
    #[serde(default)]
    pub public_base_url: Option<String>,

    /// Access key id. Falls back to `AWS_ACCESS_KEY_ID`.
    #[serde(default, skip_serializing)]
    pub access_key_id: Option<String>,

    /// Secret access key. Falls back to `AWS_SECRET_ACCESS_KEY`.
    #[serde(default, skip_serializing)]
    pub secret_access_key: Option<String>,
}

/// HLS transcoding configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscoderConfig {
    /// ffmpeg binary.
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg_path: PathBuf,

    /// ffprobe binary.
    #[serde(default = "default_ffprobe")]
    pub ffprobe_path: PathBuf,

    /// Root for per-job output directories. Defaults to the source's directory.
    #[serde(default)]
    pub output_root: Option<PathBuf>,

    /// Target HLS segment duration in seconds.
    #[serde(default = "default_hls_time")]
    pub hls_time: u32,

    /// x264 preset.
    #[serde(default = "default_preset")]
    pub preset: String,

    /// Scaled renditions, added below the source resolution.
    #[serde(default = "default_renditions")]
    pub renditions: Vec<Rendition>,

    /// Audio bitrate for every variant.
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,
}

/// One scaled variant of the HLS ladder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rendition {
    /// Output height in pixels. Width keeps the aspect ratio.
    pub height: u32,

    /// Target video bitrate (e.g., "2800k").
    pub video_bitrate: String,
}

/// Encoding queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QueueConfig {
    /// Upper bound for one job's transcode and upload. Unbounded when unset.
    #[serde(default)]
    pub job_timeout_seconds: Option<u64>,
}

impl QueueConfig {
    /// Returns the job timeout as a duration.
    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_seconds.map(Duration::from_secs)
    }
}

/// File stability detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StabilityConfig {
    /// Duration in seconds the file size must remain stable.
    #[serde(default = "default_stability_duration")]
    pub duration_seconds: u64,

    /// Interval in seconds between stability checks.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
}

/// Prometheus metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusConfig {
    /// Whether to enable Prometheus metrics endpoint.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Port for the Prometheus metrics HTTP server.
    #[serde(default = "default_prometheus_port")]
    pub port: u16,
}

/// Upload folder watch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Whether `run` watches the upload directory.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Whether to watch subdirectories recursively.
    #[serde(default = "default_true")]
    pub recursive: bool,

    /// File patterns to match (e.g., ["*.mp4", "*.mov"]).
    #[serde(default = "default_file_patterns")]
    pub file_patterns: Vec<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_redis_host() -> String {
    "localhost".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_key_prefix() -> String {
    "videos-hls".to_string()
}

fn default_ffmpeg() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe() -> PathBuf {
    PathBuf::from("ffprobe")
}

fn default_hls_time() -> u32 {
    6
}

fn default_preset() -> String {
    "veryfast".to_string()
}

fn default_renditions() -> Vec<Rendition> {
    vec![
        Rendition {
            height: 720,
            video_bitrate: "2800k".to_string(),
        },
        Rendition {
            height: 1080,
            video_bitrate: "5000k".to_string(),
        },
        Rendition {
            height: 1440,
            video_bitrate: "8000k".to_string(),
        },
    ]
}

fn default_audio_bitrate() -> String {
    "128k".to_string()
}

fn default_stability_duration() -> u64 {
    10
}

fn default_poll_interval() -> u64 {
    2
}

fn default_prometheus_port() -> u16 {
    9090
}

fn default_true() -> bool {
    true
}

fn default_file_patterns() -> Vec<String> {
    vec!["*.mp4".to_string(), "*.mov".to_string()]
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg(),
            ffprobe_path: default_ffprobe(),
            output_root: None,
            hls_time: default_hls_time(),
            preset: default_preset(),
            renditions: default_renditions(),
            audio_bitrate: default_audio_bitrate(),
        }
    }
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            duration_seconds: default_stability_duration(),
            poll_interval_seconds: default_poll_interval(),
        }
    }
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_prometheus_port(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            recursive: true,
            file_patterns: default_file_patterns(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
global:
  upload_dir: /data/uploads/videos
  redis:
    host: redis
  storage:
    bucket: media
"#;

    #[test]
    fn minimal_config_fills_defaults() {
        let config: AppConfig = serde_yaml::from_str(MINIMAL).unwrap();

        assert_eq!(config.global.log_level, "info");
        assert_eq!(config.global.redis.url(), "redis://redis:6379/0");
        assert_eq!(config.global.storage.key_prefix, "videos-hls");
        assert_eq!(config.global.storage.region, "us-east-1");
        assert_eq!(config.global.transcoder.hls_time, 6);
        assert_eq!(config.global.transcoder.renditions.len(), 3);
        assert!(config.global.queue.job_timeout().is_none());
        assert!(config.watch.enabled);
        assert_eq!(config.watch.file_patterns, vec!["*.mp4", "*.mov"]);
    }

    #[test]
    fn redis_url_includes_password() {
        let redis = RedisConfig {
            host: "cache".to_string(),
            port: 6380,
            db: 2,
            password: Some("secret".to_string()),
        };
        assert_eq!(redis.url(), "redis://:secret@cache:6380/2");
    }

    #[test]
    fn credentials_are_not_serialized() {
        let mut config: AppConfig = serde_yaml::from_str(MINIMAL).unwrap();
        config.global.storage.secret_access_key = Some("hunter2".to_string());

        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(!yaml.contains("hunter2"));
    }

    #[test]
    fn job_timeout_converts_to_duration() {
        let queue = QueueConfig {
            job_timeout_seconds: Some(90),
        };
        assert_eq!(queue.job_timeout(), Some(Duration::from_secs(90)));
    }
}
