//! Error types for the encoding queue.

use std::path::PathBuf;
use thiserror::Error;

use crate::status::EncodingStatus;

/// Top-level application errors.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Status store error: {0}")]
    StatusStore(#[from] StatusStoreError),
}

/// Configuration loading and parsing errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {message}")]
    ParseFailed { path: PathBuf, message: String },

    #[error("Config validation failed with {error_count} error(s)")]
    ValidationFailed { error_count: usize },

    #[error("Missing required setting '{field}'")]
    Missing { field: String },
}

/// Job status persistence errors.
#[derive(Error, Debug)]
pub enum StatusStoreError {
    #[error("Failed to connect to Redis at '{url}': {message}")]
    ConnectionFailed { url: String, message: String },

    #[error("Status store command failed: {0}")]
    CommandFailed(String),

    #[error("Failed to serialize job record: {0}")]
    SerializationFailed(String),

    #[error("Job record not found: {id}")]
    NotFound { id: String },

    #[error("Job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: EncodingStatus,
        to: EncodingStatus,
    },
}

/// Transcoding errors. None of these are retried.
#[derive(Error, Debug)]
pub enum TranscodeError {
    #[error("Source file not found: {0}")]
    SourceMissing(PathBuf),

    #[error("ffprobe failed for '{path}': {message}")]
    ProbeFailed { path: PathBuf, message: String },

    #[error("Source '{0}' has no video stream")]
    NoVideoStream(PathBuf),

    #[error("FFmpeg failed with exit code {code}: {stderr}")]
    FfmpegFailed { code: i32, stderr: String },

    #[error("Process spawn failed: {0}")]
    SpawnFailed(String),

    #[error("Failed to prepare output directory '{path}': {source}")]
    OutputDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Object storage upload errors.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Failed to read '{path}': {message}")]
    ReadFailed { path: PathBuf, message: String },

    #[error("Upload of '{key}' failed: {message}")]
    PutFailed { key: String, message: String },
}

/// Errors raised inside the transcode, enumerate, and upload pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Transcode(#[from] TranscodeError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error("Failed to enumerate '{path}': {message}")]
    Enumerate { path: PathBuf, message: String },

    #[error("Transcoder produced no files in '{0}'")]
    NoOutput(PathBuf),

    #[error("Job timed out after {seconds} seconds")]
    TimedOut { seconds: u64 },

    #[error("Job panicked: {0}")]
    Panicked(String),
}

/// Errors returned to callers of the encoding queue.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Cannot derive a job name from '{0}'")]
    InvalidSource(PathBuf),

    #[error("Failed to record pending job: {0}")]
    Persist(#[from] StatusStoreError),
}

/// File watcher errors.
#[derive(Error, Debug)]
pub enum WatcherError {
    #[error("Failed to watch directory '{path}': {message}")]
    WatchFailed { path: PathBuf, message: String },

    #[error("Notify error: {0}")]
    Notify(#[from] notify::Error),
}

/// Metrics errors.
#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("Prometheus metrics export failed: {0}")]
    PrometheusFailed(String),
}
