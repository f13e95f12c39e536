//! Video transcoding into HLS.

pub mod ffmpeg;

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::TranscodeError;
pub use ffmpeg::FfmpegHlsTranscoder;

/// Turns a source video into a directory of encoded files.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Encodes `source` and returns the directory holding every produced file.
    ///
    /// May run for minutes. The caller imposes any deadline.
    async fn encode(&self, source: &Path) -> Result<PathBuf, TranscodeError>;
}
