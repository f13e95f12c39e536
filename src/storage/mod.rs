//! Object storage for encoded output.

pub mod s3;

use std::path::Path;

use async_trait::async_trait;

use crate::error::UploadError;
pub use s3::S3Uploader;

/// Stores a local file at a destination key and returns its public URL.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Uploader: Send + Sync {
    /// Uploads `local_path` to `key` with the given content type.
    async fn upload(
        &self,
        local_path: &Path,
        key: &str,
        content_type: &str,
    ) -> Result<String, UploadError>;
}

/// Returns the content type to store a file under.
pub fn content_type_for(path: &Path) -> String {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match ext.as_deref() {
        Some("m3u8") => "application/vnd.apple.mpegurl".to_string(),
        Some("ts") => "video/mp2t".to_string(),
        _ => mime_guess::from_path(path)
            .first_raw()
            .unwrap_or("application/octet-stream")
            .to_string(),
    }
}
