//! Encoding job records.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Persisted lifecycle record of one submitted encoding job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodingJob {
    /// Unique identifier for this submission.
    pub id: String,

    /// Job name derived from the source file name.
    pub name: String,

    /// Path to the source video.
    pub source_path: PathBuf,

    /// Current status of the job.
    pub status: EncodingStatus,

    /// Failure reason if the job failed.
    #[serde(default)]
    pub message: Option<String>,

    /// Timestamp when the job was submitted.
    pub created_at: DateTime<Utc>,

    /// Timestamp of the last status change.
    pub updated_at: DateTime<Utc>,
}

impl EncodingJob {
    /// Creates a pending job for the given source, or `None` if no name can be derived.
    pub fn pending(source_path: PathBuf) -> Option<Self> {
        let name = derive_job_name(&source_path)?;
        let now = Utc::now();
        Some(Self {
            id: Uuid::new_v4().to_string(),
            name,
            source_path,
            status: EncodingStatus::Pending,
            message: None,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Status of an encoding job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodingStatus {
    /// Submitted, not yet started.
    Pending,
    /// Being transcoded or uploaded.
    Processing,
    /// Uploaded and local artifacts removed.
    Success,
    /// Transcode or upload failed. Local artifacts are kept.
    Failed,
}

impl EncodingStatus {
    /// Returns true for `Success` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    /// Returns true if a record may move from `self` to `next`.
    pub fn can_advance_to(self, next: EncodingStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Processing, Self::Success)
                | (Self::Processing, Self::Failed)
        )
    }
}

impl fmt::Display for EncodingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Derives the job name from a source path by stripping the trailing extension.
///
/// `/tmp/abc123.mp4` becomes `abc123` and `clip.final.mov` becomes `clip.final`.
/// Returns `None` when the path has no file name.
pub fn derive_job_name(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_string_lossy();
    if stem.is_empty() {
        None
    } else {
        Some(stem.into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_strips_only_the_last_extension() {
        assert_eq!(derive_job_name(Path::new("/tmp/abc123.mp4")).as_deref(), Some("abc123"));
        assert_eq!(
            derive_job_name(Path::new("uploads/clip.final.mov")).as_deref(),
            Some("clip.final")
        );
        assert_eq!(derive_job_name(Path::new("/videos/raw")).as_deref(), Some("raw"));
    }

    #[test]
    fn name_requires_a_file_name() {
        assert_eq!(derive_job_name(Path::new("/")), None);
        assert_eq!(derive_job_name(Path::new("")), None);
    }

    #[test]
    fn new_jobs_start_pending() {
        let job = EncodingJob::pending(PathBuf::from("/tmp/abc123.mp4")).unwrap();
        assert_eq!(job.name, "abc123");
        assert_eq!(job.status, EncodingStatus::Pending);
        assert_eq!(job.created_at, job.updated_at);
        assert!(job.message.is_none());
    }

    #[test]
    fn transitions_are_monotonic() {
        use EncodingStatus::*;

        assert!(Pending.can_advance_to(Processing));
        assert!(Processing.can_advance_to(Success));
        assert!(Processing.can_advance_to(Failed));

        assert!(!Pending.can_advance_to(Success));
        assert!(!Success.can_advance_to(Processing));
        assert!(!Failed.can_advance_to(Pending));
        assert!(!Processing.can_advance_to(Processing));

        assert!(Success.is_terminal() && Failed.is_terminal());
        assert!(!Pending.is_terminal() && !Processing.is_terminal());
    }

    #[test]
    fn status_serializes_in_snake_case() {
        let json = serde_json::to_string(&EncodingStatus::Processing).unwrap();
        assert_eq!(json, "\"processing\"");
    }
}
