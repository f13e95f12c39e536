//! Persistence of encoding job status records.

pub mod job;
pub mod memory;
pub mod redis;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StatusStoreError;
pub use job::{derive_job_name, EncodingJob, EncodingStatus};
pub use memory::MemoryStatusStore;
pub use self::redis::RedisStatusStore;

/// Document store holding one record per submitted job.
///
/// Records are inserted once and only ever advanced along
/// `Pending -> Processing -> {Success | Failed}`. Nothing here deletes them.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Persists a new record.
    async fn insert(&self, job: &EncodingJob) -> Result<(), StatusStoreError>;

    /// Advances the record with the given id to `status`.
    async fn update_status(
        &self,
        id: &str,
        status: EncodingStatus,
        message: Option<String>,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StatusStoreError>;

    /// Returns the most recently inserted record with this name.
    async fn find_by_name(&self, name: &str) -> Result<Option<EncodingJob>, StatusStoreError>;

    /// Returns every record with this name, oldest first.
    async fn history(&self, name: &str) -> Result<Vec<EncodingJob>, StatusStoreError>;
}

/// Applies a status change to a record, enforcing monotonic transitions.
pub(crate) fn advance(
    job: &mut EncodingJob,
    status: EncodingStatus,
    message: Option<String>,
    updated_at: DateTime<Utc>,
) -> Result<(), StatusStoreError> {
    if !job.status.can_advance_to(status) {
        return Err(StatusStoreError::InvalidTransition {
            id: job.id.clone(),
            from: job.status,
            to: status,
        });
    }

    job.status = status;
    job.updated_at = updated_at;
    if message.is_some() {
        job.message = message;
    }
    Ok(())
}
