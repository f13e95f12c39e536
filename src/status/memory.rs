//! In-process status store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{advance, EncodingJob, EncodingStatus, StatusStore};
use crate::error::StatusStoreError;

/// Keeps job records in memory, in insertion order.
#[derive(Debug, Default)]
pub struct MemoryStatusStore {
    records: RwLock<Vec<EncodingJob>>,
}

impl MemoryStatusStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every record, oldest first.
    pub async fn all(&self) -> Vec<EncodingJob> {
        self.records.read().await.clone()
    }

    /// Returns the records currently in the given status.
    pub async fn with_status(&self, status: EncodingStatus) -> Vec<EncodingJob> {
        self.records
            .read()
            .await
            .iter()
            .filter(|job| job.status == status)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn insert(&self, job: &EncodingJob) -> Result<(), StatusStoreError> {
        self.records.write().await.push(job.clone());
        Ok(())
    }

    async fn update_status(
        &self,
        id: &str,
        status: EncodingStatus,
        message: Option<String>,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StatusStoreError> {
        let mut records = self.records.write().await;
        let job = records
            .iter_mut()
            .find(|job| job.id == id)
            .ok_or_else(|| StatusStoreError::NotFound { id: id.to_string() })?;
        advance(job, status, message, updated_at)
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<EncodingJob>, StatusStoreError> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .rev()
            .find(|job| job.name == name)
            .cloned())
    }

    async fn history(&self, name: &str) -> Result<Vec<EncodingJob>, StatusStoreError> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|job| job.name == name)
            .cloned()
            .collect())
    }
}
