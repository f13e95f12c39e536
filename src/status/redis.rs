//! Redis-backed status store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;

use super::{advance, EncodingJob, EncodingStatus, StatusStore};
use crate::error::StatusStoreError;

const JOB_PREFIX: &str = "video_status:job:";
const NAME_PREFIX: &str = "video_status:name:";

/// Stores job records as JSON documents in Redis.
///
/// Each record lives at `video_status:job:{id}`. A per-name list at
/// `video_status:name:{name}` keeps the ids in insertion order.
#[derive(Clone)]
pub struct RedisStatusStore {
    connection: redis::aio::ConnectionManager,
}

impl RedisStatusStore {
    /// Creates a store connected to the specified Redis URL.
    pub async fn new(redis_url: &str) -> Result<Self, StatusStoreError> {
        let client = redis::Client::open(redis_url).map_err(|e| {
            StatusStoreError::ConnectionFailed {
                url: redis_url.to_string(),
                message: e.to_string(),
            }
        })?;

        let connection = client
            .get_connection_manager()
            .await
            .map_err(|e| StatusStoreError::ConnectionFailed {
                url: redis_url.to_string(),
                message: e.to_string(),
            })?;

        Ok(Self { connection })
    }

    async fn get_job(&self, id: &str) -> Result<Option<EncodingJob>, StatusStoreError> {
        let mut conn = self.connection.clone();
        let json: Option<String> = conn
            .get(job_key(id))
            .await
            .map_err(|e| StatusStoreError::CommandFailed(e.to_string()))?;

        json.map(|json| {
            serde_json::from_str(&json)
                .map_err(|e| StatusStoreError::SerializationFailed(e.to_string()))
        })
        .transpose()
    }

    async fn put_job(&self, job: &EncodingJob) -> Result<(), StatusStoreError> {
        let json = serde_json::to_string(job)
            .map_err(|e| StatusStoreError::SerializationFailed(e.to_string()))?;

        let mut conn = self.connection.clone();
        conn.set::<_, _, ()>(job_key(&job.id), json)
            .await
            .map_err(|e| StatusStoreError::CommandFailed(e.to_string()))
    }
}

#[async_trait]
impl StatusStore for RedisStatusStore {
    async fn insert(&self, job: &EncodingJob) -> Result<(), StatusStoreError> {
        self.put_job(job).await?;

        let mut conn = self.connection.clone();
        conn.rpush::<_, _, ()>(name_key(&job.name), &job.id)
            .await
            .map_err(|e| StatusStoreError::CommandFailed(e.to_string()))
    }

    async fn update_status(
        &self,
        id: &str,
        status: EncodingStatus,
        message: Option<String>,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StatusStoreError> {
        let mut job = self
            .get_job(id)
            .await?
            .ok_or_else(|| StatusStoreError::NotFound { id: id.to_string() })?;

        advance(&mut job, status, message, updated_at)?;
        self.put_job(&job).await
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<EncodingJob>, StatusStoreError> {
        let mut conn = self.connection.clone();
        let id: Option<String> = conn
            .lindex(name_key(name), -1)
            .await
            .map_err(|e| StatusStoreError::CommandFailed(e.to_string()))?;

        match id {
            Some(id) => self.get_job(&id).await,
            None => Ok(None),
        }
    }

    async fn history(&self, name: &str) -> Result<Vec<EncodingJob>, StatusStoreError> {
        let mut conn = self.connection.clone();
        let ids: Vec<String> = conn
            .lrange(name_key(name), 0, -1)
            .await
            .map_err(|e| StatusStoreError::CommandFailed(e.to_string()))?;

        let mut jobs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(job) = self.get_job(&id).await? {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }
}

fn job_key(id: &str) -> String {
    format!("{}{}", JOB_PREFIX, id)
}

fn name_key(name: &str) -> String {
    format!("{}{}", NAME_PREFIX, name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced() {
        assert_eq!(job_key("42"), "video_status:job:42");
        assert_eq!(name_key("abc123"), "video_status:name:abc123");
    }
}
