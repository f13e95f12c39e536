//! S3-compatible uploader.

use std::path::Path;

use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Builder, Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::{debug, info};

use super::Uploader;
use crate::config::model::StorageConfig;
use crate::error::{ConfigError, UploadError};

/// Uploads files to an S3 bucket (or a MinIO endpoint).
#[derive(Clone)]
pub struct S3Uploader {
    client: Client,
    bucket: String,
    public_base_url: String,
}

impl S3Uploader {
    /// Builds a client from the storage settings.
    ///
    /// Credentials come from the config file, falling back to
    /// `AWS_ACCESS_KEY_ID` and `AWS_SECRET_ACCESS_KEY`.
    pub fn new(config: &StorageConfig) -> Result<Self, ConfigError> {
        let access_key = config
            .access_key_id
            .clone()
            .or_else(|| std::env::var("AWS_ACCESS_KEY_ID").ok())
            .ok_or_else(|| ConfigError::Missing {
                field: "global.storage.access_key_id".to_string(),
            })?;
        let secret_key = config
            .secret_access_key
            .clone()
            .or_else(|| std::env::var("AWS_SECRET_ACCESS_KEY").ok())
            .ok_or_else(|| ConfigError::Missing {
                field: "global.storage.secret_access_key".to_string(),
            })?;

        let credentials = Credentials::new(access_key, secret_key, None, None, "static");

        let mut builder = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials);

        if let Some(endpoint) = &config.endpoint {
            // Path-style addressing is required by MinIO
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        let client = Client::from_conf(builder.build());

        info!(bucket = %config.bucket, region = %config.region, "S3 uploader configured");

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            public_base_url: public_base_url(config),
        })
    }

    /// Returns the public URL an object key will be served from.
    pub fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url, key)
    }
}

#[async_trait]
impl Uploader for S3Uploader {
    async fn upload(
        &self,
        local_path: &Path,
        key: &str,
        content_type: &str,
    ) -> Result<String, UploadError> {
        let body = ByteStream::from_path(local_path)
            .await
            .map_err(|e| UploadError::ReadFailed {
                path: local_path.to_path_buf(),
                message: e.to_string(),
            })?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| UploadError::PutFailed {
                key: key.to_string(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        debug!(key, content_type, "Uploaded object");
        Ok(self.public_url(key))
    }
}

/// Resolves the base URL objects are publicly reachable under.
fn public_base_url(config: &StorageConfig) -> String {
    match &config.public_base_url {
        Some(url) => url.trim_end_matches('/').to_string(),
        None => match &config.endpoint {
            Some(endpoint) => format!("{}/{}", endpoint.trim_end_matches('/'), config.bucket),
            None => format!("https://{}.s3.{}.amazonaws.com", config.bucket, config.region),
        },
    }
}
