//! S3-compatible object storage backend.

use std::path::Path;

use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{Credentials, Region},
    error::{DisplayErrorContext, ProvideErrorMetadata},
    primitives::ByteStream,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::StorageBackend;
use crate::{Error, Result};

/// Connection settings for the object store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    /// Custom endpoint, e.g. a MinIO server. `None` for AWS.
    pub endpoint_url: Option<String>,
    pub region: String,
    pub force_path_style: bool,
    /// Create the bucket and make it publicly readable at startup.
    pub create_bucket_on_start: bool,
    pub lossy_prefix: String,
    pub lossless_prefix: String,
    /// Base URL artifacts are served from. Derived from the endpoint when unset.
    pub public_url: Option<String>,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            access_key: String::new(),
            secret_key: String::new(),
            bucket: "stems".to_string(),
            endpoint_url: None,
            region: "us-east-1".to_string(),
            force_path_style: true,
            create_bucket_on_start: false,
            lossy_prefix: String::new(),
            lossless_prefix: String::new(),
            public_url: None,
        }
    }
}

impl S3Config {
    /// Base URL under which objects of the bucket are reachable.
    pub fn public_base_url(&self) -> Option<String> {
        if let Some(url) = &self.public_url {
            return Some(url.trim_end_matches('/').to_string());
        }
        self.endpoint_url
            .as_ref()
            .map(|endpoint| format!("{}/{}", endpoint.trim_end_matches('/'), self.bucket))
    }
}

/// Bucket policy granting anonymous read on every object.
fn public_read_policy(bucket: &str) -> String {
    serde_json::json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Sid": "PublicRead",
            "Effect": "Allow",
            "Principal": "*",
            "Action": ["s3:GetObject"],
            "Resource": [format!("arn:aws:s3:::{bucket}/*")],
        }],
    })
    .to_string()
}

/// Object storage backend.
#[derive(Debug, Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
}

impl S3Storage {
    /// Build a client, check that the service answers, and optionally
    /// prepare the bucket.
    pub async fn connect(config: &S3Config) -> Result<Self> {
        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "glissando",
        );

        let mut builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .force_path_style(config.force_path_style)
            .behavior_version_latest();

        if let Some(endpoint) = &config.endpoint_url {
            builder = builder.endpoint_url(endpoint);
        }

        let storage = Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
        };

        storage
            .client
            .list_buckets()
            .send()
            .await
            .map_err(|e| {
                Error::storage(format!(
                    "object storage unreachable: {}",
                    DisplayErrorContext(&e)
                ))
            })?;

        if config.create_bucket_on_start {
            storage.ensure_bucket().await?;
        }

        info!(bucket = %storage.bucket, "Object storage initialized");
        Ok(storage)
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn ensure_bucket(&self) -> Result<()> {
        match self.client.create_bucket().bucket(&self.bucket).send().await {
            Ok(_) => {
                info!(bucket = %self.bucket, "Created bucket");
            }
            Err(e)
                if e.as_service_error()
                    .is_some_and(|se| se.is_bucket_already_owned_by_you()) =>
            {
                debug!(bucket = %self.bucket, "Bucket already exists");
                return Ok(());
            }
            Err(e) => {
                return Err(Error::storage(format!(
                    "failed to create bucket {}: {}",
                    self.bucket,
                    DisplayErrorContext(&e)
                )));
            }
        }

        self.client
            .put_bucket_policy()
            .bucket(&self.bucket)
            .policy(public_read_policy(&self.bucket))
            .send()
            .await
            .map_err(|e| {
                Error::storage(format!(
                    "failed to apply policy to bucket {}: {}",
                    self.bucket,
                    DisplayErrorContext(&e)
                ))
            })?;
        info!(bucket = %self.bucket, "Applied public-read bucket policy");
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for S3Storage {
    fn name(&self) -> &'static str {
        "s3"
    }

    fn is_local(&self) -> bool {
        false
    }

    async fn put(&self, source: &Path, key: &str, content_type: &str) -> Result<()> {
        let body = ByteStream::from_path(source)
            .await
            .map_err(|e| Error::storage(format!("cannot read {}: {e}", source.display())))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type(content_type)
            .content_disposition("attachment")
            .send()
            .await
            .map_err(|e| {
                Error::storage(format!("upload of {key} failed: {}", DisplayErrorContext(&e)))
            })?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match self
            .client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if matches!(e.code(), Some("NoSuchKey") | Some("NotFound")) => Ok(()),
            Err(e) => Err(Error::storage(format!(
                "delete of {key} failed: {}",
                DisplayErrorContext(&e)
            ))),
        }
    }
}
