//! S3-compatible object storage.

use super::BlobStore;
use crate::error::IngestError;
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;
use tracing::{debug, info};

/// Bucket location and URL shape.
#[derive(Debug, Clone, Default)]
pub struct S3Config {
    pub bucket: String,
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible stores (MinIO, R2, LocalStack).
    pub endpoint_url: Option<String>,
    /// Base used for returned URLs instead of the virtual-hosted AWS form.
    pub public_base_url: Option<String>,
}

impl S3Config {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            ..Default::default()
        }
    }

    /// Read `AWS_S3_BUCKET_NAME`, `AWS_REGION`, `AWS_S3_ENDPOINT` and
    /// `AWS_S3_PUBLIC_URL`. Credentials come from the standard AWS chain.
    pub fn from_env() -> Result<Self, IngestError> {
        let bucket = std::env::var("AWS_S3_BUCKET_NAME")
            .ok()
            .filter(|b| !b.is_empty())
            .ok_or_else(|| {
                IngestError::InvalidConfig(
                    "AWS_S3_BUCKET_NAME is not set; pass --bucket or export it".into(),
                )
            })?;
        Ok(Self {
            bucket,
            region: std::env::var("AWS_REGION").ok().filter(|v| !v.is_empty()),
            endpoint_url: std::env::var("AWS_S3_ENDPOINT").ok().filter(|v| !v.is_empty()),
            public_base_url: std::env::var("AWS_S3_PUBLIC_URL")
                .ok()
                .filter(|v| !v.is_empty()),
        })
    }

    /// Public URL of `key` under this configuration.
    pub fn object_url(&self, key: &str) -> String {
        if let Some(base) = &self.public_base_url {
            return format!("{}/{}", base.trim_end_matches('/'), key);
        }
        if let Some(endpoint) = &self.endpoint_url {
            return format!("{}/{}/{}", endpoint.trim_end_matches('/'), self.bucket, key);
        }
        match &self.region {
            Some(region) => format!("https://{}.s3.{}.amazonaws.com/{}", self.bucket, region, key),
            None => format!("https://{}.s3.amazonaws.com/{}", self.bucket, key),
        }
    }
}

/// [`BlobStore`] backed by `aws-sdk-s3`.
#[derive(Debug, Clone)]
pub struct S3Store {
    client: aws_sdk_s3::Client,
    config: S3Config,
}

impl S3Store {
    /// Build a client from the AWS default provider chain plus `config`.
    pub async fn connect(config: S3Config) -> Result<Self, IngestError> {
        if config.bucket.trim().is_empty() {
            return Err(IngestError::InvalidConfig("S3 bucket name is empty".into()));
        }
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(aws_sdk_s3::config::Region::new(region.clone()));
        }
        if let Some(endpoint) = &config.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.endpoint_url.is_some())
            .build();
        info!("S3 store ready: bucket={}", config.bucket);
        Ok(Self {
            client: aws_sdk_s3::Client::from_conf(s3_config),
            config,
        })
    }

    /// Wrap an already-built client.
    pub fn with_client(client: aws_sdk_s3::Client, config: S3Config) -> Self {
        Self { client, config }
    }

    pub fn bucket(&self) -> &str {
        &self.config.bucket
    }
}

/// Prefix remote failures so credential problems stand out in the message.
fn describe_remote_error(message: String) -> String {
    let lower = message.to_ascii_lowercase();
    if lower.contains("credential")
        || lower.contains("accessdenied")
        || lower.contains("signature")
        || lower.contains("forbidden")
        || lower.contains("403")
    {
        format!("access denied: {message}")
    } else {
        message
    }
}

#[async_trait]
impl BlobStore for S3Store {
    fn name(&self) -> &str {
        "s3"
    }

    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        public: bool,
    ) -> Result<String, IngestError> {
        let len = bytes.len();
        let mut req = self
            .client
            .put_object()
            .bucket(&self.config.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(bytes));
        if public {
            req = req.acl(ObjectCannedAcl::PublicRead);
        }
        req.send().await.map_err(|e| IngestError::StorageWrite {
            key: key.to_string(),
            detail: describe_remote_error(e.to_string()),
        })?;
        debug!("put s3://{}/{} ({} bytes)", self.config.bucket, key, len);
        Ok(self.url_for(key))
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, IngestError> {
        let out = self
            .client
            .get_object()
            .bucket(&self.config.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| IngestError::StorageRead {
                key: key.to_string(),
                detail: describe_remote_error(e.to_string()),
            })?;
        let bytes = out.body.collect().await.map_err(|e| IngestError::StorageRead {
            key: key.to_string(),
            detail: e.to_string(),
        })?;
        Ok(bytes.into_bytes().to_vec())
    }

    async fn health_check(&self) -> Result<(), IngestError> {
        self.client
            .head_bucket()
            .bucket(&self.config.bucket)
            .send()
            .await
            .map_err(|e| IngestError::StorageRead {
                key: self.config.bucket.clone(),
                detail: describe_remote_error(e.to_string()),
            })?;
        info!("S3 bucket '{}' reachable", self.config.bucket);
        Ok(())
    }

    fn url_for(&self, key: &str) -> String {
        self.config.object_url(key)
    }
}
