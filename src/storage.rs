use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;

use crate::config::AppConfig;

/// One object to write. Media rows own the metadata and carry the key used
/// for later removal.
pub struct ObjectPut {
    pub key: String,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub content_disposition: Option<String>,
}

/// Object-store seam. Removal is idempotent by key, so cleanup passes can be
/// re-run after a partial failure.
#[async_trait]
pub trait ObjectStorage: Send + Sync + 'static {
    async fn store(&self, put: ObjectPut) -> Result<()>;

    async fn presign(&self, key: &str, ttl: Duration) -> Result<String>;

    async fn remove(&self, key: &str) -> Result<()>;
}

pub struct S3Storage {
    client: S3Client,
    bucket: String,
}

impl S3Storage {
    /// Client wiring from config: custom endpoint and static credentials when
    /// provided (MinIO in development), path-style addressing always.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.aws_region.clone()));

        if let Some(endpoint) = &config.aws_endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        if let (Some(key_id), Some(secret)) = (
            config.aws_access_key_id.as_deref(),
            config.aws_secret_access_key.as_deref(),
        ) {
            loader =
                loader.credentials_provider(Credentials::new(key_id, secret, None, None, "static"));
        }

        let shared = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: S3Client::from_conf(s3_config),
            bucket: config.s3_bucket.clone(),
        })
    }
}

#[async_trait]
impl ObjectStorage for S3Storage {
    async fn store(&self, put: ObjectPut) -> Result<()> {
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&put.key)
            .body(ByteStream::from(put.body));
        if let Some(content_type) = put.content_type {
            request = request.content_type(content_type);
        }
        if let Some(disposition) = put.content_disposition {
            request = request.content_disposition(disposition);
        }

        request.send().await.context("S3 put_object failed")?;
        Ok(())
    }

    async fn presign(&self, key: &str, ttl: Duration) -> Result<String> {
        let presigning = PresigningConfig::expires_in(ttl).context("invalid presign TTL")?;
        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .context("S3 presign failed")?;
        Ok(presigned.uri().to_string())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .context("S3 delete_object failed")?;
        Ok(())
    }
}
