//! S3-compatible object store.
//!
//! The bucket is addressed either by an explicit `BUCKET_NAME` (the
//! endpoint is then used as-is with path-style requests) or by a
//! virtual-hosted endpoint such as `https://media.s3.eu-west-1.amazonaws.com`,
//! whose first host label is the bucket name. Uploaded objects are
//! returned as presigned GET URLs.

use std::time::Duration;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use comfyjob_core::config::StorageConfig;

use crate::store::{object_key, ObjectStore, StorageError};

/// Lifetime of the returned download URLs (7 days, the SigV4 maximum).
pub const PRESIGN_EXPIRY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Where the bucket lives and how to address it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketLocation {
    /// Service endpoint without the bucket label.
    pub endpoint: String,
    pub bucket: String,
    /// Put the bucket in the path instead of the host name.
    pub path_style: bool,
}

impl BucketLocation {
    /// Derive the bucket location from the storage settings.
    pub fn from_config(config: &StorageConfig) -> Result<Self, StorageError> {
        if let Some(bucket) = &config.bucket_name {
            return Ok(Self {
                endpoint: config.endpoint_url.trim_end_matches('/').to_string(),
                bucket: bucket.clone(),
                path_style: true,
            });
        }

        let url = reqwest::Url::parse(&config.endpoint_url).map_err(|e| {
            StorageError::Config(format!("Invalid endpoint '{}': {e}", config.endpoint_url))
        })?;
        let host = url
            .host_str()
            .ok_or_else(|| StorageError::Config(format!("Endpoint '{url}' has no host")))?;
        let (bucket, service_host) = host
            .split_once('.')
            .filter(|(bucket, rest)| !bucket.is_empty() && rest.contains('.'))
            .ok_or_else(|| {
                StorageError::Config(format!(
                    "Cannot derive a bucket name from '{host}'; set BUCKET_NAME"
                ))
            })?;

        let endpoint = match url.port() {
            Some(port) => format!("{}://{service_host}:{port}", url.scheme()),
            None => format!("{}://{service_host}", url.scheme()),
        };

        Ok(Self {
            endpoint,
            bucket: bucket.to_string(),
            path_style: false,
        })
    }
}

/// [`ObjectStore`] backed by an S3-compatible bucket.
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
    location: BucketLocation,
}

impl S3ObjectStore {
    /// Build the SDK client from the storage settings.
    ///
    /// Static credentials are used when both keys are configured;
    /// otherwise the default AWS credential chain applies.
    pub async fn from_config(config: &StorageConfig) -> Result<Self, StorageError> {
        let location = BucketLocation::from_config(config)?;

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .endpoint_url(&location.endpoint);

        if let (Some(access_key), Some(secret_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            loader = loader.credentials_provider(Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "comfyjob-environment",
            ));
        }

        let sdk_config = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(location.path_style)
            .build();

        tracing::info!(
            bucket = %location.bucket,
            endpoint = %location.endpoint,
            "Object storage configured",
        );

        Ok(Self {
            client: aws_sdk_s3::Client::from_conf(s3_config),
            location,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.location.bucket
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(
        &self,
        prefix: &str,
        file_name: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StorageError> {
        let key = object_key(prefix, file_name);
        let size = bytes.len();

        self.client
            .put_object()
            .bucket(&self.location.bucket)
            .key(&key)
            .body(ByteStream::from(bytes))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::Upload {
                key: key.clone(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        let presigning = PresigningConfig::expires_in(PRESIGN_EXPIRY).map_err(|e| {
            StorageError::Presign {
                key: key.clone(),
                message: e.to_string(),
            }
        })?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.location.bucket)
            .key(&key)
            .presigned(presigning)
            .await
            .map_err(|e| StorageError::Presign {
                key: key.clone(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        tracing::info!(bucket = %self.location.bucket, key = %key, size, "Artifact uploaded");

        Ok(presigned.uri().to_string())
    }
}
