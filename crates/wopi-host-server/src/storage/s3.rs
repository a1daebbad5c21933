use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use tracing::{debug, instrument};
use wopi_host_core::{mime_type_for, ObjectHead, StorageError, StorageGateway};

use crate::config::Config;

/// Storage gateway over an S3 (or S3-compatible) bucket.
///
/// Document identities are used verbatim as object keys.
#[derive(Clone)]
pub struct S3Storage {
    s3_client: S3Client,
    bucket_name: String,
}

impl S3Storage {
    /// Create a new S3Storage backend.
    pub fn new(s3_client: S3Client, bucket_name: String) -> Self {
        Self {
            s3_client,
            bucket_name,
        }
    }

    /// Build a client from the default AWS provider chain, overridden by `config`.
    pub async fn from_config(config: &Config, bucket_name: String) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &config.aws_region {
            loader = loader.region(Region::new(region.clone()));
        }
        let sdk_config = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.s3_force_path_style);
        if let Some(endpoint) = &config.s3_endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        Self::new(S3Client::from_conf(builder.build()), bucket_name)
    }

    pub fn bucket_name(&self) -> &str {
        &self.bucket_name
    }
}

#[async_trait]
impl StorageGateway for S3Storage {
    fn backend_name(&self) -> &'static str {
        "s3"
    }

    #[instrument(skip(self), level = "debug")]
    async fn head(&self, id: &str) -> Result<Option<ObjectHead>, StorageError> {
        let result = self
            .s3_client
            .head_object()
            .bucket(&self.bucket_name)
            .key(id)
            .send()
            .await;

        match result {
            Ok(output) => {
                let size_bytes = output.content_length.unwrap_or(0).max(0) as u64;
                let last_modified = output
                    .last_modified
                    .and_then(|dt| chrono::DateTime::from_timestamp(dt.secs(), dt.subsec_nanos()))
                    .unwrap_or_default();
                Ok(Some(ObjectHead {
                    size_bytes,
                    last_modified,
                    etag: output.e_tag,
                }))
            }
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_not_found() {
                    Ok(None)
                } else {
                    Err(StorageError::Io(format!(
                        "S3 head_object error: {}",
                        service_error
                    )))
                }
            }
        }
    }

    #[instrument(skip(self), level = "debug")]
    async fn get(&self, id: &str) -> Result<Option<Bytes>, StorageError> {
        let result = self
            .s3_client
            .get_object()
            .bucket(&self.bucket_name)
            .key(id)
            .send()
            .await;

        match result {
            Ok(output) => {
                let bytes = output
                    .body
                    .collect()
                    .await
                    .map_err(|e| StorageError::Io(format!("Failed to read S3 object body: {}", e)))?
                    .into_bytes();
                debug!("Loaded {} from S3 ({} bytes)", id, bytes.len());
                Ok(Some(bytes))
            }
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_no_such_key() {
                    Ok(None)
                } else {
                    Err(StorageError::Io(format!(
                        "S3 get_object error: {}",
                        service_error
                    )))
                }
            }
        }
    }

    #[instrument(skip(self, data), level = "debug", fields(data_len = data.len()))]
    async fn put(&self, id: &str, data: Bytes) -> Result<(), StorageError> {
        let size = data.len();
        self.s3_client
            .put_object()
            .bucket(&self.bucket_name)
            .key(id)
            .content_type(mime_type_for(id))
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| StorageError::Io(format!("S3 put_object error: {}", e)))?;
        debug!("Saved {} to S3 ({} bytes)", id, size);
        Ok(())
    }
}
