use std::time::Duration;

use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::core::config::S3Config;
use crate::core::error::StorageError;
use crate::storage::{key, ObjectMeta, StoredObject};

// ---------------------------------------------------------------------------
// Retry constants
// ---------------------------------------------------------------------------

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 100;

/// Default region for S3-compatible stores addressed by explicit endpoint.
const DEFAULT_REGION: &str = "us-east-1";

// ---------------------------------------------------------------------------
// S3Store
// ---------------------------------------------------------------------------

/// Object-store client wrapping `aws-sdk-s3`.
///
/// Works against AWS S3 and S3-compatible stores (MinIO, Spaces, …) via a
/// configurable endpoint with path-style addressing. Every key passed to
/// the public methods is joined with the configured prefix.
pub struct S3Store {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3Store {
    pub fn new(config: &S3Config) -> Self {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "mediaproxy-config",
        );

        let scheme = if config.ssl { "https" } else { "http" };
        let endpoint_url = if config.endpoint.contains("://") {
            config.endpoint.clone()
        } else {
            format!("{}://{}", scheme, config.endpoint)
        };

        let s3_config = aws_sdk_s3::Config::builder()
            .region(Region::new(DEFAULT_REGION))
            .credentials_provider(credentials)
            .endpoint_url(endpoint_url)
            .force_path_style(true)
            .build();

        Self {
            client: Client::from_conf(s3_config),
            bucket: config.bucket.clone(),
            prefix: config.prefix.clone(),
        }
    }

    fn full_key(&self, object_key: &str) -> String {
        key::prefixed(&self.prefix, object_key)
    }

    /// Read a whole object.
    pub async fn get_object(&self, object_key: &str) -> Result<StoredObject, StorageError> {
        let full_key = self.full_key(object_key);

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let backoff = Duration::from_millis(INITIAL_BACKOFF_MS * (1 << (attempt - 1)));
                debug!(key = %full_key, attempt, "retrying S3 GET");
                tokio::time::sleep(backoff).await;
            }

            match self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(&full_key)
                .send()
                .await
            {
                Ok(output) => {
                    let content_type = output
                        .content_type
                        .unwrap_or_else(|| "application/octet-stream".to_string());
                    let etag = output.e_tag.unwrap_or_default();
                    let body = output.body.collect().await.map_err(|e| {
                        StorageError::OperationFailed {
                            operation: "get",
                            path: full_key.clone(),
                            reason: e.to_string(),
                        }
                    })?;
                    return Ok(StoredObject {
                        body: body.into_bytes(),
                        content_type,
                        etag,
                    });
                }
                Err(e) => {
                    let service_err = e.into_service_error();
                    if service_err.is_no_such_key() {
                        return Err(StorageError::NotFound { path: full_key });
                    }
                    let reason = service_err.to_string();
                    if reason.contains("403") || reason.contains("Forbidden") {
                        return Err(StorageError::OperationFailed {
                            operation: "get",
                            path: full_key,
                            reason,
                        });
                    }
                    warn!(key = %full_key, attempt, error = %reason, "S3 GET failed");
                    crate::observability::metrics::inc_storage_retry("get");
                }
            }
        }

        Err(StorageError::RetriesExhausted { path: full_key })
    }

    /// Write an object, with an optional advisory expiration timestamp.
    pub async fn put_object(
        &self,
        object_key: &str,
        body: Bytes,
        content_type: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), StorageError> {
        let full_key = self.full_key(object_key);

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let backoff = Duration::from_millis(INITIAL_BACKOFF_MS * (1 << (attempt - 1)));
                debug!(key = %full_key, attempt, "retrying S3 PUT");
                tokio::time::sleep(backoff).await;
            }

            let mut request = self
                .client
                .put_object()
                .bucket(&self.bucket)
                .key(&full_key)
                .body(ByteStream::from(body.clone()))
                .content_type(content_type);
            if let Some(expires) = expires_at {
                request = request.expires(aws_sdk_s3::primitives::DateTime::from_secs(
                    expires.timestamp(),
                ));
            }

            match request.send().await {
                Ok(_) => return Ok(()),
                Err(e) => {
                    let reason = e.into_service_error().to_string();
                    // 403 means misconfigured credentials; retrying won't help.
                    if reason.contains("403") || reason.contains("Forbidden") {
                        return Err(StorageError::OperationFailed {
                            operation: "put",
                            path: full_key,
                            reason,
                        });
                    }
                    warn!(key = %full_key, attempt, error = %reason, "S3 PUT failed");
                    crate::observability::metrics::inc_storage_retry("put");
                }
            }
        }

        Err(StorageError::RetriesExhausted { path: full_key })
    }

    /// HEAD an object: size and content type without the body.
    pub async fn head_object(&self, object_key: &str) -> Result<ObjectMeta, StorageError> {
        let full_key = self.full_key(object_key);

        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .send()
            .await
        {
            Ok(output) => Ok(ObjectMeta {
                content_length: output.content_length.unwrap_or(0) as u64,
                content_type: output
                    .content_type
                    .unwrap_or_else(|| "application/octet-stream".to_string()),
                etag: output.e_tag.unwrap_or_default(),
                last_modified: output
                    .last_modified
                    .and_then(|t| DateTime::from_timestamp(t.secs(), t.subsec_nanos()))
                    .unwrap_or_else(Utc::now),
            }),
            Err(e) => {
                let service_err = e.into_service_error();
                if service_err.is_not_found() {
                    return Err(StorageError::NotFound { path: full_key });
                }
                Err(StorageError::OperationFailed {
                    operation: "head",
                    path: full_key,
                    reason: service_err.to_string(),
                })
            }
        }
    }

    /// Ranged (or full) GET returning the SDK's streaming body, for the
    /// range-aware proxy. `range` bounds are inclusive byte offsets.
    pub async fn get_object_stream(
        &self,
        object_key: &str,
        range: Option<(u64, u64)>,
    ) -> Result<ByteStream, StorageError> {
        let full_key = self.full_key(object_key);

        let mut request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&full_key);
        if let Some((start, end)) = range {
            request = request.range(format!("bytes={}-{}", start, end));
        }

        match request.send().await {
            Ok(output) => Ok(output.body),
            Err(e) => {
                let service_err = e.into_service_error();
                if service_err.is_no_such_key() {
                    return Err(StorageError::NotFound { path: full_key });
                }
                Err(StorageError::OperationFailed {
                    operation: "get",
                    path: full_key,
                    reason: service_err.to_string(),
                })
            }
        }
    }

    /// Presigned GET URL, for handing object-store sources to the frame
    /// extractor.
    pub async fn presigned_get_url(
        &self,
        object_key: &str,
        expires_in: Duration,
    ) -> Result<String, StorageError> {
        let full_key = self.full_key(object_key);

        let presigning = PresigningConfig::expires_in(expires_in).map_err(|e| {
            StorageError::OperationFailed {
                operation: "presign",
                path: full_key.clone(),
                reason: e.to_string(),
            }
        })?;

        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .presigned(presigning)
            .await
            .map_err(|e| StorageError::OperationFailed {
                operation: "presign",
                path: full_key,
                reason: e.to_string(),
            })?;

        Ok(request.uri().to_string())
    }
}
