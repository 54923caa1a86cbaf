use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use chrono::{Duration as ChronoDuration, Utc};
use tracing::{debug, warn};

use crate::core::error::StorageError;
use crate::observability::metrics as obs;
use crate::storage::s3::S3Store;
use crate::storage::{key, StoredObject};

/// Default lifetime of content-addressed cache objects.
const CACHE_OBJECT_TTL_HOURS: i64 = 24;

// ---------------------------------------------------------------------------
// Persistent result cache over the object store
// ---------------------------------------------------------------------------

/// Content-addressed cache of transformed artifacts in a bucket, with an
/// explicit-location variant for caller-owned keys.
///
/// Reads are on the request path; writes are fire-and-forget from the
/// handler's perspective — callers spawn them and failures only log.
pub struct ObjectStoreCache {
    store: Arc<S3Store>,
}

impl ObjectStoreCache {
    pub fn new(store: Arc<S3Store>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S3Store> {
        &self.store
    }

    /// Look up a fingerprint at its content address. Returns `None` on
    /// miss; backend failures are logged and reported as misses.
    pub async fn get(&self, fingerprint: &str) -> Option<StoredObject> {
        let address = key::content_address(fingerprint);
        let start = Instant::now();
        match self.store.get_object(&address).await {
            Ok(object) => {
                obs::inc_cache_hit("s3");
                obs::record_storage_get_duration(start.elapsed().as_secs_f64());
                Some(object)
            }
            Err(StorageError::NotFound { .. }) => {
                obs::inc_cache_miss("s3");
                None
            }
            Err(e) => {
                warn!(error = %e, "object-store cache read failed");
                obs::inc_cache_miss("s3");
                None
            }
        }
    }

    /// Write a fingerprint's artifact at its content address with the
    /// default expiration.
    pub async fn put(&self, fingerprint: &str, body: Bytes, content_type: &str) {
        let address = key::content_address(fingerprint);
        let expires = Utc::now() + ChronoDuration::hours(CACHE_OBJECT_TTL_HOURS);
        let start = Instant::now();
        match self
            .store
            .put_object(&address, body, content_type, Some(expires))
            .await
        {
            Ok(()) => {
                obs::record_storage_put_duration(start.elapsed().as_secs_f64());
                debug!(address, "artifact cached in object store");
            }
            Err(e) => warn!(address, error = %e, "object-store cache write failed"),
        }
    }

    /// Read from a caller-owned key.
    pub async fn get_at_location(&self, location: &str) -> Result<StoredObject, StorageError> {
        let start = Instant::now();
        let object = self.store.get_object(location).await?;
        obs::record_storage_get_duration(start.elapsed().as_secs_f64());
        Ok(object)
    }

    /// Write to a caller-owned key, optionally with an expiration.
    pub async fn put_at_location(
        &self,
        location: &str,
        body: Bytes,
        content_type: &str,
        expires_at: Option<chrono::DateTime<Utc>>,
    ) -> Result<(), StorageError> {
        let start = Instant::now();
        self.store
            .put_object(location, body, content_type, expires_at)
            .await?;
        obs::record_storage_put_duration(start.elapsed().as_secs_f64());
        Ok(())
    }
}
