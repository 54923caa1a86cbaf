pub mod key;
pub mod memory;
pub mod object_cache;
pub mod s3;
pub mod session;

use bytes::Bytes;
use chrono::{DateTime, Utc};

// ---------------------------------------------------------------------------
// Storage types
// ---------------------------------------------------------------------------

/// A fully materialized object read from the store.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub body: Bytes,
    pub content_type: String,
    pub etag: String,
}

/// Metadata from a HEAD operation, enough for range computations.
#[derive(Debug, Clone)]
pub struct ObjectMeta {
    pub content_length: u64,
    pub content_type: String,
    pub etag: String,
    pub last_modified: DateTime<Utc>,
}
