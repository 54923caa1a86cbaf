use std::collections::BTreeSet;
use std::future::Future;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::RngCore;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::core::error::SessionError;
use crate::core::security::UPLOAD_SESSION_MAX_TTL_SECS;

/// State-store key prefix for upload sessions.
const UPLOAD_KEY_PREFIX: &str = "upload:";

// ---------------------------------------------------------------------------
// Upload session model
// ---------------------------------------------------------------------------

/// One enumerated part of a multi-part upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadPart {
    pub index: u32,
    pub offset: u64,
    pub size: u64,
}

/// Server-owned record of an in-progress multi-part upload.
///
/// Wire format is camelCase JSON; uploaded part indices live in a separate
/// set so concurrent part uploads never race on this record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSession {
    pub upload_id: String,
    /// Per-session bearer token authorizing part writes.
    pub upload_token: String,
    pub location: String,
    pub total_size: u64,
    pub chunk_size: u64,
    pub parts_count: u32,
    pub parts: Vec<UploadPart>,
    pub content_type: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl UploadSession {
    /// Plan a new session: fresh id and token, enumerated parts, expiry
    /// capped at 24 hours past creation.
    pub fn plan(
        location: String,
        total_size: u64,
        chunk_size: u64,
        content_type: String,
        deadline: DateTime<Utc>,
    ) -> Self {
        let created_at = Utc::now();
        let cap = created_at + ChronoDuration::seconds(UPLOAD_SESSION_MAX_TTL_SECS as i64);
        let expires_at = deadline.min(cap);
        let parts = plan_parts(total_size, chunk_size);

        Self {
            upload_id: Uuid::new_v4().to_string(),
            upload_token: generate_upload_token(),
            location,
            total_size,
            chunk_size,
            parts_count: parts.len() as u32,
            parts,
            content_type,
            created_at,
            expires_at,
        }
    }

    /// Seconds until expiry, floored at zero.
    pub fn ttl_secs(&self) -> u64 {
        (self.expires_at - Utc::now()).num_seconds().max(0) as u64
    }

    /// Object-store key for one part: `<location>.part<index>`.
    pub fn part_key(&self, index: u32) -> String {
        format!("{}.part{}", self.location, index)
    }
}

/// Enumerate parts: fixed-size chunks with a short tail.
pub fn plan_parts(total_size: u64, chunk_size: u64) -> Vec<UploadPart> {
    if total_size == 0 || chunk_size == 0 {
        return Vec::new();
    }
    let parts_count = total_size.div_ceil(chunk_size);
    (0..parts_count)
        .map(|i| {
            let offset = i * chunk_size;
            let size = if i == parts_count - 1 {
                total_size - offset
            } else {
                chunk_size
            };
            UploadPart {
                index: i as u32,
                offset,
                size,
            }
        })
        .collect()
}

/// 256 bits of randomness, hex-encoded.
pub fn generate_upload_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

// ---------------------------------------------------------------------------
// Session store
// ---------------------------------------------------------------------------

/// Key/value store with TTLs holding upload session state.
///
/// Trait-based so the coordinator logic is testable without a live Redis.
pub trait SessionStore: Send + Sync {
    /// Persist a new session with TTL until its expiry.
    fn create(
        &self,
        session: &UploadSession,
    ) -> impl Future<Output = Result<(), SessionError>> + Send;

    /// Load a session; absent or expired sessions are `NotFound`.
    fn fetch(
        &self,
        upload_id: &str,
    ) -> impl Future<Output = Result<UploadSession, SessionError>> + Send;

    /// The set of uploaded part indices.
    fn uploaded_parts(
        &self,
        upload_id: &str,
    ) -> impl Future<Output = Result<BTreeSet<u32>, SessionError>> + Send;

    /// Record a part as uploaded (idempotent) and return the updated set.
    fn mark_part_uploaded(
        &self,
        upload_id: &str,
        part_index: u32,
    ) -> impl Future<Output = Result<BTreeSet<u32>, SessionError>> + Send;
}

// ---------------------------------------------------------------------------
// Redis-backed store
// ---------------------------------------------------------------------------

/// Session store over Redis.
///
/// Layout: session JSON at `upload:{id}`, uploaded indices as a set at
/// `upload:{id}:parts` (`SADD` is atomic, so parallel part uploads cannot
/// lose updates). Both keys carry the session TTL.
#[derive(Clone)]
pub struct RedisSessionStore {
    manager: redis::aio::ConnectionManager,
}

impl RedisSessionStore {
    pub async fn connect(url: &str) -> Result<Self, SessionError> {
        let client =
            redis::Client::open(url).map_err(|e| SessionError::Backend(e.to_string()))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| SessionError::Backend(e.to_string()))?;
        Ok(Self { manager })
    }

    fn session_key(upload_id: &str) -> String {
        format!("{}{}", UPLOAD_KEY_PREFIX, upload_id)
    }

    fn parts_key(upload_id: &str) -> String {
        format!("{}{}:parts", UPLOAD_KEY_PREFIX, upload_id)
    }
}

impl SessionStore for RedisSessionStore {
    async fn create(&self, session: &UploadSession) -> Result<(), SessionError> {
        let ttl = session.ttl_secs();
        if ttl == 0 {
            return Err(SessionError::Backend("session already expired".into()));
        }
        let payload = serde_json::to_string(session)
            .map_err(|e| SessionError::Backend(e.to_string()))?;

        let mut conn = self.manager.clone();
        let _: () = conn
            .set_ex(Self::session_key(&session.upload_id), payload, ttl)
            .await
            .map_err(|e| SessionError::Backend(e.to_string()))?;

        debug!(upload_id = %session.upload_id, ttl, "upload session created");
        Ok(())
    }

    async fn fetch(&self, upload_id: &str) -> Result<UploadSession, SessionError> {
        let mut conn = self.manager.clone();
        let payload: Option<String> = conn
            .get(Self::session_key(upload_id))
            .await
            .map_err(|e| SessionError::Backend(e.to_string()))?;

        let payload = payload.ok_or(SessionError::NotFound)?;
        serde_json::from_str(&payload).map_err(|e| SessionError::Backend(e.to_string()))
    }

    async fn uploaded_parts(&self, upload_id: &str) -> Result<BTreeSet<u32>, SessionError> {
        let mut conn = self.manager.clone();
        let members: Vec<u32> = conn
            .smembers(Self::parts_key(upload_id))
            .await
            .map_err(|e| SessionError::Backend(e.to_string()))?;
        Ok(members.into_iter().collect())
    }

    async fn mark_part_uploaded(
        &self,
        upload_id: &str,
        part_index: u32,
    ) -> Result<BTreeSet<u32>, SessionError> {
        // Fetch first: validates existence and yields the remaining TTL.
        let session = self.fetch(upload_id).await?;

        let parts_key = Self::parts_key(upload_id);
        let mut conn = self.manager.clone();
        let _: () = conn
            .sadd(&parts_key, part_index)
            .await
            .map_err(|e| SessionError::Backend(e.to_string()))?;
        let _: bool = conn
            .expire(&parts_key, session.ttl_secs() as i64)
            .await
            .map_err(|e| SessionError::Backend(e.to_string()))?;

        self.uploaded_parts(upload_id).await
    }
}

// ---------------------------------------------------------------------------
// In-memory store for tests
// ---------------------------------------------------------------------------
