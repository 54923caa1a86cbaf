use std::time::{Duration, Instant};

use bytes::Bytes;
use moka::sync::Cache;
use moka::Expiry;
use tracing::{debug, trace};

use crate::observability::metrics as obs;

// ---------------------------------------------------------------------------
// In-memory artifact cache
// ---------------------------------------------------------------------------

/// A transformed artifact held in memory. Immutable once stored.
#[derive(Debug, Clone)]
pub struct CachedArtifact {
    pub body: Bytes,
    pub content_type: String,
    /// Strong ETag, set by the HTTP response-cache layer; empty elsewhere.
    pub etag: String,
}

#[derive(Clone)]
struct Entry {
    artifact: CachedArtifact,
    ttl: Duration,
}

struct PerEntryTtl;

impl Expiry<String, Entry> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        entry: &Entry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }
}

/// Cost-weighted admission cache from fingerprint to transformed bytes.
///
/// Bounded by a byte budget (`max_cost`); entry weight is the body length.
/// Admission is approximate-LFU, so writes may be rejected under pressure.
/// Reads are lock-free with respect to writers. Also used as the generic
/// byte-cache behind the HTTP response-cache layer.
pub struct MemoryCache {
    cache: Cache<String, Entry>,
}

impl MemoryCache {
    pub fn new(max_cost: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_cost)
            .weigher(|key: &String, entry: &Entry| {
                let weight = entry.artifact.body.len() + key.len();
                weight.min(u32::MAX as usize) as u32
            })
            .expire_after(PerEntryTtl)
            .build();
        Self { cache }
    }

    pub fn get(&self, key: &str) -> Option<CachedArtifact> {
        match self.cache.get(key) {
            Some(entry) => {
                debug!(key, "memory cache hit");
                obs::inc_cache_hit("memory");
                Some(entry.artifact)
            }
            None => {
                trace!(key, "memory cache miss");
                obs::inc_cache_miss("memory");
                None
            }
        }
    }

    /// Insert with a per-entry TTL. The write is best-effort: the admission
    /// policy may reject it.
    pub fn insert(&self, key: String, artifact: CachedArtifact, ttl: Duration) {
        debug!(key = %key, size = artifact.body.len(), "caching artifact");
        self.cache.insert(key, Entry { artifact, ttl });
        obs::set_memory_cache_size(self.cache.weighted_size() as f64);
    }

    #[cfg(test)]
    pub fn flush(&self) {
        self.cache.run_pending_tasks();
    }

    #[cfg(test)]
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    #[cfg(test)]
    pub fn weighted_size(&self) -> u64 {
        self.cache.weighted_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(size: usize, content_type: &str) -> CachedArtifact {
        CachedArtifact {
            body: Bytes::from(vec![0xAA; size]),
            content_type: content_type.to_string(),
            etag: String::new(),
        }
    }

    #[test]
    fn insert_and_get() {
        let cache = MemoryCache::new(1024 * 1024);
        cache.insert(
            "fp-1".to_string(),
            artifact(100, "image/webp"),
            Duration::from_secs(60),
        );

        let hit = cache.get("fp-1").expect("inserted entry");
        assert_eq!(hit.body.len(), 100);
        assert_eq!(hit.content_type, "image/webp");
    }

    #[test]
    fn miss_on_unknown_key() {
        let cache = MemoryCache::new(1024);
        assert!(cache.get("nope").is_none());
    }

    #[test]
    fn cost_budget_is_enforced() {
        let cache = MemoryCache::new(1000);
        for i in 0..20 {
            cache.insert(
                format!("fp-{}", i),
                artifact(300, "image/jpeg"),
                Duration::from_secs(60),
            );
        }
        cache.flush();
        assert!(cache.weighted_size() <= 1000);
        assert!(cache.entry_count() <= 3);
    }

    #[test]
    fn per_entry_ttl_expires() {
        let cache = MemoryCache::new(1024 * 1024);
        cache.insert(
            "short".to_string(),
            artifact(10, "image/png"),
            Duration::from_millis(30),
        );
        cache.insert(
            "long".to_string(),
            artifact(10, "image/png"),
            Duration::from_secs(300),
        );

        std::thread::sleep(Duration::from_millis(120));
        cache.flush();
        assert!(cache.get("short").is_none());
        assert!(cache.get("long").is_some());
    }

    #[test]
    fn stored_artifacts_are_immutable_snapshots() {
        let cache = MemoryCache::new(1024);
        cache.insert(
            "fp".to_string(),
            artifact(5, "image/png"),
            Duration::from_secs(60),
        );
        let a = cache.get("fp").unwrap();
        let b = cache.get("fp").unwrap();
        assert_eq!(a.body, b.body);
    }
}
