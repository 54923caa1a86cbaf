//! mediaproxy — security-gated media transformation proxy.
//!
//! Given an authenticated request naming a source media object (remote URL
//! or object-store key) plus transformation parameters, the service returns
//! a transformed artifact (resized/re-encoded image or a single video
//! frame), streams raw source bytes with HTTP range support, or accepts
//! single/multi-part uploads into the object store.
//!
//! Module planes:
//! - [`core`] — configuration, error taxonomy, security limits, shutdown
//! - [`admission`] — request parsing, HMAC verification, origin allow-list
//! - [`storage`] — S3-backed result cache, in-memory cache, key derivation,
//!   upload session tracking
//! - [`fetch`] — process-wide upstream HTTP client
//! - [`transform`] — image pipeline and video frame extraction
//! - [`delivery`] — axum router, handlers, range proxy, upload endpoints
//! - [`observability`] — Prometheus metrics catalog

pub mod admission;
pub mod core;
pub mod delivery;
pub mod fetch;
pub mod observability;
pub mod storage;
pub mod transform;
