#[cfg(feature = "documents")]
pub mod document;
pub mod frame;
pub mod image;

use bytes::Bytes;

/// Result of the transform pipeline: encoded bytes plus their media type.
#[derive(Debug, Clone)]
pub struct TransformOutput {
    pub body: Bytes,
    pub content_type: String,
}
