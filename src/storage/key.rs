use sha2::{Digest, Sha256};

use crate::admission::params::RequestContext;

// ---------------------------------------------------------------------------
// Fingerprint and key derivation
// ---------------------------------------------------------------------------

/// Deterministic textual identifier of a (source, transform) pair.
///
/// Two requests with equal source identity and transform set produce the
/// same fingerprint string-for-string; the pipeline is deterministic, so
/// equal fingerprints imply byte-identical outputs. The frame position is
/// part of the key so distinct frames of one video never collide.
pub fn fingerprint(ctx: &RequestContext) -> String {
    let t = &ctx.transforms;
    format!(
        "{};quality={};width={};height={};scale={};interpolation={};webp={};framePosition={}",
        ctx.source_id(),
        t.quality,
        t.width,
        t.height,
        t.scale,
        t.interpolation,
        t.webp,
        t.frame_position,
    )
}

/// Content address for a fingerprint: `aa/bb/<sha256-hex>`, partitioned by
/// the first two hex byte pairs to keep listings shallow.
pub fn content_address(fingerprint: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(fingerprint.as_bytes());
    let hash = hex::encode(hasher.finalize());
    format!("{}/{}/{}", &hash[0..2], &hash[2..4], hash)
}

/// Join a configured bucket prefix with an object key.
pub fn prefixed(prefix: &str, key: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}/{}", prefix, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::params::{
        FramePosition, Interpolation, RequestContext, TransformParams,
    };

    fn ctx(url: Option<&str>, location: Option<&str>) -> RequestContext {
        RequestContext {
            source_url: url.map(|s| s.to_string()),
            custom_object_key: location.map(|s| s.to_string()),
            hostname: String::new(),
            signature: None,
            token_presented: false,
            transforms: TransformParams::default(),
        }
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let a = ctx(Some("https://example.com/a.jpg"), None);
        let b = ctx(Some("https://example.com/a.jpg"), None);
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn fingerprint_uses_url_over_location() {
        let both = ctx(Some("https://example.com/a.jpg"), Some("loc/key.jpg"));
        assert!(fingerprint(&both).starts_with("https://example.com/a.jpg;"));

        let loc_only = ctx(None, Some("loc/key.jpg"));
        assert!(fingerprint(&loc_only).starts_with("loc/key.jpg;"));
    }

    #[test]
    fn fingerprint_format_is_stable() {
        let c = ctx(Some("https://example.com/a.jpg"), None);
        assert_eq!(
            fingerprint(&c),
            "https://example.com/a.jpg;quality=100;width=0;height=0;scale=0;\
             interpolation=lanczos3;webp=false;framePosition=first"
        );
    }

    #[test]
    fn fingerprint_varies_with_transforms() {
        let mut a = ctx(Some("https://example.com/a.jpg"), None);
        let base = fingerprint(&a);

        a.transforms = TransformParams {
            quality: 80,
            width: 320,
            height: 240,
            scale: 0.5,
            interpolation: Interpolation::Bicubic,
            webp: true,
            frame_position: FramePosition::Seconds(12.5),
        };
        let changed = fingerprint(&a);
        assert_ne!(base, changed);
        assert!(changed.contains("quality=80"));
        assert!(changed.contains("scale=0.5"));
        assert!(changed.contains("interpolation=bicubic"));
        assert!(changed.contains("framePosition=12.5"));
    }

    #[test]
    fn content_address_shape() {
        let addr = content_address("some-fingerprint");
        let parts: Vec<&str> = addr.split('/').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), 2);
        assert_eq!(parts[1].len(), 2);
        assert_eq!(parts[2].len(), 64);
        assert!(parts[2].starts_with(parts[0]));
        assert!(parts[2][2..].starts_with(parts[1]));
        // stable across calls
        assert_eq!(addr, content_address("some-fingerprint"));
        assert_ne!(addr, content_address("other-fingerprint"));
    }

    #[test]
    fn prefix_joining() {
        assert_eq!(prefixed("", "a/b"), "a/b");
        assert_eq!(prefixed("media", "a/b"), "media/a/b");
        assert_eq!(prefixed("media/", "a/b"), "media/a/b");
        assert_eq!(prefixed("/media/", "a/b"), "media/a/b");
    }
}
