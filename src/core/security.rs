use crate::core::error::ProxyError;

// ---------------------------------------------------------------------------
// Security limits
// ---------------------------------------------------------------------------

/// Maximum length of a caller-supplied object-store key.
pub const MAX_OBJECT_KEY_LENGTH: usize = 512;

/// Upload session lifetime cap, regardless of the signed deadline.
pub const UPLOAD_SESSION_MAX_TTL_SECS: u64 = 24 * 60 * 60;

/// Default body limit when uploading is disabled (4 MiB).
pub const DEFAULT_BODY_LIMIT_BYTES: usize = 4 * 1024 * 1024;

/// Slack added on top of the chunk size for multipart form overhead (1 MiB).
pub const BODY_LIMIT_SLACK_BYTES: usize = 1024 * 1024;

/// Sanitize a caller-supplied object-store key.
///
/// Accepts `[A-Za-z0-9/_.-]`, rejects `..` segments and backslashes, caps
/// the length at [`MAX_OBJECT_KEY_LENGTH`], and strips any leading `/` so
/// the key stays relative to the configured prefix.
pub fn sanitize_object_key(key: &str) -> Result<String, ProxyError> {
    if key.is_empty() || key.len() > MAX_OBJECT_KEY_LENGTH {
        return Err(ProxyError::BadInput("invalid location length".to_string()));
    }
    if key.contains("..") || key.contains('\\') {
        return Err(ProxyError::BadInput(
            "invalid location characters".to_string(),
        ));
    }
    for c in key.chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '/' | '-' | '_' | '.') {
            continue;
        }
        return Err(ProxyError::BadInput(
            "invalid character in location".to_string(),
        ));
    }
    Ok(key.trim_start_matches('/').to_string())
}

/// Check a byte size against a megabyte limit; 0 disables the limit.
pub fn validate_size(size: u64, max_mb: u64) -> Result<(), ProxyError> {
    if max_mb == 0 {
        return Ok(());
    }
    let max_bytes = max_mb * 1024 * 1024;
    if size > max_bytes {
        return Err(ProxyError::TooLarge(format!(
            "size {} bytes exceeds maximum of {} MB",
            size, max_mb
        )));
    }
    Ok(())
}

/// Request body limit: generous enough for one multipart chunk plus form
/// overhead when uploading is enabled, tight otherwise.
pub fn body_limit_bytes(uploading_enabled: bool, chunk_size: u64, max_video_size_mb: u64) -> usize {
    if !uploading_enabled {
        return DEFAULT_BODY_LIMIT_BYTES;
    }
    let chunk_limit = chunk_size as usize + BODY_LIMIT_SLACK_BYTES;
    let video_limit = (max_video_size_mb as usize) * 1024 * 1024;
    chunk_limit.max(video_limit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_accepts_plain_keys() {
        assert_eq!(
            sanitize_object_key("videos/v.mp4").unwrap(),
            "videos/v.mp4"
        );
        assert_eq!(
            sanitize_object_key("uploads-2025-08-cat.jpg").unwrap(),
            "uploads-2025-08-cat.jpg"
        );
    }

    #[test]
    fn sanitize_strips_leading_slash() {
        assert_eq!(sanitize_object_key("/a/b.png").unwrap(), "a/b.png");
        assert_eq!(sanitize_object_key("///a").unwrap(), "a");
    }

    #[test]
    fn sanitize_rejects_traversal_and_backslash() {
        assert!(sanitize_object_key("a/../b").is_err());
        assert!(sanitize_object_key("a\\b").is_err());
        assert!(sanitize_object_key("..").is_err());
    }

    #[test]
    fn sanitize_rejects_bad_charset_and_length() {
        assert!(sanitize_object_key("").is_err());
        assert!(sanitize_object_key("a b").is_err());
        assert!(sanitize_object_key("a?b").is_err());
        assert!(sanitize_object_key(&"x".repeat(513)).is_err());
        assert!(sanitize_object_key(&"x".repeat(512)).is_ok());
    }

    #[test]
    fn size_limit_zero_means_unlimited() {
        assert!(validate_size(u64::MAX, 0).is_ok());
        assert!(validate_size(2 * 1024 * 1024, 1).is_err());
        assert!(validate_size(1024 * 1024, 1).is_ok());
    }

    #[test]
    fn body_limit_tracks_upload_settings() {
        assert_eq!(body_limit_bytes(false, 0, 0), 4 * 1024 * 1024);
        // chunk + slack wins over a small video cap
        assert_eq!(
            body_limit_bytes(true, 80 * 1024 * 1024, 10),
            81 * 1024 * 1024
        );
        // a large video cap wins over the chunk limit
        assert_eq!(
            body_limit_bytes(true, 8 * 1024 * 1024, 500),
            500 * 1024 * 1024
        );
    }
}
