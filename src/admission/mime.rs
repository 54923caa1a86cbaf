// ---------------------------------------------------------------------------
// Media-type allow-lists
// ---------------------------------------------------------------------------

const IMAGE_MIME_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/webp",
    "image/gif",
    "image/bmp",
    "image/tiff",
];

/// Document types rasterized to a page-0 image.
const DOCUMENT_MIME_TYPES: &[&str] = &[
    "application/pdf",
    "application/epub+zip",
    "application/x-mobipocket-ebook",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
];

const VIDEO_MIME_TYPES: &[&str] = &[
    "video/mp4",
    "video/ogg",
    "video/webm",
    "video/quicktime",
    "video/x-msvideo",
    "video/x-matroska",
    "video/x-flv",
    "video/x-m4v",
];

pub fn is_image_mime(media_type: &str) -> bool {
    IMAGE_MIME_TYPES.contains(&media_type)
}

pub fn is_document_mime(media_type: &str) -> bool {
    DOCUMENT_MIME_TYPES.contains(&media_type)
}

pub fn is_video_mime(media_type: &str) -> bool {
    VIDEO_MIME_TYPES.contains(&media_type)
}

/// Strip parameters from a `Content-Type` value: `image/png; charset=x`
/// becomes `image/png`, lowercased. Returns `None` for empty values.
pub fn parse_media_type(header_value: &str) -> Option<String> {
    let essence = header_value.split(';').next()?.trim();
    if essence.is_empty() || !essence.contains('/') {
        return None;
    }
    Some(essence.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_allow_list() {
        assert!(is_image_mime("image/jpeg"));
        assert!(is_image_mime("image/tiff"));
        assert!(!is_image_mime("image/svg+xml"));
        assert!(!is_image_mime("video/mp4"));
    }

    #[test]
    fn video_allow_list() {
        assert!(is_video_mime("video/mp4"));
        assert!(is_video_mime("video/x-matroska"));
        assert!(!is_video_mime("audio/mpeg"));
    }

    #[test]
    fn document_allow_list() {
        assert!(is_document_mime("application/pdf"));
        assert!(is_document_mime("application/epub+zip"));
        assert!(!is_document_mime("application/json"));
    }

    #[test]
    fn media_type_parsing() {
        assert_eq!(
            parse_media_type("image/JPEG; charset=utf-8").as_deref(),
            Some("image/jpeg")
        );
        assert_eq!(parse_media_type("video/mp4").as_deref(), Some("video/mp4"));
        assert_eq!(parse_media_type(""), None);
        assert_eq!(parse_media_type("garbage"), None);
    }
}
