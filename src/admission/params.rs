use std::collections::HashMap;
use std::fmt;

use base64::alphabet;
use base64::engine::general_purpose::GeneralPurposeConfig;
use base64::engine::{DecodePaddingMode, GeneralPurpose};
use base64::Engine;

use tracing::debug;

use crate::admission::origin::OriginValidator;
use crate::admission::signing::{verify_signature, SignedMessage};
use crate::core::config::ProxyConfig;
use crate::core::error::ProxyError;
use crate::core::redact::{redact_signature, Redacted};
use crate::core::security::sanitize_object_key;

/// URL-safe base64, padding accepted but not required.
const BASE64_URL: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decode a base64url-encoded parameter into UTF-8 text.
pub fn decode_base64url(encoded: &str) -> Result<String, ProxyError> {
    let bytes = BASE64_URL
        .decode(encoded)
        .map_err(|e| ProxyError::BadInput(format!("failed to decode base64: {}", e)))?;
    String::from_utf8(bytes)
        .map_err(|_| ProxyError::BadInput("decoded value is not valid UTF-8".to_string()))
}

/// Encode to base64url (used by tests and URL-minting tooling).
pub fn encode_base64url(value: &str) -> String {
    BASE64_URL.encode(value.as_bytes())
}

// ---------------------------------------------------------------------------
// Transform parameters
// ---------------------------------------------------------------------------

/// Resize interpolation kernels, in their numeric wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    Nearest,
    Bilinear,
    Bicubic,
    Mitchell,
    Lanczos2,
    Lanczos3,
}

impl Interpolation {
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "0" | "nearest" => Some(Self::Nearest),
            "1" | "bilinear" => Some(Self::Bilinear),
            "2" | "bicubic" => Some(Self::Bicubic),
            "3" | "mitchell" => Some(Self::Mitchell),
            "4" | "lanczos2" => Some(Self::Lanczos2),
            "5" | "lanczos3" => Some(Self::Lanczos3),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nearest => "nearest",
            Self::Bilinear => "bilinear",
            Self::Bicubic => "bicubic",
            Self::Mitchell => "mitchell",
            Self::Lanczos2 => "lanczos2",
            Self::Lanczos3 => "lanczos3",
        }
    }
}

impl fmt::Display for Interpolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which frame of a video to extract.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FramePosition {
    First,
    Half,
    Last,
    /// Non-negative time in seconds.
    Seconds(f64),
}

impl FramePosition {
    /// Parse the wire form; anything unrecognized reverts to `First`.
    pub fn from_wire(value: &str) -> Self {
        match value {
            "first" => Self::First,
            "half" => Self::Half,
            "last" => Self::Last,
            other => match other.trim().parse::<f64>() {
                Ok(secs) if secs >= 0.0 && secs.is_finite() => Self::Seconds(secs),
                _ => Self::First,
            },
        }
    }
}

impl fmt::Display for FramePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::First => f.write_str("first"),
            Self::Half => f.write_str("half"),
            Self::Last => f.write_str("last"),
            Self::Seconds(s) => write!(f, "{}", s),
        }
    }
}

/// Validated transformation set for one request.
#[derive(Debug, Clone)]
pub struct TransformParams {
    pub quality: u8,
    pub width: u32,
    pub height: u32,
    /// 0.0 = no rescale; otherwise in (0, 1].
    pub scale: f64,
    pub interpolation: Interpolation,
    pub webp: bool,
    pub frame_position: FramePosition,
}

impl Default for TransformParams {
    fn default() -> Self {
        Self {
            quality: 100,
            width: 0,
            height: 0,
            scale: 0.0,
            interpolation: Interpolation::Lanczos3,
            webp: false,
            frame_position: FramePosition::First,
        }
    }
}

impl TransformParams {
    /// True when the request asks for the source bytes untouched.
    pub fn is_passthrough(&self) -> bool {
        self.quality == 100
            && !self.webp
            && self.width == 0
            && self.height == 0
            && self.scale == 0.0
    }
}

// ---------------------------------------------------------------------------
// Request context
// ---------------------------------------------------------------------------

/// Parsed, validated inputs for one read request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub source_url: Option<String>,
    /// Sanitized caller-owned object-store key (signature-gated).
    pub custom_object_key: Option<String>,
    pub hostname: String,
    /// Hex signature as presented. Kept for logging only — always pass it
    /// through [`RequestContext::signature_for_log`].
    pub signature: Option<String>,
    pub token_presented: bool,
    pub transforms: TransformParams,
}

impl RequestContext {
    /// Source identity for fingerprinting: the URL when present, else the
    /// custom key. Admission guarantees at least one exists.
    pub fn source_id(&self) -> &str {
        self.source_url
            .as_deref()
            .or(self.custom_object_key.as_deref())
            .unwrap_or("")
    }

    /// Signature field for request logs: prefix only, never the value.
    pub fn signature_for_log(&self) -> String {
        match self.signature.as_deref() {
            Some(signature) => redact_signature(signature),
            None => "none".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Raw parameter extraction (path and query forms)
// ---------------------------------------------------------------------------

/// Parameters as they appear on the wire, before validation.
#[derive(Debug, Clone, Default)]
pub struct RawParams {
    pub quality: Option<u8>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub scale: Option<f64>,
    pub interpolation: Option<Interpolation>,
    pub webp: Option<bool>,
    pub frame_position: Option<FramePosition>,
    pub signature: Option<String>,
    pub token: Option<String>,
    pub encoded_url: Option<String>,
    pub encoded_location: Option<String>,
}

impl RawParams {
    /// Parse the `/`-separated path form:
    /// `q:80/w:320/h:240/webp/fp:half/loc:<b64>/sig:<hex>/<b64-url>`.
    ///
    /// A trailing segment that contains no `:` and is not the bare `webp`
    /// flag is the base64url-encoded source URL. Unknown keys are ignored;
    /// out-of-range numerics silently keep their defaults.
    pub fn from_path(path_params: &str) -> Result<Self, ProxyError> {
        let trimmed = path_params.trim_matches('/');
        if trimmed.is_empty() {
            return Err(ProxyError::BadInput("no path parameters found".to_string()));
        }

        let mut parts: Vec<&str> = trimmed.split('/').collect();
        let mut raw = RawParams::default();

        if let Some(last) = parts.last() {
            if !last.contains(':') && *last != "webp" {
                raw.encoded_url = Some((*last).to_string());
                parts.pop();
            }
        }

        for part in parts {
            if part == "webp" {
                raw.webp = Some(true);
                continue;
            }
            let Some((key, value)) = part.split_once(':') else {
                continue;
            };
            match key {
                "q" | "quality" => {
                    if let Ok(q) = value.parse::<u8>() {
                        if (1..=100).contains(&q) {
                            raw.quality = Some(q);
                        }
                    }
                }
                "w" | "width" => {
                    if let Ok(w) = value.parse::<u32>() {
                        if w > 0 {
                            raw.width = Some(w);
                        }
                    }
                }
                "h" | "height" => {
                    if let Ok(h) = value.parse::<u32>() {
                        if h > 0 {
                            raw.height = Some(h);
                        }
                    }
                }
                "s" | "scale" => {
                    if let Ok(s) = value.parse::<f64>() {
                        if s > 0.0 && s <= 1.0 {
                            raw.scale = Some(s);
                        }
                    }
                }
                "i" | "interpolation" => {
                    if let Some(i) = Interpolation::from_wire(value) {
                        raw.interpolation = Some(i);
                    }
                }
                "fp" | "framePosition" => {
                    raw.frame_position = Some(FramePosition::from_wire(value));
                }
                "sig" | "signature" => {
                    raw.signature = Some(value.to_string());
                }
                "t" | "token" => {
                    raw.token = Some(value.to_string());
                }
                "loc" | "location" => {
                    raw.encoded_location = Some(value.to_string());
                }
                _ => {}
            }
        }

        Ok(raw)
    }

    /// Parse the query form. Unlike the path form, explicitly supplied
    /// out-of-range numerics are rejected here.
    pub fn from_query(query: &HashMap<String, String>) -> Result<Self, ProxyError> {
        let mut raw = RawParams::default();

        if let Some(v) = query.get("quality") {
            let q: u8 = v
                .parse()
                .map_err(|_| ProxyError::BadInput("quality must be between 1 and 100".into()))?;
            if !(1..=100).contains(&q) {
                return Err(ProxyError::BadInput(
                    "quality must be between 1 and 100".into(),
                ));
            }
            raw.quality = Some(q);
        }
        if let Some(v) = query.get("width") {
            let w: u32 = v
                .parse()
                .map_err(|_| ProxyError::BadInput("width must be a non-negative integer".into()))?;
            if w > 0 {
                raw.width = Some(w);
            }
        }
        if let Some(v) = query.get("height") {
            let h: u32 = v.parse().map_err(|_| {
                ProxyError::BadInput("height must be a non-negative integer".into())
            })?;
            if h > 0 {
                raw.height = Some(h);
            }
        }
        if let Some(v) = query.get("scale") {
            let s: f64 = v
                .parse()
                .map_err(|_| ProxyError::BadInput("scale must be between 0 and 1".into()))?;
            if s < 0.0 || s > 1.0 {
                return Err(ProxyError::BadInput("scale must be between 0 and 1".into()));
            }
            if s > 0.0 {
                raw.scale = Some(s);
            }
        }
        if let Some(v) = query.get("interpolation") {
            raw.interpolation = Some(Interpolation::from_wire(v).ok_or_else(|| {
                ProxyError::BadInput("interpolation must be between 0 and 5".into())
            })?);
        }
        if let Some(v) = query.get("webp") {
            raw.webp = v.parse().ok();
        }
        if let Some(v) = query.get("framePosition") {
            raw.frame_position = Some(FramePosition::from_wire(v));
        }
        raw.signature = query.get("signature").cloned();
        raw.token = query.get("token").cloned();
        // The query form carries the source URL in clear.
        raw.encoded_url = query.get("url").map(|u| encode_base64url(u));
        raw.encoded_location = query.get("location").cloned();

        Ok(raw)
    }

    fn transforms(&self, default_webp: bool) -> TransformParams {
        let defaults = TransformParams::default();
        TransformParams {
            quality: self.quality.unwrap_or(defaults.quality),
            width: self.width.unwrap_or(defaults.width),
            height: self.height.unwrap_or(defaults.height),
            scale: self.scale.unwrap_or(defaults.scale),
            interpolation: self.interpolation.unwrap_or(defaults.interpolation),
            webp: self.webp.unwrap_or(default_webp),
            frame_position: self.frame_position.unwrap_or(defaults.frame_position),
        }
    }
}

// ---------------------------------------------------------------------------
// Context builders
// ---------------------------------------------------------------------------

/// Build a read-request context: signature scheme selection, location
/// sanitization, origin validation.
pub fn build_read_context(
    raw: RawParams,
    config: &ProxyConfig,
    origins: &OriginValidator,
) -> Result<RequestContext, ProxyError> {
    let source_url = match &raw.encoded_url {
        Some(encoded) => Some(decode_base64url(encoded)?),
        None => None,
    };

    let mut custom_object_key = None;
    if let Some(encoded_location) = &raw.encoded_location {
        // A caller-owned key is only honored with a valid signature.
        let signature = raw.signature.as_deref().ok_or_else(|| {
            ProxyError::AuthFailed("signature required for custom location".to_string())
        })?;
        let decoded = decode_base64url(encoded_location)?;
        let sanitized = sanitize_object_key(&decoded)?;

        let message = match source_url.as_deref() {
            Some(url) => SignedMessage::UrlAndLocation {
                url,
                location: &sanitized,
            },
            None => SignedMessage::LocationOnly {
                location: &sanitized,
            },
        };
        verify_signature(&message, signature, &config.hmac_key)?;
        debug!(
            signature = %redact_signature(signature),
            location = %sanitized,
            "location signature verified"
        );
        custom_object_key = Some(sanitized);
    } else if let Some(signature) = raw.signature.as_deref() {
        let url = source_url.as_deref().ok_or_else(|| {
            ProxyError::BadInput(
                "url is required when signature is provided without location".to_string(),
            )
        })?;
        verify_signature(&SignedMessage::UrlOnly { url }, signature, &config.hmac_key)?;
        debug!(signature = %redact_signature(signature), "url signature verified");
    } else if source_url.is_none() {
        return Err(ProxyError::BadInput(
            "url or location is required".to_string(),
        ));
    }

    let mut hostname = String::new();
    if let Some(url) = source_url.as_deref() {
        let (allowed, host) = origins.validate(url);
        if !allowed {
            return Err(ProxyError::AuthFailed("url is not allowed".to_string()));
        }
        hostname = host;
    }

    Ok(RequestContext {
        source_url,
        custom_object_key,
        hostname,
        signature: raw.signature.clone(),
        token_presented: raw.token.is_some(),
        transforms: raw.transforms(config.webp_by_default),
    })
}

/// Build an image-upload context. Admission is either the process-wide
/// token or a signed custom location.
pub fn build_upload_context(
    raw: RawParams,
    config: &ProxyConfig,
) -> Result<RequestContext, ProxyError> {
    let mut custom_object_key = None;

    match (&raw.encoded_location, raw.signature.as_deref()) {
        (Some(encoded_location), Some(signature)) => {
            let decoded = decode_base64url(encoded_location)?;
            let sanitized = sanitize_object_key(&decoded)?;
            verify_signature(
                &SignedMessage::LocationOnly {
                    location: &sanitized,
                },
                signature,
                &config.hmac_key,
            )?;
            debug!(
                signature = %redact_signature(signature),
                location = %sanitized,
                "upload location signature verified"
            );
            custom_object_key = Some(sanitized);
        }
        _ => {
            if raw.token.as_deref() != Some(config.token.as_str()) || config.token.is_empty() {
                return Err(ProxyError::AuthFailed("invalid token".to_string()));
            }
            debug!(
                token = %Redacted::new(raw.token.as_deref().unwrap_or_default()),
                "upload token admission"
            );
        }
    }

    Ok(RequestContext {
        source_url: None,
        custom_object_key,
        hostname: String::new(),
        signature: raw.signature.clone(),
        token_presented: raw.token.is_some(),
        transforms: raw.transforms(config.webp_by_default),
    })
}

/// Admission for the single-shot video upload: deadline-bound signature
/// over `decimal(deadline)|location`.
pub fn validate_video_upload(
    deadline: Option<&str>,
    encoded_location: Option<&str>,
    signature: Option<&str>,
    now_unix: i64,
    config: &ProxyConfig,
) -> Result<String, ProxyError> {
    let deadline_str =
        deadline.ok_or_else(|| ProxyError::BadInput("deadline parameter is required".into()))?;
    let deadline: i64 = deadline_str
        .parse()
        .map_err(|_| ProxyError::BadInput("invalid deadline format".into()))?;
    if now_unix > deadline {
        return Err(ProxyError::AuthFailed("upload deadline has expired".into()));
    }

    let encoded_location = encoded_location
        .ok_or_else(|| ProxyError::BadInput("location parameter is required".into()))?;
    let decoded = decode_base64url(encoded_location)?;
    let sanitized = sanitize_object_key(&decoded)?;

    let signature =
        signature.ok_or_else(|| ProxyError::BadInput("signature parameter is required".into()))?;
    verify_signature(
        &SignedMessage::Upload {
            deadline,
            location: &sanitized,
        },
        signature,
        &config.hmac_key,
    )?;

    Ok(sanitized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::signing::sign;

    fn proxy_config(hmac_key: &str, origins: &[&str]) -> ProxyConfig {
        ProxyConfig {
            allowed_origins: origins.iter().map(|s| s.to_string()).collect(),
            webp_by_default: false,
            token: "app-token".to_string(),
            hmac_key: hmac_key.to_string(),
            http_timeout_secs: 30,
            url_cache_size: 100,
            max_image_size_mb: 0,
        }
    }

    fn validator(config: &ProxyConfig) -> OriginValidator {
        OriginValidator::new(config.allowed_origins.clone(), config.url_cache_size)
    }

    #[test]
    fn base64url_round_trip() {
        let url = "https://example.com/a.jpg?x=1&y=2";
        assert_eq!(decode_base64url(&encode_base64url(url)).unwrap(), url);
    }

    #[test]
    fn base64url_accepts_padded_and_unpadded() {
        // "ab" encodes to "YWI=" padded, "YWI" unpadded
        assert_eq!(decode_base64url("YWI=").unwrap(), "ab");
        assert_eq!(decode_base64url("YWI").unwrap(), "ab");
        assert!(decode_base64url("!!!").is_err());
    }

    #[test]
    fn path_form_full_parse() {
        let raw =
            RawParams::from_path("q:80/w:320/h:240/s:0.5/i:2/webp/fp:half/sig:abc/dGVzdA==")
                .unwrap();
        assert_eq!(raw.quality, Some(80));
        assert_eq!(raw.width, Some(320));
        assert_eq!(raw.height, Some(240));
        assert_eq!(raw.scale, Some(0.5));
        assert_eq!(raw.interpolation, Some(Interpolation::Bicubic));
        assert_eq!(raw.webp, Some(true));
        assert_eq!(raw.frame_position, Some(FramePosition::Half));
        assert_eq!(raw.signature.as_deref(), Some("abc"));
        assert_eq!(raw.encoded_url.as_deref(), Some("dGVzdA=="));
    }

    #[test]
    fn path_form_trailing_webp_is_a_flag_not_a_url() {
        let raw = RawParams::from_path("loc:bG9j/q:50/webp").unwrap();
        assert_eq!(raw.webp, Some(true));
        assert!(raw.encoded_url.is_none());
        assert_eq!(raw.encoded_location.as_deref(), Some("bG9j"));
    }

    #[test]
    fn path_form_out_of_range_reverts_to_default() {
        let raw = RawParams::from_path("q:0/w:-3/s:1.5/i:9/dGVzdA==").unwrap();
        assert!(raw.quality.is_none());
        assert!(raw.width.is_none());
        assert!(raw.scale.is_none());
        assert!(raw.interpolation.is_none());
    }

    #[test]
    fn path_form_unknown_keys_ignored() {
        let raw = RawParams::from_path("zz:1/q:42/dGVzdA==").unwrap();
        assert_eq!(raw.quality, Some(42));
    }

    #[test]
    fn query_form_rejects_out_of_range() {
        let mut q = HashMap::new();
        q.insert("url".to_string(), "https://example.com/a.jpg".to_string());
        q.insert("quality".to_string(), "101".to_string());
        assert!(RawParams::from_query(&q).is_err());

        q.insert("quality".to_string(), "0".to_string());
        assert!(RawParams::from_query(&q).is_err());

        q.insert("quality".to_string(), "1".to_string());
        assert_eq!(RawParams::from_query(&q).unwrap().quality, Some(1));
    }

    #[test]
    fn frame_position_wire_forms() {
        assert_eq!(FramePosition::from_wire("first"), FramePosition::First);
        assert_eq!(FramePosition::from_wire("half"), FramePosition::Half);
        assert_eq!(FramePosition::from_wire("last"), FramePosition::Last);
        assert_eq!(
            FramePosition::from_wire("30.5"),
            FramePosition::Seconds(30.5)
        );
        // invalid values revert to the default silently
        assert_eq!(FramePosition::from_wire("-3"), FramePosition::First);
        assert_eq!(FramePosition::from_wire("bogus"), FramePosition::First);
    }

    #[test]
    fn url_only_signed_context() {
        let config = proxy_config("k", &["example.com"]);
        let origins = validator(&config);
        let url = "https://example.com/a.jpg";
        let sig = sign(&SignedMessage::UrlOnly { url }, "k");

        let raw = RawParams::from_path(&format!("sig:{}/{}", sig, encode_base64url(url))).unwrap();
        let ctx = build_read_context(raw, &config, &origins).unwrap();
        assert_eq!(ctx.source_url.as_deref(), Some(url));
        assert_eq!(ctx.hostname, "example.com");
        assert!(ctx.custom_object_key.is_none());
        assert!(ctx.transforms.is_passthrough());
    }

    #[test]
    fn url_and_location_signed_context() {
        let config = proxy_config("k", &["example.com"]);
        let origins = validator(&config);
        let url = "https://example.com/a.jpg";
        let location = "uploads-2025-08-cat.jpg";
        let sig = sign(&SignedMessage::UrlAndLocation { url, location }, "k");

        let path = format!(
            "loc:{}/q:80/webp/w:320/h:240/sig:{}/{}",
            encode_base64url(location),
            sig,
            encode_base64url(url)
        );
        let raw = RawParams::from_path(&path).unwrap();
        let ctx = build_read_context(raw, &config, &origins).unwrap();
        assert_eq!(ctx.custom_object_key.as_deref(), Some(location));
        assert_eq!(ctx.transforms.quality, 80);
        assert!(ctx.transforms.webp);
        assert_eq!((ctx.transforms.width, ctx.transforms.height), (320, 240));
    }

    #[test]
    fn location_only_signed_context() {
        let config = proxy_config("k", &[]);
        let origins = validator(&config);
        let location = "videos/v.mp4";
        let sig = sign(&SignedMessage::LocationOnly { location }, "k");

        let raw =
            RawParams::from_path(&format!("loc:{}/sig:{}", encode_base64url(location), sig))
                .unwrap();
        let ctx = build_read_context(raw, &config, &origins).unwrap();
        assert!(ctx.source_url.is_none());
        assert_eq!(ctx.custom_object_key.as_deref(), Some(location));
    }

    #[test]
    fn location_without_signature_is_rejected() {
        let config = proxy_config("k", &[]);
        let origins = validator(&config);
        let raw =
            RawParams::from_path(&format!("loc:{}", encode_base64url("videos/v.mp4"))).unwrap();
        let err = build_read_context(raw, &config, &origins).unwrap_err();
        assert_eq!(err.kind(), "auth_failed");
    }

    #[test]
    fn wrong_signature_is_rejected() {
        let config = proxy_config("k", &["example.com"]);
        let origins = validator(&config);
        let url = "https://example.com/a.jpg";
        let bad = sign(&SignedMessage::UrlOnly { url }, "other-key");

        let raw = RawParams::from_path(&format!("sig:{}/{}", bad, encode_base64url(url))).unwrap();
        assert!(build_read_context(raw, &config, &origins).is_err());
    }

    #[test]
    fn missing_url_and_location_is_bad_input() {
        let config = proxy_config("", &[]);
        let origins = validator(&config);
        let raw = RawParams::from_path("q:50").unwrap();
        let err = build_read_context(raw, &config, &origins).unwrap_err();
        assert_eq!(err.kind(), "bad_input");
    }

    #[test]
    fn disallowed_origin_is_rejected() {
        let config = proxy_config("", &["example.com"]);
        let origins = validator(&config);
        let raw =
            RawParams::from_path(&encode_base64url("https://evil.example/a.jpg")).unwrap();
        let err = build_read_context(raw, &config, &origins).unwrap_err();
        assert_eq!(err.kind(), "auth_failed");
    }

    #[test]
    fn default_webp_applies_when_unset() {
        let mut config = proxy_config("", &[]);
        config.webp_by_default = true;
        let origins = validator(&config);
        let raw =
            RawParams::from_path(&encode_base64url("https://example.com/a.jpg")).unwrap();
        let ctx = build_read_context(raw, &config, &origins).unwrap();
        assert!(ctx.transforms.webp);
    }

    #[test]
    fn context_keeps_signature_only_for_redacted_logging() {
        let config = proxy_config("k", &["example.com"]);
        let origins = validator(&config);
        let url = "https://example.com/a.jpg";
        let sig = sign(&SignedMessage::UrlOnly { url }, "k");

        let raw = RawParams::from_path(&format!("sig:{}/{}", sig, encode_base64url(url))).unwrap();
        let ctx = build_read_context(raw, &config, &origins).unwrap();
        assert_eq!(ctx.signature.as_deref(), Some(sig.as_str()));
        assert!(!ctx.token_presented);

        let logged = ctx.signature_for_log();
        assert!(logged.ends_with("***"));
        assert!(!logged.contains(&sig[6..]));

        let raw = RawParams::from_path(&encode_base64url(url)).unwrap();
        let unsigned = build_read_context(raw, &config, &origins).unwrap();
        assert_eq!(unsigned.signature_for_log(), "none");
    }

    #[test]
    fn upload_context_token_mode() {
        let config = proxy_config("k", &[]);
        let raw = RawParams::from_path("t:app-token/q:50").unwrap();
        assert!(build_upload_context(raw, &config).is_ok());

        let raw = RawParams::from_path("t:wrong/q:50").unwrap();
        assert!(build_upload_context(raw, &config).is_err());

        let raw = RawParams::from_path("q:50").unwrap();
        assert!(build_upload_context(raw, &config).is_err());
    }

    #[test]
    fn upload_context_signed_location_mode() {
        let config = proxy_config("k", &[]);
        let location = "uploads/a.png";
        let sig = sign(&SignedMessage::LocationOnly { location }, "k");
        let raw =
            RawParams::from_path(&format!("loc:{}/sig:{}", encode_base64url(location), sig))
                .unwrap();
        let ctx = build_upload_context(raw, &config).unwrap();
        assert_eq!(ctx.custom_object_key.as_deref(), Some(location));
    }

    #[test]
    fn video_upload_admission() {
        let config = proxy_config("k", &[]);
        let location = "videos/v.mp4";
        let deadline = 2_000_000_000i64;
        let sig = sign(&SignedMessage::Upload { deadline, location }, "k");
        let encoded = encode_base64url(location);

        let ok = validate_video_upload(
            Some("2000000000"),
            Some(&encoded),
            Some(&sig),
            1_900_000_000,
            &config,
        )
        .unwrap();
        assert_eq!(ok, location);

        // expired deadline
        let err = validate_video_upload(
            Some("2000000000"),
            Some(&encoded),
            Some(&sig),
            2_100_000_000,
            &config,
        )
        .unwrap_err();
        assert_eq!(err.kind(), "auth_failed");

        // missing pieces
        assert!(validate_video_upload(None, Some(&encoded), Some(&sig), 0, &config).is_err());
        assert!(
            validate_video_upload(Some("2000000000"), None, Some(&sig), 0, &config).is_err()
        );
        assert!(
            validate_video_upload(Some("2000000000"), Some(&encoded), None, 0, &config).is_err()
        );
    }
}
