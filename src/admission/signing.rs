use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::core::error::ProxyError;

type HmacSha256 = Hmac<Sha256>;

// ---------------------------------------------------------------------------
// Request signing schemes
// ---------------------------------------------------------------------------

/// The message a request signature covers, by admission shape.
///
/// Selection rules:
/// - only a source URL        → [`SignedMessage::UrlOnly`]
/// - URL plus custom location → [`SignedMessage::UrlAndLocation`]
/// - only a custom location   → [`SignedMessage::LocationOnly`]
/// - single video upload      → [`SignedMessage::Upload`] (deadline-bound)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignedMessage<'a> {
    UrlOnly { url: &'a str },
    UrlAndLocation { url: &'a str, location: &'a str },
    LocationOnly { location: &'a str },
    Upload { deadline: i64, location: &'a str },
}

impl SignedMessage<'_> {
    /// Compose the exact byte string covered by the HMAC.
    pub fn compose(&self) -> String {
        match self {
            SignedMessage::UrlOnly { url } => (*url).to_string(),
            SignedMessage::UrlAndLocation { url, location } => format!("{}|{}", url, location),
            SignedMessage::LocationOnly { location } => (*location).to_string(),
            SignedMessage::Upload { deadline, location } => format!("{}|{}", deadline, location),
        }
    }
}

/// Verify a lowercase-hex HMAC-SHA256 signature over `message`.
///
/// Comparison is constant-time (`Mac::verify_slice`). An empty `hmac_key`
/// is a configuration failure, not a signature mismatch.
pub fn verify_signature(
    message: &SignedMessage<'_>,
    signature_hex: &str,
    hmac_key: &str,
) -> Result<(), ProxyError> {
    if hmac_key.is_empty() {
        return Err(ProxyError::Config("hmac key is not set".to_string()));
    }

    let provided = hex::decode(signature_hex)
        .map_err(|_| ProxyError::AuthFailed("invalid signature".to_string()))?;

    let mut mac = HmacSha256::new_from_slice(hmac_key.as_bytes())
        .map_err(|e| ProxyError::Internal(format!("hmac init: {}", e)))?;
    mac.update(message.compose().as_bytes());

    mac.verify_slice(&provided)
        .map_err(|_| ProxyError::AuthFailed("invalid signature".to_string()))
}

/// Produce a lowercase-hex signature. Used by tests and by operators
/// minting signed URLs out of band.
pub fn sign(message: &SignedMessage<'_>, hmac_key: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(hmac_key.as_bytes()).expect("hmac accepts any key length");
    mac.update(message.compose().as_bytes());
    hex::encode(mac.finalize().into_bytes())
}
