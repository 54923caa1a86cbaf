use std::fmt;

// ---------------------------------------------------------------------------
// Sensitive field redaction
// ---------------------------------------------------------------------------

/// A wrapper that redacts its contents when displayed or debug-printed.
///
/// Signatures, admission tokens and upload tokens must never appear in
/// logs in clear.
///
/// Usage:
/// ```ignore
/// tracing::info!(signature = %Redacted::new(sig), "admission check");
/// ```
#[derive(Clone)]
pub struct Redacted<T>(T);

impl<T> Redacted<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }
}

impl<T> fmt::Display for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T> fmt::Debug for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

/// Redact a hex signature for logging: first 6 chars only.
pub fn redact_signature(sig: &str) -> String {
    if sig.len() <= 6 {
        return "***".to_string();
    }
    format!("{}***", &sig[..6])
}
