use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Request-pipeline error taxonomy.
///
/// Every handler failure maps to exactly one kind; the kind fixes the HTTP
/// status. Cache write-back failures are not represented here — they are
/// logged and swallowed by the spawning task.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("{0}")]
    BadInput(String),

    #[error("{0}")]
    AuthFailed(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    TooLarge(String),

    #[error("range not satisfiable")]
    RangeUnsatisfiable,

    #[error("upstream failure: {0}")]
    SourceFailure(String),

    #[error("{0}")]
    Disabled(String),

    /// Required configuration missing at admission time (e.g. a signature
    /// was presented but no HMAC key is set). Surfaced as 403.
    #[error("{0}")]
    Config(String),

    #[error("{0}")]
    Internal(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::BadInput(_) => StatusCode::BAD_REQUEST,
            ProxyError::AuthFailed(_) | ProxyError::Config(_) => StatusCode::FORBIDDEN,
            ProxyError::NotFound(_) => StatusCode::NOT_FOUND,
            ProxyError::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ProxyError::RangeUnsatisfiable => StatusCode::RANGE_NOT_SATISFIABLE,
            ProxyError::SourceFailure(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Disabled(_) => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short label for metrics and structured error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::BadInput(_) => "bad_input",
            ProxyError::AuthFailed(_) => "auth_failed",
            ProxyError::NotFound(_) => "not_found",
            ProxyError::TooLarge(_) => "too_large",
            ProxyError::RangeUnsatisfiable => "range_unsatisfiable",
            ProxyError::SourceFailure(_) => "source_failure",
            ProxyError::Disabled(_) => "disabled",
            ProxyError::Config(_) => "config",
            ProxyError::Internal(_) => "internal",
        }
    }
}

/// Media-pipeline responses carry short text bodies; the upload endpoints
/// build JSON error bodies themselves before this conversion applies.
impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        crate::observability::metrics::inc_request_error(self.kind());
        (status, self.to_string()).into_response()
    }
}

// ---------------------------------------------------------------------------
// Storage errors
// ---------------------------------------------------------------------------

/// Errors originating from the object-store plane.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found at {path}")]
    NotFound { path: String },

    #[error("S3 {operation} failed for {path}: {reason}")]
    OperationFailed {
        operation: &'static str,
        path: String,
        reason: String,
    },

    #[error("retries exhausted for {path}")]
    RetriesExhausted { path: String },
}

impl From<StorageError> for ProxyError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound { path } => {
                ProxyError::NotFound(format!("object not found at {}", path))
            }
            other => ProxyError::Internal(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Session-store errors
// ---------------------------------------------------------------------------

/// Errors originating from the upload session store.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("state store is not configured")]
    Unavailable,

    #[error("upload not found or expired")]
    NotFound,

    #[error("state store error: {0}")]
    Backend(String),
}

impl From<SessionError> for ProxyError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Unavailable => ProxyError::Disabled(e.to_string()),
            SessionError::NotFound => ProxyError::NotFound(e.to_string()),
            SessionError::Backend(reason) => ProxyError::Internal(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_matches_taxonomy() {
        assert_eq!(
            ProxyError::BadInput("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ProxyError::AuthFailed("x".into()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ProxyError::Config("x".into()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ProxyError::NotFound("x".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ProxyError::TooLarge("x".into()).status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            ProxyError::RangeUnsatisfiable.status(),
            StatusCode::RANGE_NOT_SATISFIABLE
        );
        assert_eq!(
            ProxyError::SourceFailure("x".into()).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ProxyError::Disabled("x".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ProxyError::Internal("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn storage_errors_convert_by_kind() {
        let not_found: ProxyError = StorageError::NotFound {
            path: "a/b".into(),
        }
        .into();
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);

        let failed: ProxyError = StorageError::OperationFailed {
            operation: "put",
            path: "a/b".into(),
            reason: "boom".into(),
        }
        .into();
        assert_eq!(failed.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn session_errors_convert_by_kind() {
        let unavailable: ProxyError = SessionError::Unavailable.into();
        assert_eq!(unavailable.status(), StatusCode::SERVICE_UNAVAILABLE);

        let missing: ProxyError = SessionError::NotFound.into();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }
}
