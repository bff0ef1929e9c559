// ABOUTME: Error taxonomy for the gateway adapter
// ABOUTME: Classifies every failure mode; none of these are process-fatal

use thiserror::Error;

/// Errors produced by the adapter's protocol machinery.
///
/// Decode and UnknownKind are raised per-frame and never escape the
/// connection loop. DuplicateCorrelation and Timeout surface to command
/// callers. Handler, Close, and Shutdown are logged where they occur and
/// swallowed so the owning loop keeps running.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("failed to decode frame as JSON: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("unknown post_type: {post_type}")]
    UnknownKind { post_type: String },

    #[error("correlation id already pending: {id}")]
    DuplicateCorrelation { id: String },

    #[error("no response for correlation id {id} before deadline")]
    Timeout { id: String },

    #[error("event handler failed for {kind}: {cause}")]
    Handler {
        kind: &'static str,
        cause: anyhow::Error,
    },

    #[error("failed to close gateway session: {0}")]
    Close(anyhow::Error),

    #[error("shutdown error: {0}")]
    Shutdown(String),
}

impl AdapterError {
    /// Short code used as a log field and metrics label.
    pub fn code(&self) -> &'static str {
        match self {
            AdapterError::Decode(_) => "decode_error",
            AdapterError::UnknownKind { .. } => "unknown_kind",
            AdapterError::DuplicateCorrelation { .. } => "duplicate_correlation",
            AdapterError::Timeout { .. } => "timeout",
            AdapterError::Handler { .. } => "handler_error",
            AdapterError::Close(_) => "close_error",
            AdapterError::Shutdown(_) => "shutdown_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        let timeout = AdapterError::Timeout {
            id: "abc".to_string(),
        };
        assert_eq!(timeout.code(), "timeout");

        let dup = AdapterError::DuplicateCorrelation {
            id: "abc".to_string(),
        };
        assert_eq!(dup.code(), "duplicate_correlation");

        let unknown = AdapterError::UnknownKind {
            post_type: "request".to_string(),
        };
        assert_eq!(unknown.code(), "unknown_kind");
    }

    #[test]
    fn test_display_includes_correlation_id() {
        let err = AdapterError::Timeout {
            id: "cmd-42".to_string(),
        };
        assert!(err.to_string().contains("cmd-42"));
    }

    #[test]
    fn test_decode_wraps_serde_error() {
        let serde_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err = AdapterError::from(serde_err);
        assert_eq!(err.code(), "decode_error");
    }
}
