//! Error types for the usage monitor.
//!
//! Two layers live here:
//! - [`FetchError`] is the classification of a single refresh attempt. It is
//!   cheap to clone so it can sit in the published state as `last_error`.
//! - [`UsageError`] covers construction and configuration paths (settings
//!   files, credential files, HTTP client setup, a closed controller).

use std::path::PathBuf;
use thiserror::Error;

/// Classified outcome of a failed usage fetch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// No credential available, or the API rejected it after a fresh reload.
    #[error("Unauthorized: credential missing or rejected")]
    Unauthorized,

    #[error("Rate limited, retry after {retry_after_secs:?} seconds")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Server error (HTTP {status})")]
    ServerError { status: u16 },

    /// DNS, TLS, timeout, connection reset.
    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Failed to decode usage response: {message}")]
    Decoding { message: String },

    #[error("Unexpected response (HTTP {status})")]
    InvalidResponse { status: u16 },
}

impl FetchError {
    /// Whether the backoff scheduler should retry after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::RateLimited { .. }
                | FetchError::ServerError { .. }
                | FetchError::Network { .. }
        )
    }

    /// Short machine-friendly label, used in logs and the daemon status line.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Unauthorized => "unauthorized",
            FetchError::RateLimited { .. } => "rate_limited",
            FetchError::ServerError { .. } => "server_error",
            FetchError::Network { .. } => "network_error",
            FetchError::Decoding { .. } => "decoding_error",
            FetchError::InvalidResponse { .. } => "invalid_response",
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Decoding {
            message: err.to_string(),
        }
    }
}

/// Main error type for the usage monitor library.
#[derive(Debug, Error)]
pub enum UsageError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("HTTP client error: {message}")]
    Http {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The controller task has stopped; the handle can no longer be used.
    #[error("Usage controller is not running")]
    ChannelClosed,
}

/// Result type alias for usage monitor operations.
pub type Result<T> = std::result::Result<T, UsageError>;

impl From<serde_json::Error> for UsageError {
    fn from(err: serde_json::Error) -> Self {
        UsageError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for UsageError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        UsageError::ChannelClosed
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for UsageError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        UsageError::ChannelClosed
    }
}

impl UsageError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        UsageError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(FetchError::RateLimited {
            retry_after_secs: None
        }
        .is_retryable());
        assert!(FetchError::ServerError { status: 503 }.is_retryable());
        assert!(FetchError::Network {
            message: "connection reset".into()
        }
        .is_retryable());

        assert!(!FetchError::Unauthorized.is_retryable());
        assert!(!FetchError::Decoding {
            message: "eof".into()
        }
        .is_retryable());
        assert!(!FetchError::InvalidResponse { status: 404 }.is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = FetchError::ServerError { status: 502 };
        assert_eq!(err.to_string(), "Server error (HTTP 502)");

        let err = UsageError::Config {
            message: "bad interval".into(),
        };
        assert_eq!(err.to_string(), "Configuration error: bad interval");
    }

    #[test]
    fn test_fetch_error_converts_into_usage_error() {
        let err: UsageError = FetchError::Unauthorized.into();
        assert!(matches!(err, UsageError::Fetch(FetchError::Unauthorized)));
    }

    #[test]
    fn test_json_errors_convert() {
        let parse = serde_json::from_str::<serde_json::Value>("{ nope").unwrap_err();
        let fetch: FetchError = parse.into();
        assert_eq!(fetch.kind(), "decoding_error");
        assert!(!fetch.is_retryable());

        let parse = serde_json::from_str::<serde_json::Value>("[").unwrap_err();
        assert!(matches!(UsageError::from(parse), UsageError::Json { .. }));
    }

    #[test]
    fn test_io_with_path() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err = UsageError::io_with_path(io, "/tmp/settings.json");
        match err {
            UsageError::Io { path, .. } => {
                assert_eq!(path, Some(PathBuf::from("/tmp/settings.json")));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(FetchError::Unauthorized.kind(), "unauthorized");
        assert_eq!(
            FetchError::InvalidResponse { status: 418 }.kind(),
            "invalid_response"
        );
    }
}
