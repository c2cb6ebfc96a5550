//! Error types for the ingestion pipeline
//!
//! Errors are grouped by the stage that raises them. Record-level errors are
//! recovered where they happen (skip + warn); page-level and source-level errors
//! stop only their own source and end up in that source's report.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Upstream response bodies are cut to this many characters in errors and logs
const MAX_BODY_CHARS: usize = 512;

/// Failure of one page attempt against an upstream API
#[derive(Error, Debug)]
pub enum FetchError {
    /// The attempt exceeded the per-attempt timeout
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Connection, DNS or TLS failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Retryable HTTP status (408, 429, 5xx)
    #[error("upstream returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The body was not the JSON document we expected
    #[error("malformed response: {0}")]
    Decode(String),

    /// Non-retryable response; pagination for the source stops
    #[error("request rejected with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
}

impl FetchError {
    /// Classify a non-success HTTP status
    pub fn from_status(status: u16, body: impl AsRef<str>) -> Self {
        let body: String = body.as_ref().chars().take(MAX_BODY_CHARS).collect();
        if status == 408 || status == 429 || (500..600).contains(&status) {
            Self::Status { status, body }
        } else {
            Self::Rejected { status, body }
        }
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Whether another attempt at the same page may succeed
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }

    pub fn kind(&self) -> ErrorKind {
        if self.is_transient() {
            ErrorKind::TransientFetch
        } else {
            ErrorKind::TerminalFetch
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            Self::from_status(status.as_u16(), err.to_string())
        } else if err.is_builder() {
            // a malformed URL never gets better on retry
            Self::Rejected {
                status: 0,
                body: err.to_string(),
            }
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// One upstream record that could not be turned into a typed row
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NormalizationError {
    #[error("record is not a JSON object")]
    NotAnObject,

    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("invalid value for '{field}': {value}")]
    InvalidValue { field: &'static str, value: String },

    #[error("'{field}' out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },
}

impl NormalizationError {
    pub fn invalid(field: &'static str, value: impl fmt::Display) -> Self {
        Self::InvalidValue {
            field,
            value: value.to_string(),
        }
    }
}

/// Failure of a storage operation; a failed commit leaves the table untouched
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("commit timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid table name '{0}': use letters, digits and underscores")]
    InvalidTableName(String),
}

/// Error category attached to every logged failure and to run records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TransientFetch,
    TerminalFetch,
    Normalization,
    StorageWrite,
    Config,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::TransientFetch => "transient_fetch",
            ErrorKind::TerminalFetch => "terminal_fetch",
            ErrorKind::Normalization => "normalization",
            ErrorKind::StorageWrite => "storage_write",
            ErrorKind::Config => "config",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        for status in [408, 429, 500, 502, 503, 599] {
            let err = FetchError::from_status(status, "busy");
            assert!(err.is_transient(), "{status} should be retried");
            assert_eq!(err.kind(), ErrorKind::TransientFetch);
        }
        for status in [400, 401, 403, 404, 422] {
            let err = FetchError::from_status(status, "nope");
            assert!(!err.is_transient(), "{status} should not be retried");
            assert_eq!(err.kind(), ErrorKind::TerminalFetch);
        }
    }

    #[test]
    fn test_timeout_and_decode_are_transient() {
        assert!(FetchError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(FetchError::decode("expected object").is_transient());
        assert!(FetchError::Transport("reset".into()).is_transient());
    }

    #[test]
    fn test_long_bodies_are_truncated() {
        let body = "x".repeat(10_000);
        match FetchError::from_status(503, &body) {
            FetchError::Status { body, .. } => assert_eq!(body.len(), MAX_BODY_CHARS),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_error_kind_strings() {
        assert_eq!(ErrorKind::StorageWrite.to_string(), "storage_write");
        assert_eq!(
            serde_json::to_string(&ErrorKind::TerminalFetch).unwrap_or_default(),
            "\"terminal_fetch\""
        );
    }
}
