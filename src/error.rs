//! Error types for the career-inbox library.
//!
//! This module provides custom error types using `thiserror`. Every failure the
//! library can produce maps onto a small closed set of [`ErrorKind`]s, which is
//! what the UI-facing [`OperationResult`] reports.

use serde::Serialize;
use thiserror::Error;

/// Errors that can occur in the career-inbox library.
#[derive(Error, Debug)]
pub enum AllocatorError {
    /// A referenced company, message, pattern, account or event does not exist
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record that was looked up
        entity: &'static str,
        /// Identifier that was looked up
        id: i64,
    },

    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Connection pool errors
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// The external completion command failed, timed out or produced unusable output
    #[error("External command failed: {0}")]
    ExternalInvocation(String),

    /// Input rejected before reaching the store
    #[error("Validation failed: {0}")]
    Validation(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A store call on the blocking pool panicked or was cancelled
    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Convenience type alias for Result with `AllocatorError`
pub type Result<T> = std::result::Result<T, AllocatorError>;

/// Closed set of failure categories surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Referenced entity is missing
    NotFound,
    /// Store-level failure
    PersistenceFailure,
    /// Subprocess error, timeout or malformed output
    ExternalInvocationFailure,
    /// Rejected input
    ValidationFailure,
    /// Bad configuration
    Configuration,
}

impl ErrorKind {
    /// Label used in logs and metrics
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::PersistenceFailure => "persistence_failure",
            Self::ExternalInvocationFailure => "external_invocation_failure",
            Self::ValidationFailure => "validation_failure",
            Self::Configuration => "configuration",
        }
    }
}

impl AllocatorError {
    /// Shorthand for a [`AllocatorError::NotFound`] error.
    #[must_use]
    pub const fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }

    /// Category of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Database(_) | Self::Pool(_) | Self::Io(_) | Self::Task(_) => ErrorKind::PersistenceFailure,
            Self::ExternalInvocation(_) | Self::Serialization(_) => ErrorKind::ExternalInvocationFailure,
            Self::Validation(_) => ErrorKind::ValidationFailure,
            Self::InvalidConfig(_) => ErrorKind::Configuration,
        }
    }

    /// True when the error means a referenced record is missing.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<config::ConfigError> for AllocatorError {
    fn from(err: config::ConfigError) -> Self {
        Self::InvalidConfig(err.to_string())
    }
}

/// Tagged result handed to UI callers: a success flag plus either data or an error message.
#[derive(Debug, Clone, Serialize)]
pub struct OperationResult<T> {
    /// Whether the operation succeeded
    pub success: bool,
    /// Payload on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Human-readable error on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Error category on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl<T> OperationResult<T> {
    /// Successful result carrying `data`
    pub const fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            error_kind: None,
        }
    }

    /// Failed result built from an error
    pub fn failed(err: &AllocatorError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(err.to_string()),
            error_kind: Some(err.kind()),
        }
    }
}

impl<T> From<Result<T>> for OperationResult<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(err) => Self::failed(&err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_kind_and_message() {
        let err = AllocatorError::not_found("company", 7);
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.to_string(), "company not found: 7");
    }

    #[test]
    fn test_operation_result_from_error() {
        let result: OperationResult<()> = Err(AllocatorError::Validation("empty".into())).into();
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::ValidationFailure));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["success"], false);
        assert!(json.get("data").is_none());
    }
}
