//! Error types for the migration library.

use thiserror::Error;

/// Outcome classes reported by a backend client.
///
/// Soft classes (`NotFound`, `Conflict`, `Unsupported`) are expected states
/// that callers branch on. `Timeout` is kept apart from the hard errors so
/// retry policy can be decided by the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The addressed object does not exist on the backend.
    #[error("not found: {0}")]
    NotFound(String),

    /// The object already exists; the caller should update instead.
    #[error("already exists: {0}")]
    Conflict(String),

    /// The call exceeded its per-call timeout.
    #[error("timed out after {0}s")]
    Timeout(u64),

    /// The backend variant does not implement this operation.
    #[error("operation not supported: {0}")]
    Unsupported(String),

    /// Connection, TLS or DNS failure before a response was received.
    #[error("transport error: {0}")]
    Transport(String),

    /// The backend answered with an unexpected status or body.
    #[error("protocol error (status {status}): {message}")]
    Protocol { status: u16, message: String },

    /// Request rejected locally before any remote call.
    #[error("validation error: {0}")]
    Validation(String),
}

impl BackendError {
    /// Soft outcomes are expected states rather than failures.
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            BackendError::NotFound(_) | BackendError::Conflict(_) | BackendError::Unsupported(_)
        )
    }

    /// The backend received the request and refused it.
    ///
    /// Used to decide whether an alternate verb is worth one more attempt.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            BackendError::NotFound(_)
                | BackendError::Conflict(_)
                | BackendError::Unsupported(_)
                | BackendError::Protocol { .. }
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, BackendError::Timeout(_))
    }

    pub fn protocol(status: u16, message: impl Into<String>) -> Self {
        BackendError::Protocol {
            status,
            message: message.into(),
        }
    }
}

/// Result type for backend client calls.
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Input rejected before any remote call
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Record store failure (systemic)
    #[error("Record store error: {0}")]
    Store(String),

    /// Backend call failed
    #[error("Backend '{backend}' error: {source}")]
    Backend {
        backend: String,
        #[source]
        source: BackendError,
    },

    /// SQLite driver error
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Run was cancelled (SIGINT, etc.)
    #[error("Migration cancelled")]
    Cancelled,
}

impl MigrateError {
    /// Create a Backend error tagged with the backend's name.
    pub fn backend(backend: impl Into<String>, source: BackendError) -> Self {
        MigrateError::Backend {
            backend: backend.into(),
            source,
        }
    }

    /// Create a Store error.
    pub fn store(message: impl Into<String>) -> Self {
        MigrateError::Store(message.into())
    }

    /// Process exit code for this error class.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) | MigrateError::Validation(_) => 2,
            MigrateError::Store(_) | MigrateError::Sqlx(_) => 3,
            MigrateError::Backend { .. } => 4,
            MigrateError::Cancelled => 130,
            MigrateError::Io(_) | MigrateError::Json(_) => 1,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_soft_classes() {
        assert!(BackendError::NotFound("x".into()).is_soft());
        assert!(BackendError::Conflict("x".into()).is_soft());
        assert!(BackendError::Unsupported("x".into()).is_soft());
        assert!(!BackendError::Timeout(10).is_soft());
        assert!(!BackendError::Transport("refused".into()).is_soft());
        assert!(!BackendError::protocol(500, "boom").is_soft());
    }

    #[test]
    fn test_rejection_excludes_timeout_and_transport() {
        assert!(BackendError::protocol(400, "bad").is_rejection());
        assert!(BackendError::Conflict("x".into()).is_rejection());
        assert!(!BackendError::Timeout(10).is_rejection());
        assert!(!BackendError::Transport("reset".into()).is_rejection());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(MigrateError::Config("x".into()).exit_code(), 2);
        assert_eq!(MigrateError::store("down").exit_code(), 3);
        assert_eq!(
            MigrateError::backend("target", BackendError::Timeout(10)).exit_code(),
            4
        );
        assert_eq!(MigrateError::Cancelled.exit_code(), 130);
    }

    #[test]
    fn test_format_detailed_includes_cause() {
        let err = MigrateError::backend("target", BackendError::Timeout(10));
        let detailed = err.format_detailed();
        assert!(detailed.contains("Backend 'target' error"));
        assert!(detailed.contains("Caused by:"));
        assert!(detailed.contains("timed out after 10s"));
    }
}
