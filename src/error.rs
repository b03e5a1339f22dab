//! Typed errors for the ingestion pipeline.
//!
//! Every failure maps to an [`ErrorClass`]. The retry helper and the batch
//! orchestrator dispatch on that class, never on message text.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result alias used across the library.
pub type Result<T> = std::result::Result<T, IngestError>;

/// How the pipeline should react to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Connectivity or timeout failure; retried with backoff.
    Transient,
    /// Fails the same way for the same input; never retried.
    Deterministic,
    /// Ends the batch and must reach the caller untouched.
    Fatal,
}

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("embedding failed: {message}")]
    Embedding { message: String, transient: bool },

    #[error("index store failed: {message}")]
    Store { message: String, transient: bool },

    #[error("conversion failed: {0}")]
    Conversion(String),

    #[error("invalid version: {0}")]
    InvalidVersion(String),

    #[error("invalid source path: {0}")]
    InvalidPath(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("cancelled before processing {0}")]
    Cancelled(PathBuf),

    #[error("batch aborted at {path}: {source}")]
    BatchFailed {
        path: PathBuf,
        #[source]
        source: Box<IngestError>,
    },

    #[error("cache rollback failed after batch error at {path} ({cause}): {source}")]
    RollbackFailed {
        path: PathBuf,
        cause: Box<IngestError>,
        #[source]
        source: Box<IngestError>,
    },
}

impl IngestError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IngestError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        IngestError::Json {
            path: path.into(),
            source,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            IngestError::Embedding { transient, .. } | IngestError::Store { transient, .. } => {
                if *transient {
                    ErrorClass::Transient
                } else {
                    ErrorClass::Deterministic
                }
            }
            IngestError::Io { .. }
            | IngestError::Json { .. }
            | IngestError::Conversion(_)
            | IngestError::InvalidVersion(_)
            | IngestError::InvalidPath(_)
            | IngestError::Config(_) => ErrorClass::Deterministic,
            IngestError::Cancelled(_)
            | IngestError::BatchFailed { .. }
            | IngestError::RollbackFailed { .. } => ErrorClass::Fatal,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// The source file a batch-level error points at, if any.
    pub fn failing_path(&self) -> Option<&Path> {
        match self {
            IngestError::BatchFailed { path, .. }
            | IngestError::RollbackFailed { path, .. }
            | IngestError::Cancelled(path) => Some(path),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for IngestError {
    fn from(err: sqlx::Error) -> Self {
        let transient = match &err {
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => true,
            // SQLITE_BUSY / SQLITE_LOCKED
            sqlx::Error::Database(db) => matches!(db.code().as_deref(), Some("5") | Some("6")),
            _ => false,
        };
        IngestError::Store {
            message: err.to_string(),
            transient,
        }
    }
}
