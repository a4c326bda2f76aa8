//! Error types for the enrollment sync engine.

use crate::types::CourseId;
use thiserror::Error;

/// Main error type for engine operations.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Permission denied for {0}")]
    PermissionDenied(String),

    #[error("Source unavailable ({source_name}): {message}")]
    SourceUnavailable { source_name: String, message: String },

    #[error("Field update for unknown course: {0}")]
    MergeSkew(CourseId),

    #[error("Engine is not mounted")]
    NotMounted,

    #[error("Invalid subject identifier: {0:?}")]
    InvalidSubject(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}

impl From<RemoteError> for SyncError {
    fn from(e: RemoteError) -> Self {
        SyncError::SourceUnavailable {
            source_name: e.path,
            message: e.message,
        }
    }
}

/// Failure reported by a remote store for a read or a subscription.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{path}: {message}")]
pub struct RemoteError {
    pub path: String,
    pub message: String,
}

impl RemoteError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, SyncError>;
