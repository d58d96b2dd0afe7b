//! Error taxonomy shared by the reconcilers and the queue runtime.

use serde::{Deserialize, Serialize};

/// Classified failure of a call against the upstream or downstream API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum ClientError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("api error ({code}): {message}")]
    Api { code: u16, message: String },
    #[error("transport: {0}")]
    Transport(String),
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }
}

/// Failure of a single reconciliation run.
///
/// The queue runtime retries everything except [`SyncError::Malformed`]:
/// malformed state was written by someone else and will not fix itself.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("{op} {target} failed: {source}")]
    Remote {
        op: &'static str,
        target: String,
        #[source]
        source: ClientError,
    },
    #[error("malformed {what}: {message}")]
    Malformed { what: &'static str, message: String },
    #[error("spec overlay on {target}: {message}")]
    Overlay { target: String, message: String },
    #[error("mutating {resource}: {message}")]
    Mutation { resource: String, message: String },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("cache error: {0}")]
    Cache(String),
}

impl SyncError {
    pub fn remote(op: &'static str, target: impl ToString, source: ClientError) -> Self {
        Self::Remote { op, target: target.to_string(), source }
    }

    pub fn malformed(what: &'static str, message: impl Into<String>) -> Self {
        Self::Malformed { what, message: message.into() }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Malformed { .. })
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
