use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure taxonomy for the dispatch pipeline.
///
/// Only `Transient` and `Timeout` are retried; everything else is terminal
/// on first occurrence.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Bad input, rejected before any dispatch work
    #[error("invalid request: {0}")]
    Validation(String),

    /// Network failure or provider-side rate limiting, worth retrying
    #[error("transient provider error: {0}")]
    Transient(String),

    /// Authentication or bad-request failure, never retried
    #[error("permanent provider error: {0}")]
    Permanent(String),

    /// Provider call exceeded the configured deadline
    #[error("request timed out after {0}s")]
    Timeout(u64),

    /// Batch was cancelled while this item was pending or in flight
    #[error("batch cancelled")]
    Cancelled,

    #[error("cache i/o error: {0}")]
    Cache(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DispatchError {
    /// Whether the retry loop should attempt this failure again.
    pub fn is_transient(&self) -> bool {
        matches!(self, DispatchError::Transient(_) | DispatchError::Timeout(_))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::Validation(_) => ErrorKind::Validation,
            DispatchError::Transient(_) => ErrorKind::Transient,
            DispatchError::Permanent(_) => ErrorKind::Permanent,
            DispatchError::Timeout(_) => ErrorKind::Timeout,
            DispatchError::Cancelled => ErrorKind::Cancelled,
            DispatchError::Cache(_) => ErrorKind::Cache,
            DispatchError::Serialization(_) => ErrorKind::Serialization,
        }
    }
}

/// Serializable tag carried by error-tagged responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Transient,
    Permanent,
    Timeout,
    Cancelled,
    Cache,
    Serialization,
}
