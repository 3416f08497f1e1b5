//! Error taxonomy shared by every layer of the store.

use std::time::Duration;
use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// A point lookup found nothing.
    #[error("{0} not found")]
    NotFound(String),

    /// A unique constraint was violated, or a versioned write lost a race.
    #[error("{0}")]
    Conflict(String),

    /// A required identifying field was missing or malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The caller must wait before repeating the action.
    #[error("rate limited, retry in {}s", wait.as_secs())]
    RateLimited { wait: Duration },

    /// A daily quota has been used up.
    #[error("{0}")]
    LimitExceeded(String),

    /// The underlying engine failed. The payload is engine detail for logs only.
    #[error("storage failure")]
    StorageIo(String),

    /// A stored value could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),
}

impl StoreError {
    pub(crate) fn conflict(msg: impl Into<String>) -> Self {
        StoreError::Conflict(msg.into())
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        StoreError::InvalidArgument(msg.into())
    }

    pub(crate) fn not_found(what: impl Into<String>) -> Self {
        StoreError::NotFound(what.into())
    }

    /// Whether repeating the same idempotent operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::StorageIo(_) => true,
            StoreError::Conflict(msg) => msg.starts_with(CONCURRENT_UPDATE),
            _ => false,
        }
    }

    /// Engine detail behind a `StorageIo`, for logging.
    pub fn detail(&self) -> Option<&str> {
        match self {
            StoreError::StorageIo(detail) => Some(detail),
            _ => None,
        }
    }
}

/// Message prefix of conflicts raised by versioned writes.
pub(crate) const CONCURRENT_UPDATE: &str = "concurrent update";

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::StorageIo(e.to_string())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
