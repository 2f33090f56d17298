//! Error types for sp500-sync.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use sp500_core::{SubscriberEmail, ValidationError};

/// Failures of the snapshot slot or the subscriber set.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Nothing has been saved yet, or the cached value expired.
    #[error("no snapshot has been stored yet")]
    NotFound,

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Stored object could not be encoded or decoded.
    #[error("store JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The key-value backend failed or timed out.
    #[error("{backend} backend error: {message}")]
    Backend {
        backend: &'static str,
        message: String,
    },
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound)
    }
}

/// Convenience constructor for [`StoreError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Backend {
            backend: "redis",
            message: err.to_string(),
        }
    }
}

/// The external generation service failed to produce a listing.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("OPENAI_API_KEY is not set")]
    MissingApiKey,

    #[error("upstream request timed out after {0:?}")]
    Timeout(Duration),

    #[error("upstream rate limit exceeded")]
    RateLimited,

    #[error("upstream returned HTTP {status}")]
    Upstream { status: u16 },

    #[error("upstream transport error: {0}")]
    Transport(String),

    #[error("malformed upstream response: {0}")]
    MalformedResponse(String),
}

/// Rejected or failed subscription.
#[derive(Debug, Error)]
pub enum SubscribeError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// A single delivery attempt failed.
#[derive(Debug, Clone, Error)]
#[error("delivery to {recipient} failed: {reason}")]
pub struct NotifyError {
    pub recipient: SubscriberEmail,
    pub reason: String,
}

/// Some, but not necessarily all, deliveries of one change event failed.
#[derive(Debug, Clone, Error)]
#[error("{} of {} deliveries failed", failed.len(), failed.len() + delivered)]
pub struct PartialFailure {
    pub delivered: usize,
    pub failed: BTreeSet<SubscriberEmail>,
}

/// Why a sync run ended in `Failed`.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("external service error: {0}")]
    ExternalService(#[from] FetchError),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("sync run exceeded its {0:?} deadline")]
    DeadlineExceeded(Duration),
}

impl SyncError {
    /// Stable label used in logs and the status payload.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::ExternalService(_) => "external_service",
            SyncError::Storage(_) => "storage",
            SyncError::DeadlineExceeded(_) => "timeout",
        }
    }
}
