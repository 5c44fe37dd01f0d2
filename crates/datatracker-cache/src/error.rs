//! Error types for the Datatracker cache.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::uri::UriError;

/// Errors that can occur while answering queries against the cache.
///
/// A missing remote object (HTTP 404 on an item fetch) is not an error: item
/// lookups return `Ok(None)`. Server errors (HTTP 500) and bad range requests
/// (HTTP 400 with a known total) are retried or recovered inside the fetcher and
/// only surface here once recovery is exhausted.
#[derive(Debug, Error)]
pub enum CacheError {
    /// A query named a resource type with no registered cache hints.
    #[error("unknown resource type: {path}")]
    UnknownResourceType { path: String },

    /// A metadata or object file exists but could not be parsed.
    #[error("cache file is corrupt: {}: {source}", path.display())]
    CacheCorrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The remote service answered with a status the fetcher cannot handle.
    #[error("request failed ({status}) for {uri}: {reason}")]
    Fatal {
        uri: String,
        status: u16,
        reason: String,
    },

    /// The server kept failing with HTTP 500 past the backoff ceiling.
    #[error("giving up on {uri} after {}s of backoff", waited.as_secs_f64())]
    BackoffExhausted { uri: String, waited: Duration },

    /// Every single-item request in a bad range failed.
    #[error("no object in range {offset}..{finish} could be retrieved from {uri}")]
    RecoveryExhausted {
        uri: String,
        offset: u64,
        finish: u64,
    },

    /// A URI did not have the expected shape.
    #[error(transparent)]
    InvalidUri(#[from] UriError),

    /// The server answered 200 with a body we could not interpret.
    #[error("invalid response from {uri}: {message}")]
    InvalidResponse { uri: String, message: String },

    /// A typed lookup was given a URI outside the resource type's prefix.
    #[error("{uri} is not a {expected} URI")]
    WrongResourceType { uri: String, expected: String },

    /// The operation was cancelled while waiting.
    #[error("operation cancelled")]
    Cancelled,

    /// Filesystem error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON decoding error outside of cache files.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CacheError {
    /// Whether the error means a configuration or programming mistake rather
    /// than a transient condition.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            CacheError::UnknownResourceType { .. }
                | CacheError::InvalidUri(_)
                | CacheError::WrongResourceType { .. }
        )
    }

    /// Whether the error ends the operation for good: retrying the same call
    /// against the same cache and server would fail the same way.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CacheError::Fatal { .. }
                | CacheError::BackoffExhausted { .. }
                | CacheError::RecoveryExhausted { .. }
                | CacheError::CacheCorrupt { .. }
        ) || self.is_configuration()
    }

    /// HTTP status associated with the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            CacheError::Fatal { status, .. } => Some(*status),
            CacheError::BackoffExhausted { .. } => Some(500),
            CacheError::RecoveryExhausted { .. } => Some(400),
            CacheError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
