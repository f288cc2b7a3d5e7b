//! Transport error taxonomy.

use thiserror::Error;

/// Errors from a single tile download.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The server did not answer in time. The tile may be retried later.
    #[error("Request to {url} timed out")]
    Timeout { url: String },

    /// The connection could not be established.
    #[error("Host unreachable for {url}: {reason}")]
    Unreachable { url: String, reason: String },

    /// The host name could not be resolved.
    #[error("Unknown host for {url}: {reason}")]
    UnknownHost { url: String, reason: String },

    /// The server answered, but not with a tile.
    #[error("Protocol error from {url}: {reason}")]
    Protocol { url: String, reason: String },

    /// The request was cancelled before it completed.
    #[error("Request cancelled")]
    Cancelled,

    /// The HTTP client itself could not be set up.
    #[error("HTTP client error: {0}")]
    Client(String),
}

impl TransportError {
    /// Whether the failure is worth retrying against the fallback host.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TransportError::Timeout { .. }
                | TransportError::Unreachable { .. }
                | TransportError::UnknownHost { .. }
        )
    }

    /// Whether the tile should be reported as delayed rather than failed.
    pub fn is_delayed(&self) -> bool {
        matches!(self, TransportError::Timeout { .. })
    }

    /// The URL the failing request was sent to, if any.
    pub fn url(&self) -> Option<&str> {
        match self {
            TransportError::Timeout { url }
            | TransportError::Unreachable { url, .. }
            | TransportError::UnknownHost { url, .. }
            | TransportError::Protocol { url, .. } => Some(url),
            TransportError::Cancelled | TransportError::Client(_) => None,
        }
    }
}
