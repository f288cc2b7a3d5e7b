//! Fetch request, outcome and sink types

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::coord::TileAddress;
use crate::decode::{DecodeError, DecodedTile};
use crate::transport::TransportError;

/// Why a tile could not be delivered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("Zoom {zoom} outside source range {min}..={max}")]
    ZoomOutOfRange { zoom: u8, min: u8, max: u8 },

    #[error("Tile {0} lies outside the tile grid")]
    InvalidAddress(TileAddress),
}

/// Failure details handed to a [`TileSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureReason {
    /// The tile timed out and may succeed if requested again later.
    pub delayed: bool,
    pub error: FetchError,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.delayed {
            write!(f, "delayed: {}", self.error)
        } else {
            write!(f, "failed: {}", self.error)
        }
    }
}

/// Final state of one fetch request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Tile decoded and delivered.
    Success,
    /// Permanent failure for this request.
    Failed(FetchError),
    /// Transient failure (timeout). Worth requesting again later.
    Delayed(FetchError),
    /// Request was cancelled. The sink was not called.
    Cancelled,
}

impl FetchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, FetchOutcome::Success)
    }

    pub fn label(&self) -> &'static str {
        match self {
            FetchOutcome::Success => "success",
            FetchOutcome::Failed(_) => "failed",
            FetchOutcome::Delayed(_) => "delayed",
            FetchOutcome::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for FetchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchOutcome::Failed(e) | FetchOutcome::Delayed(e) => {
                write!(f, "{}: {}", self.label(), e)
            }
            _ => f.write_str(self.label()),
        }
    }
}

/// Receives the result of each request.
///
/// Each request produces at most one call. Cancelled requests produce none.
/// Calls may arrive from any worker task, in any order.
pub trait TileSink: Send + Sync {
    fn on_tile_ready(&self, address: TileAddress, tile: DecodedTile);

    fn on_tile_failed(&self, address: TileAddress, reason: FailureReason);
}

/// One tile to fetch and where to report it.
#[derive(Clone)]
pub struct FetchRequest {
    pub address: TileAddress,
    pub sink: Arc<dyn TileSink>,
}

impl FetchRequest {
    pub fn new(address: TileAddress, sink: Arc<dyn TileSink>) -> Self {
        Self { address, sink }
    }
}

impl fmt::Debug for FetchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchRequest")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Pipeline stage, used in trace logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FetchStage {
    CacheLookup,
    DecodingCached,
    NetworkFetch,
    DecodingNetwork,
    CacheCommit,
    Delivered,
}

impl fmt::Display for FetchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FetchStage::CacheLookup => "cache-lookup",
            FetchStage::DecodingCached => "decoding-cached",
            FetchStage::NetworkFetch => "network-fetch",
            FetchStage::DecodingNetwork => "decoding-network",
            FetchStage::CacheCommit => "cache-commit",
            FetchStage::Delivered => "delivered",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_display() {
        let outcome = FetchOutcome::Delayed(FetchError::Transport(TransportError::Timeout {
            url: "https://a.example/0/0/0.png".into(),
        }));
        assert_eq!(
            outcome.to_string(),
            "delayed: Request to https://a.example/0/0/0.png timed out"
        );
        assert_eq!(FetchOutcome::Cancelled.to_string(), "cancelled");
    }

    #[test]
    fn test_failure_reason_display() {
        let reason = FailureReason {
            delayed: false,
            error: FetchError::ZoomOutOfRange {
                zoom: 22,
                min: 0,
                max: 20,
            },
        };
        assert_eq!(reason.to_string(), "failed: Zoom 22 outside source range 0..=20");
    }
}
