//! Tile fetch orchestration
//!
//! The [`FetchOrchestrator`] takes one [`FetchRequest`] through cache
//! lookup, network fetch, decoding and cache commit, then reports the result
//! to the request's [`TileSink`] as a tri-state outcome: success, failed or
//! delayed. Cancelled requests are dropped silently.

mod orchestrator;
mod types;

pub use orchestrator::FetchOrchestrator;
pub use types::{FailureReason, FetchError, FetchOutcome, FetchRequest, TileSink};

#[cfg(test)]
pub(crate) use orchestrator::tests::RecordingSink;
