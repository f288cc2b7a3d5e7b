//! Concurrent request execution.
//!
//! The [`WorkerPool`] runs a fixed number of workers that pull
//! [`FetchRequest`](crate::fetch::FetchRequest)s from a bounded queue and
//! drive each through a shared
//! [`FetchOrchestrator`](crate::fetch::FetchOrchestrator).

mod pool;

pub use pool::{RequestHandle, WorkerPool};

use std::fmt;

use thiserror::Error;

/// Default number of workers.
pub const DEFAULT_WORKER_COUNT: usize = 4;

/// Default request queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Errors from the worker pool.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("Worker pool is shutting down")]
    ShuttingDown,

    #[error("Request queue is full")]
    QueueFull,

    #[error("Invalid pool configuration: {0}")]
    InvalidConfig(String),
}

/// Worker pool sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub workers: usize,
    pub queue_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKER_COUNT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.workers == 0 {
            return Err(PoolError::InvalidConfig("at least one worker is required".into()));
        }
        if self.queue_capacity == 0 {
            return Err(PoolError::InvalidConfig("queue capacity must be positive".into()));
        }
        Ok(())
    }
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub submitted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub delayed: u64,
    pub cancelled: u64,
}

impl PoolStats {
    /// Requests that reached a final outcome.
    pub fn completed(&self) -> u64 {
        self.succeeded + self.failed + self.delayed + self.cancelled
    }

    /// Requests still queued or in flight.
    pub fn pending(&self) -> u64 {
        self.submitted.saturating_sub(self.completed())
    }
}

impl fmt::Display for PoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} submitted: {} ok, {} failed, {} delayed, {} cancelled",
            self.submitted, self.succeeded, self.failed, self.delayed, self.cancelled
        )
    }
}
