//! Core traits for the transactional tile cache.
//!
//! A [`TileCache`] answers lookups and hands out [`CacheWriter`]s. A writer
//! stages bytes privately; nothing it holds is visible to lookups until
//! `commit(true)`. Committing `false` or dropping the writer discards the
//! staged bytes and leaves any earlier entry untouched.
//!
//! # Dyn Compatibility
//!
//! Async methods return boxed futures so stores can be shared as
//! `Arc<dyn TileCache>`.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use thiserror::Error;

use crate::coord::TileAddress;

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Errors that can occur during cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// I/O error during cache operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Tile address cannot be stored (outside the grid).
    #[error("Invalid cache key: {0}")]
    InvalidKey(TileAddress),
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub commits: u64,
    pub aborts: u64,
}

impl CacheStats {
    /// Hit rate as a fraction in [0, 1].
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hits {} / misses {} ({:.1}%), commits {}, aborts {}",
            self.hits,
            self.misses,
            self.hit_rate() * 100.0,
            self.commits,
            self.aborts
        )
    }
}

/// Read-through, write-back store for raw tile bytes.
///
/// # Thread Safety
///
/// Writers for different addresses are independent. Writers for the same
/// address may run concurrently; the last one to commit wins.
pub trait TileCache: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Looks up the committed bytes for a tile.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(data))` if an entry was committed
    /// - `Ok(None)` on a miss
    /// - `Err(_)` if the store failed
    fn lookup(&self, address: &TileAddress) -> BoxFuture<'_, Result<Option<Bytes>, CacheError>>;

    /// Opens a write transaction for a tile.
    fn begin_write(
        &self,
        address: &TileAddress,
    ) -> BoxFuture<'_, Result<Box<dyn CacheWriter>, CacheError>>;

    /// Current counters.
    fn stats(&self) -> CacheStats;
}

/// An open write transaction.
pub trait CacheWriter: Send {
    /// The tile being written.
    fn address(&self) -> TileAddress;

    /// Appends bytes to the staged entry.
    fn write(&mut self, bytes: &[u8]) -> Result<(), CacheError>;

    /// Finishes the transaction.
    ///
    /// `true` publishes the staged bytes atomically; `false` discards them.
    fn commit(self: Box<Self>, success: bool) -> BoxFuture<'static, Result<(), CacheError>>;
}
