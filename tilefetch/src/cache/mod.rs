//! Tile cache stores.
//!
//! Two stores implement the transactional [`TileCache`] contract:
//!
//! - [`MemoryTileCache`]: moka-backed, size-bounded, lost on exit
//! - [`DiskTileCache`]: one file per tile under a root directory
//!
//! Both stage writes in the writer and publish them in one step on commit.

mod disk;
mod memory;
mod traits;

pub use disk::DiskTileCache;
pub use memory::{MemoryTileCache, DEFAULT_MEMORY_CACHE_SIZE};
pub use traits::{BoxFuture, CacheError, CacheStats, CacheWriter, TileCache};

use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters shared by a store and its writers.
#[derive(Debug, Default)]
pub(crate) struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    commits: AtomicU64,
    aborts: AtomicU64,
}

impl CacheCounters {
    pub(crate) fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn commit(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn abort(&self) {
        self.aborts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            aborts: self.aborts.load(Ordering::Relaxed),
        }
    }
}
