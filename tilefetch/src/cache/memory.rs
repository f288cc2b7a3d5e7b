//! In-memory tile cache with size-weighted eviction using moka.
//!
//! Moka's `future::Cache` uses lock-free structures internally, so lookups
//! and commits never block the Tokio runtime.

use std::sync::Arc;

use bytes::Bytes;
use moka::future::Cache;
use tracing::trace;

use super::traits::{BoxFuture, CacheError, CacheStats, CacheWriter, TileCache};
use super::CacheCounters;
use crate::coord::TileAddress;

/// Default memory budget: 256 MiB.
pub const DEFAULT_MEMORY_CACHE_SIZE: u64 = 256 * 1024 * 1024;

/// Size-bounded in-memory tile cache.
pub struct MemoryTileCache {
    cache: Cache<TileAddress, Bytes>,
    max_size_bytes: u64,
    counters: Arc<CacheCounters>,
}

impl MemoryTileCache {
    /// Creates a cache holding at most `max_size_bytes` of tile data.
    pub fn new(max_size_bytes: u64) -> Self {
        let cache = Cache::builder()
            // moka weights are u32; cap very large entries
            .weigher(|_key: &TileAddress, value: &Bytes| -> u32 {
                value.len().min(u32::MAX as usize) as u32
            })
            .max_capacity(max_size_bytes)
            .build();

        Self {
            cache,
            max_size_bytes,
            counters: Arc::new(CacheCounters::default()),
        }
    }

    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_bytes
    }

    /// Approximate number of committed entries.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl Default for MemoryTileCache {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_CACHE_SIZE)
    }
}

impl TileCache for MemoryTileCache {
    fn name(&self) -> &str {
        "memory"
    }

    fn lookup(&self, address: &TileAddress) -> BoxFuture<'_, Result<Option<Bytes>, CacheError>> {
        let address = *address;
        Box::pin(async move {
            match self.cache.get(&address).await {
                Some(data) => {
                    self.counters.hit();
                    Ok(Some(data))
                }
                None => {
                    self.counters.miss();
                    Ok(None)
                }
            }
        })
    }

    fn begin_write(
        &self,
        address: &TileAddress,
    ) -> BoxFuture<'_, Result<Box<dyn CacheWriter>, CacheError>> {
        let address = *address;
        Box::pin(async move {
            let writer: Box<dyn CacheWriter> = Box::new(MemoryCacheWriter {
                cache: self.cache.clone(),
                counters: Arc::clone(&self.counters),
                address,
                staged: Vec::new(),
                finished: false,
            });
            Ok(writer)
        })
    }

    fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }
}

struct MemoryCacheWriter {
    cache: Cache<TileAddress, Bytes>,
    counters: Arc<CacheCounters>,
    address: TileAddress,
    staged: Vec<u8>,
    finished: bool,
}

impl CacheWriter for MemoryCacheWriter {
    fn address(&self) -> TileAddress {
        self.address
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), CacheError> {
        self.staged.extend_from_slice(bytes);
        Ok(())
    }

    fn commit(mut self: Box<Self>, success: bool) -> BoxFuture<'static, Result<(), CacheError>> {
        self.finished = true;
        let staged = std::mem::take(&mut self.staged);
        let cache = self.cache.clone();
        let counters = Arc::clone(&self.counters);
        let address = self.address;
        Box::pin(async move {
            if success {
                cache.insert(address, Bytes::from(staged)).await;
                counters.commit();
                trace!(tile = %address, "Memory cache entry committed");
            } else {
                counters.abort();
                trace!(tile = %address, "Memory cache write aborted");
            }
            Ok(())
        })
    }
}

impl Drop for MemoryCacheWriter {
    fn drop(&mut self) {
        if !self.finished {
            self.counters.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TILE: TileAddress = TileAddress::new(1, 2, 3);

    async fn put(cache: &MemoryTileCache, data: &[u8]) {
        let mut writer = cache.begin_write(&TILE).await.unwrap();
        writer.write(data).unwrap();
        writer.commit(true).await.unwrap();
    }

    #[tokio::test]
    async fn test_miss_is_not_an_error() {
        let cache = MemoryTileCache::default();
        assert!(cache.lookup(&TILE).await.unwrap().is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test]
    async fn test_commit_then_lookup() {
        let cache = MemoryTileCache::default();
        let mut writer = cache.begin_write(&TILE).await.unwrap();
        writer.write(b"ab").unwrap();
        writer.write(b"cd").unwrap();
        writer.commit(true).await.unwrap();

        let data = cache.lookup(&TILE).await.unwrap();
        assert_eq!(data, Some(Bytes::from_static(b"abcd")));
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.commits, 1);
    }

    #[tokio::test]
    async fn test_uncommitted_write_is_invisible() {
        let cache = MemoryTileCache::default();
        let mut writer = cache.begin_write(&TILE).await.unwrap();
        writer.write(b"partial").unwrap();
        assert!(cache.lookup(&TILE).await.unwrap().is_none());
        writer.commit(true).await.unwrap();
        assert!(cache.lookup(&TILE).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_abort_leaves_no_entry() {
        let cache = MemoryTileCache::default();
        let mut writer = cache.begin_write(&TILE).await.unwrap();
        writer.write(b"garbage").unwrap();
        writer.commit(false).await.unwrap();

        assert!(cache.lookup(&TILE).await.unwrap().is_none());
        assert_eq!(cache.stats().aborts, 1);
    }

    #[tokio::test]
    async fn test_abort_preserves_previous_entry() {
        let cache = MemoryTileCache::default();
        put(&cache, b"good").await;

        let mut writer = cache.begin_write(&TILE).await.unwrap();
        writer.write(b"bad").unwrap();
        writer.commit(false).await.unwrap();

        assert_eq!(
            cache.lookup(&TILE).await.unwrap(),
            Some(Bytes::from_static(b"good"))
        );
    }

    #[tokio::test]
    async fn test_dropped_writer_aborts() {
        let cache = MemoryTileCache::default();
        {
            let mut writer = cache.begin_write(&TILE).await.unwrap();
            writer.write(b"lost").unwrap();
        }
        assert!(cache.lookup(&TILE).await.unwrap().is_none());
        assert_eq!(cache.stats().aborts, 1);
    }

    #[tokio::test]
    async fn test_finished_writer_counts_once() {
        let cache = MemoryTileCache::default();
        put(&cache, b"kept").await;

        let writer = cache.begin_write(&TILE).await.unwrap();
        writer.commit(false).await.unwrap();

        let stats = cache.stats();
        assert_eq!((stats.commits, stats.aborts), (1, 1));
    }

    #[tokio::test]
    async fn test_last_commit_wins() {
        let cache = MemoryTileCache::default();
        let mut first = cache.begin_write(&TILE).await.unwrap();
        let mut second = cache.begin_write(&TILE).await.unwrap();
        first.write(b"first").unwrap();
        second.write(b"second").unwrap();
        second.commit(true).await.unwrap();
        first.commit(true).await.unwrap();

        assert_eq!(
            cache.lookup(&TILE).await.unwrap(),
            Some(Bytes::from_static(b"first"))
        );
    }

    #[tokio::test]
    async fn test_addresses_are_independent() {
        let cache = MemoryTileCache::default();
        put(&cache, b"one").await;
        let other = TileAddress::new(2, 2, 3);
        assert!(cache.lookup(&other).await.unwrap().is_none());
    }
}
