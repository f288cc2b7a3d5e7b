//! On-disk tile cache.
//!
//! Entries live at `{root}/{z}/{x}/{y}.tile`. A commit writes the staged
//! bytes to a uniquely named temporary file in the same directory and then
//! renames it over the final path, so readers see either the old entry or
//! the new one, never a partial file.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tracing::{trace, warn};

use super::traits::{BoxFuture, CacheError, CacheStats, CacheWriter, TileCache};
use super::CacheCounters;
use crate::coord::TileAddress;

const TILE_EXTENSION: &str = "tile";

/// Distinguishes temporary files written concurrently by this process.
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// File-per-tile cache rooted at a directory.
pub struct DiskTileCache {
    root: PathBuf,
    counters: Arc<CacheCounters>,
}

impl DiskTileCache {
    /// Creates a cache rooted at `root`. Directories are created on demand.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            counters: Arc::new(CacheCounters::default()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Final path of a tile's entry.
    pub fn tile_path(&self, address: &TileAddress) -> PathBuf {
        tile_path(&self.root, address)
    }
}

fn tile_path(root: &Path, address: &TileAddress) -> PathBuf {
    root.join(address.zoom.to_string())
        .join(address.x.to_string())
        .join(format!("{}.{}", address.y, TILE_EXTENSION))
}

impl TileCache for DiskTileCache {
    fn name(&self) -> &str {
        "disk"
    }

    fn lookup(&self, address: &TileAddress) -> BoxFuture<'_, Result<Option<Bytes>, CacheError>> {
        let address = *address;
        Box::pin(async move {
            if !address.is_valid() {
                return Err(CacheError::InvalidKey(address));
            }
            let path = self.tile_path(&address);
            match tokio::fs::read(&path).await {
                Ok(data) => {
                    self.counters.hit();
                    Ok(Some(Bytes::from(data)))
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    self.counters.miss();
                    Ok(None)
                }
                Err(e) => {
                    warn!(tile = %address, path = %path.display(), error = %e, "Disk cache read failed");
                    Err(CacheError::Io(e))
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
            if !address.is_valid() {
                return Err(CacheError::InvalidKey(address));
            }
            let writer: Box<dyn CacheWriter> = Box::new(DiskCacheWriter {
                path: self.tile_path(&address),
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

struct DiskCacheWriter {
    path: PathBuf,
    counters: Arc<CacheCounters>,
    address: TileAddress,
    staged: Vec<u8>,
    finished: bool,
}

impl DiskCacheWriter {
    fn temp_path(&self) -> PathBuf {
        let id = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let name = format!(
            ".{}.{}.{}.tmp",
            self.address.y,
            std::process::id(),
            id
        );
        self.path.with_file_name(name)
    }
}

impl CacheWriter for DiskCacheWriter {
    fn address(&self) -> TileAddress {
        self.address
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), CacheError> {
        self.staged.extend_from_slice(bytes);
        Ok(())
    }

    fn commit(mut self: Box<Self>, success: bool) -> BoxFuture<'static, Result<(), CacheError>> {
        self.finished = true;
        let counters = Arc::clone(&self.counters);
        let address = self.address;

        if !success {
            counters.abort();
            trace!(tile = %address, "Disk cache write aborted");
            return Box::pin(async { Ok(()) });
        }

        let staged = std::mem::take(&mut self.staged);
        let path = self.path.clone();
        let temp = self.temp_path();
        Box::pin(async move {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            if let Err(e) = tokio::fs::write(&temp, &staged).await {
                let _ = tokio::fs::remove_file(&temp).await;
                warn!(tile = %address, error = %e, "Disk cache write failed");
                counters.abort();
                return Err(CacheError::Io(e));
            }
            if let Err(e) = tokio::fs::rename(&temp, &path).await {
                let _ = tokio::fs::remove_file(&temp).await;
                warn!(tile = %address, error = %e, "Disk cache rename failed");
                counters.abort();
                return Err(CacheError::Io(e));
            }
            counters.commit();
            trace!(tile = %address, path = %path.display(), "Disk cache entry committed");
            Ok(())
        })
    }
}

impl Drop for DiskCacheWriter {
    fn drop(&mut self) {
        if !self.finished {
            self.counters.abort();
        }
    }
}
