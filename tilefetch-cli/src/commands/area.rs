//! Area command - fetch every tile covering a bounding box.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tilefetch::coord::{tiles_in_bbox_with_buffer, BoundingBox, TileAddress};
use tilefetch::decode::DecodedTile;
use tilefetch::executor::{PoolStats, RequestHandle, WorkerPool};
use tilefetch::fetch::{FailureReason, FetchOrchestrator, TileSink};
use tilefetch::transport::AsyncHttpClient;

use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for the area command.
pub struct AreaArgs {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
    pub zoom: u8,
    pub buffer: u32,
}

/// Counts results and remembers delayed tiles for a second pass.
struct AreaSink {
    bar: ProgressBar,
    ready: AtomicU64,
    failed: AtomicU64,
    bytes: AtomicU64,
    delayed: Mutex<Vec<TileAddress>>,
}

impl AreaSink {
    fn new(bar: ProgressBar) -> Self {
        Self {
            bar,
            ready: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            delayed: Mutex::new(Vec::new()),
        }
    }

    fn take_delayed(&self) -> Vec<TileAddress> {
        match self.delayed.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl TileSink for AreaSink {
    fn on_tile_ready(&self, _address: TileAddress, tile: DecodedTile) {
        self.ready.fetch_add(1, Ordering::Relaxed);
        self.bytes
            .fetch_add(tile.payload_len() as u64, Ordering::Relaxed);
        self.bar.inc(1);
    }

    fn on_tile_failed(&self, address: TileAddress, reason: FailureReason) {
        if reason.delayed {
            match self.delayed.lock() {
                Ok(mut guard) => guard.push(address),
                Err(poisoned) => poisoned.into_inner().push(address),
            }
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
            warn!(tile = %address, error = %reason.error, "Tile failed");
        }
        self.bar.inc(1);
    }
}

fn progress_bar(len: u64) -> ProgressBar {
    let bar = ProgressBar::new(len);
    if let Ok(style) = ProgressStyle::with_template(
        "{spinner} {wide_bar} {pos:>7}/{len:7} {per_sec:>12} {elapsed_precise} eta {eta}",
    ) {
        bar.set_style(style.progress_chars("=> "));
    }
    bar
}

/// Runs one pass over `tiles` on a fresh pool.
///
/// Submission stops and outstanding requests are cancelled once `cancel`
/// fires.
async fn fetch_pass<C>(
    runner: &CliRunner,
    orchestrator: &Arc<FetchOrchestrator<C>>,
    tiles: &[TileAddress],
    sink: &Arc<AreaSink>,
    cancel: &CancellationToken,
) -> Result<PoolStats, CliError>
where
    C: AsyncHttpClient + 'static,
{
    let pool = WorkerPool::start(Arc::clone(orchestrator), runner.config().pool_config())?;
    let handles: Arc<Mutex<Vec<RequestHandle>>> = Arc::new(Mutex::new(Vec::new()));

    let watcher = {
        let cancel = cancel.clone();
        let handles = Arc::clone(&handles);
        tokio::spawn(async move {
            cancel.cancelled().await;
            if let Ok(handles) = handles.lock() {
                handles.iter().for_each(RequestHandle::cancel);
            }
        })
    };

    for tile in tiles {
        if cancel.is_cancelled() {
            break;
        }
        let sink: Arc<dyn TileSink> = sink.clone();
        let handle = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            handle = pool.submit_wait(*tile, sink) => handle?,
        };
        if cancel.is_cancelled() {
            handle.cancel();
        }
        if let Ok(mut guard) = handles.lock() {
            guard.push(handle);
        }
    }

    let stats = pool.drain().await;
    watcher.abort();
    Ok(stats)
}

/// Run the area command.
pub fn run(runner: &CliRunner, args: AreaArgs) -> Result<(), CliError> {
    runner.log_startup("area");
    let bbox = BoundingBox::new(args.min_lat, args.min_lon, args.max_lat, args.max_lon)?;
    let tiles = tiles_in_bbox_with_buffer(&bbox, args.zoom, args.buffer)?;

    let orchestrator = runner.orchestrator()?;
    let cancel = runner.interrupt_token()?;
    let runtime = runner.runtime()?;

    println!(
        "Fetching {} tiles at zoom {} from {}",
        tiles.len(),
        args.zoom,
        orchestrator.source().primary_url()
    );

    let bar = progress_bar(tiles.len() as u64);
    let sink = Arc::new(AreaSink::new(bar.clone()));

    let (first, retry) = runtime.block_on(async {
        let first = fetch_pass(runner, &orchestrator, &tiles, &sink, &cancel).await?;

        // Delayed tiles get one more chance.
        let delayed = sink.take_delayed();
        let retry = if delayed.is_empty() || cancel.is_cancelled() {
            None
        } else {
            info!(count = delayed.len(), "Retrying delayed tiles");
            bar.inc_length(delayed.len() as u64);
            Some((
                delayed.len(),
                fetch_pass(runner, &orchestrator, &delayed, &sink, &cancel).await?,
            ))
        };
        Ok::<_, CliError>((first, retry))
    })?;
    bar.finish();

    let still_delayed = sink.take_delayed().len() as u64;
    let ready = sink.ready.load(Ordering::Relaxed);
    let failed = sink.failed.load(Ordering::Relaxed);
    let bytes = sink.bytes.load(Ordering::Relaxed);

    println!();
    println!("First pass: {}", first);
    if let Some((count, stats)) = &retry {
        println!("Retry of {} delayed tiles: {}", count, stats);
    }
    println!("  Ready:   {} ({} bytes decoded)", ready, bytes);
    println!("  Failed:  {}", failed);
    println!("  Delayed: {}", still_delayed);
    if let Some(cache) = orchestrator.cache() {
        println!("  Cache:   {} ({})", cache.stats(), cache.name());
    }

    if cancel.is_cancelled() {
        return Err(CliError::Cancelled);
    }
    if failed > 0 || still_delayed > 0 {
        return Err(CliError::Fetch(format!(
            "{} of {} tiles could not be fetched",
            failed + still_delayed,
            tiles.len()
        )));
    }
    Ok(())
}
