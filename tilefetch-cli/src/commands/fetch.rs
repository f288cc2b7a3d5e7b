//! Fetch command - download and decode a single tile.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tilefetch::coord::TileAddress;
use tilefetch::decode::DecodedTile;
use tilefetch::fetch::{FailureReason, FetchOutcome, FetchRequest, TileSink};
use tilefetch::source::TileSource;

use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for the fetch command.
pub struct FetchArgs {
    pub x: u32,
    pub y: u32,
    pub zoom: u8,
    pub output: Option<PathBuf>,
}

/// Holds the single result of a one-tile request.
#[derive(Default)]
struct SingleTileSink {
    result: Mutex<Option<Result<DecodedTile, FailureReason>>>,
}

impl SingleTileSink {
    fn take(&self) -> Option<Result<DecodedTile, FailureReason>> {
        match self.result.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    fn store(&self, result: Result<DecodedTile, FailureReason>) {
        match self.result.lock() {
            Ok(mut guard) => *guard = Some(result),
            Err(poisoned) => *poisoned.into_inner() = Some(result),
        }
    }
}

impl TileSink for SingleTileSink {
    fn on_tile_ready(&self, _address: TileAddress, tile: DecodedTile) {
        self.store(Ok(tile));
    }

    fn on_tile_failed(&self, _address: TileAddress, reason: FailureReason) {
        self.store(Err(reason));
    }
}

/// Raw payload written by `--output`: RGBA pixels or decompressed vector data.
fn payload(tile: &DecodedTile) -> &[u8] {
    match tile {
        DecodedTile::Bitmap(bitmap) => &bitmap.pixels,
        DecodedTile::Vector(vector) => &vector.data,
    }
}

/// URL the next request for `tile` will go to.
fn request_url(source: &TileSource, tile: &TileAddress) -> String {
    source.current_url(&source.remote_address(tile))
}

/// Run the fetch command.
pub fn run(runner: &CliRunner, args: FetchArgs) -> Result<(), CliError> {
    runner.log_startup("fetch");
    let tile = TileAddress::new(args.x, args.y, args.zoom);
    if !tile.is_valid() {
        return Err(CliError::Fetch(format!("{} lies outside the tile grid", tile)));
    }

    let orchestrator = runner.orchestrator()?;
    let cancel = runner.interrupt_token()?;
    let runtime = runner.runtime()?;

    println!("Fetching tile {}", tile);
    println!("  URL: {}", request_url(orchestrator.source(), &tile));

    let sink = Arc::new(SingleTileSink::default());
    let outcome = runtime.block_on(async {
        orchestrator
            .run(FetchRequest::new(tile, sink.clone()), &cancel)
            .await
    });

    if let FetchOutcome::Cancelled = outcome {
        return Err(CliError::Cancelled);
    }

    match sink.take() {
        Some(Ok(decoded)) => {
            println!("  Result: {}", decoded);
            if let Some(path) = args.output {
                std::fs::write(&path, payload(&decoded)).map_err(|error| CliError::FileWrite {
                    path: path.display().to_string(),
                    error,
                })?;
                println!("  Wrote {} bytes to {}", decoded.payload_len(), path.display());
            }
            Ok(())
        }
        Some(Err(reason)) => {
            if reason.delayed {
                println!("  The server timed out; the tile may succeed if requested again later.");
            }
            Err(CliError::Fetch(reason.to_string()))
        }
        None => Err(CliError::Fetch(outcome.to_string())),
    }
}
