//! tilefetch - Map tile acquisition pipeline
//!
//! This library fetches map tiles from remote tile servers and turns them
//! into decoded tiles for a consumer:
//!
//! - [`source`]: where tiles live and how their URLs are built, including a
//!   one-way switch to a fallback host
//! - [`transport`]: HTTP download with bounded retries and linear backoff
//! - [`cache`]: transactional tile caches (memory and disk)
//! - [`decode`]: bitmap and vector tile decoders
//! - [`fetch`]: the per-request state machine tying the above together
//! - [`executor`]: a worker pool running many requests concurrently
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tilefetch::coord::TileAddress;
//! use tilefetch::executor::{PoolConfig, WorkerPool};
//! use tilefetch::fetch::{FetchOrchestrator, TileSink, FailureReason};
//! use tilefetch::decode::DecodedTile;
//! use tilefetch::source::TileSource;
//! use tilefetch::transport::{ReqwestHttpClient, TransportConfig};
//!
//! struct PrintSink;
//!
//! impl TileSink for PrintSink {
//!     fn on_tile_ready(&self, address: TileAddress, tile: DecodedTile) {
//!         println!("{}: {}", address, tile);
//!     }
//!     fn on_tile_failed(&self, address: TileAddress, reason: FailureReason) {
//!         println!("{}: {}", address, reason);
//!     }
//! }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let source = Arc::new(TileSource::builder("https://tiles.example.com", "/{Z}/{X}/{Y}.png").build()?);
//! let client = Arc::new(ReqwestHttpClient::new()?);
//! let orchestrator = Arc::new(FetchOrchestrator::new(source, client, TransportConfig::default()));
//!
//! let pool = WorkerPool::start(orchestrator, PoolConfig::default())?;
//! pool.submit(TileAddress::new(1, 2, 3), Arc::new(PrintSink))?;
//! pool.drain().await;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod coord;
pub mod decode;
pub mod executor;
pub mod fetch;
pub mod logging;
pub mod source;
pub mod transport;
