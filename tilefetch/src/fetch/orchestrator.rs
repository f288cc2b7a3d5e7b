//! Per-request pipeline: cache, network, decode, commit, deliver.

use std::sync::Arc;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::types::{FailureReason, FetchError, FetchOutcome, FetchRequest, FetchStage};
use crate::cache::{CacheWriter, TileCache};
use crate::coord::TileAddress;
use crate::decode::{DecodeError, DecodedTile, TileDecoder};
use crate::source::TileSource;
use crate::transport::{AsyncHttpClient, TransportConfig, TransportEngine, TransportError};

/// Composes cache, transport and decoder for single requests.
///
/// The orchestrator itself is stateless between requests and is shared by
/// all workers. Each call to [`run`](Self::run) gets its own
/// [`TransportEngine`].
///
/// Stages: cache lookup, then decode of a cached entry (a corrupt entry falls
/// through to the network), then network fetch, cache writer opened, decode,
/// and commit. The cancellation token is checked between every stage. A
/// cancelled request closes its engine, aborts any open cache write and makes
/// no sink call.
pub struct FetchOrchestrator<C: AsyncHttpClient> {
    source: Arc<TileSource>,
    client: Arc<C>,
    cache: Option<Arc<dyn TileCache>>,
    decoder: Arc<dyn TileDecoder>,
    transport: TransportConfig,
}

/// Why the pipeline stopped short of delivering a tile.
enum Halt {
    Failed(FetchError),
    Delayed(FetchError),
    Cancelled,
}

impl<C: AsyncHttpClient> FetchOrchestrator<C> {
    /// Creates an orchestrator without a cache. The decoder follows the
    /// source's content kind.
    pub fn new(source: Arc<TileSource>, client: Arc<C>, transport: TransportConfig) -> Self {
        let decoder = source.content_kind().decoder();
        Self {
            source,
            client,
            cache: None,
            decoder,
            transport,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn TileCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_decoder(mut self, decoder: Arc<dyn TileDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn source(&self) -> &Arc<TileSource> {
        &self.source
    }

    pub fn cache(&self) -> Option<&Arc<dyn TileCache>> {
        self.cache.as_ref()
    }

    /// Creates a fresh transport engine bound to `cancel`.
    pub fn engine(&self, cancel: CancellationToken) -> TransportEngine<C> {
        TransportEngine::new(
            Arc::clone(&self.client),
            Arc::clone(&self.source),
            self.transport.clone(),
            cancel,
        )
    }

    /// Runs one request to completion and reports it to its sink.
    pub async fn run(&self, request: FetchRequest, cancel: &CancellationToken) -> FetchOutcome {
        let FetchRequest { address, sink } = request;
        let mut engine = self.engine(cancel.clone());

        let result = self.acquire(&address, &mut engine, cancel).await;
        engine.close();

        match result {
            Ok(tile) => {
                trace!(tile = %address, stage = %FetchStage::Delivered, "Tile delivered");
                sink.on_tile_ready(address, tile);
                FetchOutcome::Success
            }
            Err(Halt::Failed(error)) => {
                debug!(tile = %address, error = %error, "Tile failed");
                sink.on_tile_failed(
                    address,
                    FailureReason {
                        delayed: false,
                        error: error.clone(),
                    },
                );
                FetchOutcome::Failed(error)
            }
            Err(Halt::Delayed(error)) => {
                debug!(tile = %address, error = %error, "Tile delayed");
                sink.on_tile_failed(
                    address,
                    FailureReason {
                        delayed: true,
                        error: error.clone(),
                    },
                );
                FetchOutcome::Delayed(error)
            }
            Err(Halt::Cancelled) => {
                debug!(tile = %address, "Tile request cancelled");
                FetchOutcome::Cancelled
            }
        }
    }

    async fn acquire(
        &self,
        address: &TileAddress,
        engine: &mut TransportEngine<C>,
        cancel: &CancellationToken,
    ) -> Result<DecodedTile, Halt> {
        if cancel.is_cancelled() {
            return Err(Halt::Cancelled);
        }
        if !self.source.supports_zoom(address.zoom) {
            return Err(Halt::Failed(FetchError::ZoomOutOfRange {
                zoom: address.zoom,
                min: self.source.min_zoom(),
                max: self.source.max_zoom(),
            }));
        }
        if !address.is_valid() {
            return Err(Halt::Failed(FetchError::InvalidAddress(*address)));
        }

        // Cache and server both use the server's row numbering.
        let remote = self.source.remote_address(address);

        if let Some(cache) = &self.cache {
            if let Some(tile) = self.from_cache(cache.as_ref(), address, &remote, cancel).await? {
                return Ok(tile);
            }
        }

        trace!(tile = %address, stage = %FetchStage::NetworkFetch, "Fetching tile");
        let bytes = match engine.fetch(&remote).await {
            Ok(bytes) => bytes,
            Err(TransportError::Cancelled) => return Err(Halt::Cancelled),
            Err(e) if e.is_delayed() => return Err(Halt::Delayed(e.into())),
            Err(e) => return Err(Halt::Failed(e.into())),
        };

        let writer = match &self.cache {
            Some(cache) => open_writer(cache.as_ref(), &remote, &bytes).await,
            None => None,
        };

        if cancel.is_cancelled() {
            abort(writer).await;
            return Err(Halt::Cancelled);
        }

        trace!(tile = %address, stage = %FetchStage::DecodingNetwork, bytes = bytes.len(), "Decoding tile");
        let decoded = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                abort(writer).await;
                return Err(Halt::Cancelled);
            }
            decoded = self.decode(address, bytes) => decoded,
        };

        match decoded {
            Ok(tile) => {
                if let Some(writer) = writer {
                    trace!(tile = %address, stage = %FetchStage::CacheCommit, "Committing cache entry");
                    if let Err(e) = writer.commit(true).await {
                        warn!(tile = %address, error = %e, "Cache commit failed");
                    }
                }
                Ok(tile)
            }
            Err(e) => {
                abort(writer).await;
                Err(Halt::Failed(e.into()))
            }
        }
    }

    /// Looks a tile up in the cache under `remote` and decodes it as
    /// `address`.
    ///
    /// Misses, store errors and undecodable entries all return `Ok(None)` so
    /// the caller goes to the network.
    async fn from_cache(
        &self,
        cache: &dyn TileCache,
        address: &TileAddress,
        remote: &TileAddress,
        cancel: &CancellationToken,
    ) -> Result<Option<DecodedTile>, Halt> {
        trace!(tile = %remote, stage = %FetchStage::CacheLookup, cache = cache.name(), "Checking cache");
        let cached = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Halt::Cancelled),
            cached = cache.lookup(remote) => cached,
        };

        let bytes = match cached {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!(tile = %remote, "Cache miss");
                return Ok(None);
            }
            Err(e) => {
                warn!(tile = %remote, error = %e, "Cache lookup failed, fetching from network");
                return Ok(None);
            }
        };

        trace!(tile = %remote, stage = %FetchStage::DecodingCached, "Decoding cached tile");
        let decoded = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Halt::Cancelled),
            decoded = self.decode(address, bytes) => decoded,
        };

        match decoded {
            Ok(tile) => Ok(Some(tile)),
            Err(e) => {
                debug!(tile = %address, error = %e, "Cached tile failed to decode, refetching");
                Ok(None)
            }
        }
    }

    /// Decodes on the blocking pool.
    async fn decode(&self, address: &TileAddress, bytes: Bytes) -> Result<DecodedTile, DecodeError> {
        let decoder = Arc::clone(&self.decoder);
        let address = *address;
        tokio::task::spawn_blocking(move || decoder.decode(&address, &bytes))
            .await
            .unwrap_or_else(|e| {
                Err(DecodeError::Aborted {
                    tile: address,
                    reason: e.to_string(),
                })
            })
    }
}

/// Opens a cache writer and stages `bytes`. Cache trouble never fails the
/// request; it only skips caching.
async fn open_writer(
    cache: &dyn TileCache,
    address: &TileAddress,
    bytes: &[u8],
) -> Option<Box<dyn CacheWriter>> {
    let mut writer = match cache.begin_write(address).await {
        Ok(writer) => writer,
        Err(e) => {
            warn!(tile = %address, error = %e, "Could not open cache writer");
            return None;
        }
    };
    if let Err(e) = writer.write(bytes) {
        warn!(tile = %address, error = %e, "Could not stage cache entry");
        abort(Some(writer)).await;
        return None;
    }
    Some(writer)
}

async fn abort(writer: Option<Box<dyn CacheWriter>>) {
    if let Some(writer) = writer {
        let address = writer.address();
        if let Err(e) = writer.commit(false).await {
            warn!(tile = %address, error = %e, "Cache abort failed");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cache::MemoryTileCache;
    use crate::decode::{mvt_bytes, png_bytes, ContentKind};
    use crate::fetch::TileSink;
    use crate::transport::{unreachable, MockHttpClient};
    use std::sync::Mutex;

    /// Sink that records every callback.
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub ready: Mutex<Vec<(TileAddress, DecodedTile)>>,
        pub failed: Mutex<Vec<(TileAddress, FailureReason)>>,
    }

    impl RecordingSink {
        pub fn ready_count(&self) -> usize {
            self.ready.lock().unwrap().len()
        }

        pub fn failed_count(&self) -> usize {
            self.failed.lock().unwrap().len()
        }

        pub fn callbacks(&self) -> usize {
            self.ready_count() + self.failed_count()
        }
    }

    impl TileSink for RecordingSink {
        fn on_tile_ready(&self, address: TileAddress, tile: DecodedTile) {
            self.ready.lock().unwrap().push((address, tile));
        }

        fn on_tile_failed(&self, address: TileAddress, reason: FailureReason) {
            self.failed.lock().unwrap().push((address, reason));
        }
    }

    /// Client that fires a cancellation token as its response is returned.
    struct CancellingClient {
        body: Bytes,
        token: CancellationToken,
    }

    impl AsyncHttpClient for CancellingClient {
        async fn get(
            &self,
            _url: &str,
            _headers: &[(String, String)],
        ) -> Result<Bytes, TransportError> {
            self.token.cancel();
            Ok(self.body.clone())
        }
    }

    const TILE: TileAddress = TileAddress::new(1, 2, 3);

    fn source() -> Arc<TileSource> {
        Arc::new(
            TileSource::builder("https://a.example", "/{Z}/{X}/{Y}.png")
                .build()
                .unwrap(),
        )
    }

    fn orchestrator(client: MockHttpClient) -> (FetchOrchestrator<MockHttpClient>, Arc<MockHttpClient>) {
        let client = Arc::new(client);
        let orchestrator =
            FetchOrchestrator::new(source(), Arc::clone(&client), TransportConfig::default());
        (orchestrator, client)
    }

    async fn seed(cache: &MemoryTileCache, address: &TileAddress, data: &[u8]) {
        let mut writer = cache.begin_write(address).await.unwrap();
        writer.write(data).unwrap();
        writer.commit(true).await.unwrap();
    }

    #[tokio::test]
    async fn test_network_success_delivers_and_commits() {
        let cache = Arc::new(MemoryTileCache::default());
        let (orchestrator, client) = orchestrator(MockHttpClient::ok(png_bytes(8, 8)));
        let orchestrator = orchestrator.with_cache(cache.clone());
        let sink = Arc::new(RecordingSink::default());

        let outcome = orchestrator
            .run(FetchRequest::new(TILE, sink.clone()), &CancellationToken::new())
            .await;

        assert_eq!(outcome, FetchOutcome::Success);
        assert_eq!(sink.ready_count(), 1);
        assert_eq!(sink.failed_count(), 0);
        assert_eq!(client.request_count(), 1);
        assert_eq!(cache.stats().commits, 1);
        assert!(cache.lookup(&TILE).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_cache_hit_skips_network() {
        let cache = Arc::new(MemoryTileCache::default());
        seed(&cache, &TILE, &png_bytes(4, 4)).await;
        let (orchestrator, client) = orchestrator(MockHttpClient::new(Err(unreachable("x"))));
        let orchestrator = orchestrator.with_cache(cache.clone());
        let sink = Arc::new(RecordingSink::default());

        let outcome = orchestrator
            .run(FetchRequest::new(TILE, sink.clone()), &CancellationToken::new())
            .await;

        assert_eq!(outcome, FetchOutcome::Success);
        assert_eq!(client.request_count(), 0);
        assert_eq!(sink.ready_count(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_cache_entry_falls_through_to_network() {
        let cache = Arc::new(MemoryTileCache::default());
        seed(&cache, &TILE, b"not a png").await;
        let (orchestrator, client) = orchestrator(MockHttpClient::ok(png_bytes(4, 4)));
        let orchestrator = orchestrator.with_cache(cache.clone());
        let sink = Arc::new(RecordingSink::default());

        let outcome = orchestrator
            .run(FetchRequest::new(TILE, sink.clone()), &CancellationToken::new())
            .await;

        assert_eq!(outcome, FetchOutcome::Success);
        assert_eq!(client.request_count(), 1);
        assert_eq!(sink.ready_count(), 1);
        // The corrupt entry was replaced by the good network bytes.
        assert_eq!(
            cache.lookup(&TILE).await.unwrap(),
            Some(Bytes::from(png_bytes(4, 4)))
        );
    }

    #[tokio::test]
    async fn test_decode_failure_aborts_cache_write() {
        let cache = Arc::new(MemoryTileCache::default());
        let (orchestrator, _client) = orchestrator(MockHttpClient::ok(Bytes::from_static(b"junk")));
        let orchestrator = orchestrator.with_cache(cache.clone());
        let sink = Arc::new(RecordingSink::default());

        let outcome = orchestrator
            .run(FetchRequest::new(TILE, sink.clone()), &CancellationToken::new())
            .await;

        assert!(matches!(outcome, FetchOutcome::Failed(FetchError::Decode(_))));
        assert_eq!(sink.failed_count(), 1);
        assert!(!sink.failed.lock().unwrap()[0].1.delayed);
        assert!(cache.lookup(&TILE).await.unwrap().is_none());
        let stats = cache.stats();
        assert_eq!(stats.commits, 0);
        assert_eq!(stats.aborts, 1);
    }

    #[tokio::test]
    async fn test_protocol_error_reported_failed() {
        let (orchestrator, _client) = orchestrator(MockHttpClient::new(Err(
            TransportError::Protocol {
                url: "https://a.example/3/1/2.png".into(),
                reason: "HTTP 404 Not Found".into(),
            },
        )));
        let sink = Arc::new(RecordingSink::default());

        let outcome = orchestrator
            .run(FetchRequest::new(TILE, sink.clone()), &CancellationToken::new())
            .await;

        assert!(matches!(
            outcome,
            FetchOutcome::Failed(FetchError::Transport(TransportError::Protocol { .. }))
        ));
        assert_eq!(sink.callbacks(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_reported_delayed() {
        let (orchestrator, _client) = orchestrator(MockHttpClient::new(Err(
            TransportError::Timeout {
                url: "https://a.example/3/1/2.png".into(),
            },
        )));
        let sink = Arc::new(RecordingSink::default());

        let outcome = orchestrator
            .run(FetchRequest::new(TILE, sink.clone()), &CancellationToken::new())
            .await;

        assert!(matches!(outcome, FetchOutcome::Delayed(_)));
        let failed = sink.failed.lock().unwrap();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].1.delayed);
    }

    #[tokio::test]
    async fn test_zoom_out_of_range_fails_without_request() {
        let source = Arc::new(
            TileSource::builder("https://a.example", "/{Z}/{X}/{Y}.png")
                .zoom_range(0, 2)
                .build()
                .unwrap(),
        );
        let client = Arc::new(MockHttpClient::ok(png_bytes(1, 1)));
        let orchestrator =
            FetchOrchestrator::new(source, Arc::clone(&client), TransportConfig::default());
        let sink = Arc::new(RecordingSink::default());

        let outcome = orchestrator
            .run(FetchRequest::new(TILE, sink.clone()), &CancellationToken::new())
            .await;

        assert_eq!(
            outcome,
            FetchOutcome::Failed(FetchError::ZoomOutOfRange {
                zoom: 3,
                min: 0,
                max: 2
            })
        );
        assert_eq!(client.request_count(), 0);
        assert_eq!(sink.failed_count(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_makes_no_callback() {
        let (orchestrator, client) = orchestrator(MockHttpClient::ok(png_bytes(1, 1)));
        let sink = Arc::new(RecordingSink::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = orchestrator
            .run(FetchRequest::new(TILE, sink.clone()), &cancel)
            .await;

        assert_eq!(outcome, FetchOutcome::Cancelled);
        assert_eq!(sink.callbacks(), 0);
        assert_eq!(client.request_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_between_fetch_and_decode() {
        let cancel = CancellationToken::new();
        let client = Arc::new(CancellingClient {
            body: Bytes::from(png_bytes(4, 4)),
            token: cancel.clone(),
        });
        let cache = Arc::new(MemoryTileCache::default());
        let orchestrator = FetchOrchestrator::new(source(), client, TransportConfig::default())
            .with_cache(cache.clone());
        let sink = Arc::new(RecordingSink::default());

        let outcome = orchestrator
            .run(FetchRequest::new(TILE, sink.clone()), &cancel)
            .await;

        assert_eq!(outcome, FetchOutcome::Cancelled);
        assert_eq!(sink.callbacks(), 0);
        assert!(cache.lookup(&TILE).await.unwrap().is_none());
        let stats = cache.stats();
        assert_eq!(stats.commits, 0);
        assert_eq!(stats.aborts, 1);
    }

    #[tokio::test]
    async fn test_tms_source_requests_flipped_row() {
        let source = Arc::new(
            TileSource::builder("https://a.example", "/{Z}/{X}/{Y}.png")
                .tms(true)
                .build()
                .unwrap(),
        );
        let client = Arc::new(MockHttpClient::ok(png_bytes(2, 2)));
        let orchestrator =
            FetchOrchestrator::new(source, Arc::clone(&client), TransportConfig::default());
        let sink = Arc::new(RecordingSink::default());

        let outcome = orchestrator
            .run(FetchRequest::new(TILE, sink.clone()), &CancellationToken::new())
            .await;

        assert_eq!(outcome, FetchOutcome::Success);
        // Row 2 at zoom 3 is row 5 counted from the bottom.
        assert_eq!(client.requested_urls(), vec!["https://a.example/3/1/5.png"]);
        assert_eq!(sink.ready.lock().unwrap()[0].0, TILE);
    }

    /// Bitmap decoder that remembers which addresses it was asked for.
    #[derive(Default)]
    struct AddressLog(Mutex<Vec<TileAddress>>);

    impl TileDecoder for AddressLog {
        fn kind(&self) -> ContentKind {
            ContentKind::Bitmap
        }

        fn decode(&self, address: &TileAddress, bytes: &[u8]) -> Result<DecodedTile, DecodeError> {
            self.0.lock().unwrap().push(*address);
            crate::decode::BitmapDecoder.decode(address, bytes)
        }
    }

    #[tokio::test]
    async fn test_tms_source_decodes_with_caller_address() {
        let source = Arc::new(
            TileSource::builder("https://a.example", "/{Z}/{X}/{Y}.png")
                .tms(true)
                .build()
                .unwrap(),
        );
        let cache = Arc::new(MemoryTileCache::default());
        // Cache keys use the server's row numbering.
        seed(&cache, &TILE.to_tms(), b"corrupt").await;
        let decoder = Arc::new(AddressLog::default());
        let client = Arc::new(MockHttpClient::ok(png_bytes(2, 2)));
        let orchestrator = FetchOrchestrator::new(source, client, TransportConfig::default())
            .with_cache(cache.clone())
            .with_decoder(decoder.clone());
        let sink = Arc::new(RecordingSink::default());

        let outcome = orchestrator
            .run(FetchRequest::new(TILE, sink.clone()), &CancellationToken::new())
            .await;

        assert_eq!(outcome, FetchOutcome::Success);
        // One decode of the corrupt cached entry, one of the network bytes.
        assert_eq!(*decoder.0.lock().unwrap(), vec![TILE, TILE]);
        assert!(cache.lookup(&TILE.to_tms()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_vector_source_uses_vector_decoder() {
        let source = Arc::new(
            TileSource::builder("https://a.example", "/{Z}/{X}/{Y}.pbf")
                .content_kind(ContentKind::Vector)
                .build()
                .unwrap(),
        );
        let body = mvt_bytes(&["water"]);
        let client = Arc::new(MockHttpClient::ok(body));
        let orchestrator = FetchOrchestrator::new(source, client, TransportConfig::default());
        let sink = Arc::new(RecordingSink::default());

        let outcome = orchestrator
            .run(FetchRequest::new(TILE, sink.clone()), &CancellationToken::new())
            .await;

        assert_eq!(outcome, FetchOutcome::Success);
        let ready = sink.ready.lock().unwrap();
        assert_eq!(ready[0].1.kind(), ContentKind::Vector);
    }
}
