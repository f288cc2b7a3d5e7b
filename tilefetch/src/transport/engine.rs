//! Per-request download engine with retry, backoff and host fallback.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::http::{AsyncHttpClient, DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT};
use super::TransportError;
use crate::coord::TileAddress;
use crate::source::TileSource;

/// Default cap on retries per request chain.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default backoff unit. The n-th retry waits n units.
pub const DEFAULT_BACKOFF_UNIT: Duration = Duration::from_secs(1);

/// What a fetch reports after a failure was followed by a successful retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryReporting {
    /// Report the first error even though a retry succeeded. The retry
    /// still latches the fallback host for later requests.
    #[default]
    SurfaceOriginal,
    /// Return the bytes of the successful retry.
    ReturnRecovered,
}

impl RetryReporting {
    pub fn as_str(self) -> &'static str {
        match self {
            RetryReporting::SurfaceOriginal => "surface",
            RetryReporting::ReturnRecovered => "recovered",
        }
    }
}

impl std::str::FromStr for RetryReporting {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "surface" | "original" => Ok(RetryReporting::SurfaceOriginal),
            "recovered" | "recover" => Ok(RetryReporting::ReturnRecovered),
            other => Err(format!("expected 'surface' or 'recovered', got '{}'", other)),
        }
    }
}

/// Transport tuning shared by every engine of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub backoff_unit: Duration,
    pub reporting: RetryReporting,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_unit: DEFAULT_BACKOFF_UNIT,
            reporting: RetryReporting::default(),
        }
    }
}

/// Downloads one tile at a time for a single request.
///
/// An engine belongs to exactly one in-flight request. Only the
/// [`TileSource`] (and its fallback latch) is shared with other engines.
///
/// A fetch that hits a recoverable error retries up to
/// `max_retries` times, waiting `n * backoff_unit` before the n-th retry and
/// switching the source to its fallback host. All waits and requests stop
/// promptly when the cancellation token fires.
pub struct TransportEngine<C: AsyncHttpClient> {
    client: Arc<C>,
    source: Arc<TileSource>,
    config: TransportConfig,
    cancel: CancellationToken,
    retry_count: u32,
    body: Option<Bytes>,
    closed: bool,
}

impl<C: AsyncHttpClient> TransportEngine<C> {
    pub fn new(
        client: Arc<C>,
        source: Arc<TileSource>,
        config: TransportConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            source,
            config,
            cancel,
            retry_count: 0,
            body: None,
            closed: false,
        }
    }

    /// Fetches the raw bytes of a tile.
    pub async fn fetch(&mut self, address: &TileAddress) -> Result<Bytes, TransportError> {
        if self.closed || self.cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        self.body = None;

        let mut first_error: Option<TransportError> = None;
        loop {
            let url = self.source.current_url(address);
            trace!(tile = %address, url = %url, attempt = self.retry_count, "Requesting tile");

            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(TransportError::Cancelled),
                result = self.client.get(&url, self.source.headers()) => result,
            };

            match result {
                Ok(body) => {
                    self.retry_count = 0;
                    self.body = Some(body.clone());
                    if let Some(error) = first_error {
                        if self.config.reporting == RetryReporting::SurfaceOriginal {
                            debug!(tile = %address, error = %error, "Retry succeeded, reporting original failure");
                            return Err(error);
                        }
                    }
                    return Ok(body);
                }
                Err(TransportError::Cancelled) => {
                    self.retry_count = 0;
                    return Err(TransportError::Cancelled);
                }
                Err(error) if error.is_recoverable() => {
                    if self.retry_count >= self.config.max_retries {
                        warn!(
                            tile = %address,
                            error = %error,
                            retries = self.retry_count,
                            "Giving up on tile after retries"
                        );
                        self.retry_count = 0;
                        return Err(self.surface(first_error, error));
                    }

                    self.retry_count += 1;
                    let wait = backoff_delay(self.config.backoff_unit, self.retry_count);
                    warn!(
                        tile = %address,
                        url = %url,
                        error = %error,
                        attempt = self.retry_count,
                        wait_ms = wait.as_millis() as u64,
                        "Tile request failed, retrying"
                    );

                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => {
                            self.retry_count = 0;
                            return Err(TransportError::Cancelled);
                        }
                        _ = tokio::time::sleep(wait) => {}
                    }

                    self.source.activate_fallback();
                    first_error.get_or_insert(error);
                }
                Err(error) => {
                    debug!(tile = %address, url = %url, error = %error, "Tile request failed");
                    self.retry_count = 0;
                    return Err(self.surface(first_error, error));
                }
            }
        }
    }

    fn surface(&self, first: Option<TransportError>, last: TransportError) -> TransportError {
        match self.config.reporting {
            RetryReporting::SurfaceOriginal => first.unwrap_or(last),
            RetryReporting::ReturnRecovered => last,
        }
    }

    /// Bytes from the most recent successful response, if still held.
    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Retries spent in the current chain.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Releases the buffered body and refuses further fetches.
    ///
    /// Calling it more than once is harmless.
    pub fn close(&mut self) {
        if !self.closed {
            trace!("Closing transport engine");
        }
        self.closed = true;
        self.body = None;
        self.retry_count = 0;
    }
}

/// Wait before the `retry`-th retry, saturating for extreme settings.
fn backoff_delay(unit: Duration, retry: u32) -> Duration {
    unit.checked_mul(retry).unwrap_or(Duration::MAX)
}
