//! Fixed-size worker pool running fetch requests concurrently.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::join_all;
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::{PoolConfig, PoolError, PoolStats};
use crate::coord::TileAddress;
use crate::fetch::{FetchOrchestrator, FetchOutcome, FetchRequest, TileSink};
use crate::transport::AsyncHttpClient;

/// A queued request and its cancellation token.
struct Job {
    request: FetchRequest,
    cancel: CancellationToken,
}

/// Handle to a submitted request.
#[derive(Debug, Clone)]
pub struct RequestHandle {
    address: TileAddress,
    cancel: CancellationToken,
}

impl RequestHandle {
    pub fn address(&self) -> TileAddress {
        self.address
    }

    /// Cancels the request whether it is queued or in flight.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[derive(Default)]
struct PoolCounters {
    submitted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    delayed: AtomicU64,
    cancelled: AtomicU64,
}

impl PoolCounters {
    fn record(&self, outcome: &FetchOutcome) {
        let counter = match outcome {
            FetchOutcome::Success => &self.succeeded,
            FetchOutcome::Failed(_) => &self.failed,
            FetchOutcome::Delayed(_) => &self.delayed,
            FetchOutcome::Cancelled => &self.cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> PoolStats {
        PoolStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            delayed: self.delayed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
        }
    }
}

/// Runs fetch requests on a fixed number of Tokio tasks.
///
/// Requests wait in a bounded queue. Each worker takes one request, runs it
/// to completion and only then takes the next. There is no ordering between
/// workers.
///
/// Every request gets its own cancellation token, a child of the pool's
/// current generation. [`cancel_all`](Self::cancel_all) cancels the current
/// generation and starts a new one, so work submitted afterwards runs
/// normally.
pub struct WorkerPool {
    sender: mpsc::Sender<Job>,
    workers: Vec<JoinHandle<()>>,
    generation: Mutex<CancellationToken>,
    shutdown: CancellationToken,
    counters: Arc<PoolCounters>,
}

impl WorkerPool {
    /// Spawns the workers. Must be called from within a Tokio runtime.
    pub fn start<C>(
        orchestrator: Arc<FetchOrchestrator<C>>,
        config: PoolConfig,
    ) -> Result<Self, PoolError>
    where
        C: AsyncHttpClient + 'static,
    {
        config.validate()?;

        let (sender, receiver) = mpsc::channel(config.queue_capacity);
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let shutdown = CancellationToken::new();
        let counters = Arc::new(PoolCounters::default());

        let workers = (0..config.workers)
            .map(|id| {
                tokio::spawn(worker_loop(
                    id,
                    Arc::clone(&orchestrator),
                    Arc::clone(&receiver),
                    shutdown.clone(),
                    Arc::clone(&counters),
                ))
            })
            .collect();

        info!(
            workers = config.workers,
            queue_capacity = config.queue_capacity,
            "Worker pool started"
        );

        Ok(Self {
            sender,
            workers,
            generation: Mutex::new(shutdown.child_token()),
            shutdown,
            counters,
        })
    }

    /// Queues a request without waiting. Fails when the queue is full.
    pub fn submit(
        &self,
        address: TileAddress,
        sink: Arc<dyn TileSink>,
    ) -> Result<RequestHandle, PoolError> {
        let (job, handle) = self.job(address, sink)?;
        self.sender.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PoolError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => PoolError::ShuttingDown,
        })?;
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(handle)
    }

    /// Queues a request, waiting for room in the queue.
    pub async fn submit_wait(
        &self,
        address: TileAddress,
        sink: Arc<dyn TileSink>,
    ) -> Result<RequestHandle, PoolError> {
        let (job, handle) = self.job(address, sink)?;
        self.sender
            .send(job)
            .await
            .map_err(|_| PoolError::ShuttingDown)?;
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(handle)
    }

    fn job(
        &self,
        address: TileAddress,
        sink: Arc<dyn TileSink>,
    ) -> Result<(Job, RequestHandle), PoolError> {
        if self.shutdown.is_cancelled() {
            return Err(PoolError::ShuttingDown);
        }
        let cancel = self.current_generation().child_token();
        let handle = RequestHandle {
            address,
            cancel: cancel.clone(),
        };
        let job = Job {
            request: FetchRequest::new(address, sink),
            cancel,
        };
        Ok((job, handle))
    }

    fn current_generation(&self) -> CancellationToken {
        match self.generation.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Cancels every request submitted so far.
    pub fn cancel_all(&self) {
        let fresh = self.shutdown.child_token();
        let previous = match self.generation.lock() {
            Ok(mut guard) => std::mem::replace(&mut *guard, fresh),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), fresh),
        };
        previous.cancel();
        debug!("Cancelled all pending tile requests");
    }

    /// Current counters.
    pub fn stats(&self) -> PoolStats {
        self.counters.snapshot()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Stops accepting work, lets queued requests finish and joins the
    /// workers.
    pub async fn drain(self) -> PoolStats {
        let WorkerPool {
            sender,
            workers,
            counters,
            ..
        } = self;
        drop(sender);
        join_all(workers).await;
        let stats = counters.snapshot();
        info!(%stats, "Worker pool drained");
        stats
    }

    /// Cancels queued and in-flight requests and joins the workers.
    pub async fn shutdown(self) -> PoolStats {
        self.shutdown.cancel();
        self.drain().await
    }
}

async fn worker_loop<C>(
    id: usize,
    orchestrator: Arc<FetchOrchestrator<C>>,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>,
    shutdown: CancellationToken,
    counters: Arc<PoolCounters>,
) where
    C: AsyncHttpClient + 'static,
{
    debug!(worker = id, "Worker started");
    loop {
        let job = {
            let mut receiver = receiver.lock().await;
            receiver.recv().await
        };
        let Some(Job { request, cancel }) = job else {
            break;
        };

        // Cancelled work still drains from the queue, without a callback.
        if cancel.is_cancelled() || shutdown.is_cancelled() {
            counters.cancelled.fetch_add(1, Ordering::Relaxed);
            continue;
        }

        let address = request.address;
        let outcome = AssertUnwindSafe(orchestrator.run(request, &cancel))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                error!(worker = id, tile = %address, "Tile request panicked");
                FetchOutcome::Cancelled
            });
        debug!(worker = id, tile = %address, outcome = outcome.label(), "Request finished");
        counters.record(&outcome);
    }
    debug!(worker = id, "Worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::png_bytes;
    use crate::fetch::RecordingSink;
    use crate::source::TileSource;
    use crate::transport::{MockHttpClient, TransportConfig, TransportError};
    use std::time::Duration;

    fn orchestrator(client: MockHttpClient) -> Arc<FetchOrchestrator<MockHttpClient>> {
        let source = Arc::new(
            TileSource::builder("https://a.example", "/{Z}/{X}/{Y}.png")
                .build()
                .unwrap(),
        );
        Arc::new(FetchOrchestrator::new(
            source,
            Arc::new(client),
            TransportConfig::default(),
        ))
    }

    fn config(workers: usize, queue_capacity: usize) -> PoolConfig {
        PoolConfig {
            workers,
            queue_capacity,
        }
    }

    fn not_found() -> TransportError {
        TransportError::Protocol {
            url: "https://a.example".into(),
            reason: "HTTP 404 Not Found".into(),
        }
    }

    #[tokio::test]
    async fn test_processes_every_request() {
        let pool = WorkerPool::start(orchestrator(MockHttpClient::ok(png_bytes(2, 2))), config(3, 64))
            .unwrap();
        let sink = Arc::new(RecordingSink::default());

        for x in 0..10 {
            pool.submit(TileAddress::new(x, 0, 4), sink.clone()).unwrap();
        }
        let stats = pool.drain().await;

        assert_eq!(stats.submitted, 10);
        assert_eq!(stats.succeeded, 10);
        assert_eq!(sink.ready_count(), 10);
        assert_eq!(sink.failed_count(), 0);
    }

    #[tokio::test]
    async fn test_failures_are_counted() {
        let pool = WorkerPool::start(orchestrator(MockHttpClient::new(Err(not_found()))), config(2, 16))
            .unwrap();
        let sink = Arc::new(RecordingSink::default());

        for x in 0..4 {
            pool.submit(TileAddress::new(x, 0, 4), sink.clone()).unwrap();
        }
        let stats = pool.drain().await;

        assert_eq!(stats.failed, 4);
        assert_eq!(sink.failed_count(), 4);
    }

    #[tokio::test]
    async fn test_handle_cancels_queued_request() {
        let pool = WorkerPool::start(orchestrator(MockHttpClient::new(Err(not_found()))), config(1, 16))
            .unwrap();
        let sink = Arc::new(RecordingSink::default());

        let _first = pool.submit(TileAddress::new(0, 0, 1), sink.clone()).unwrap();
        let second = pool.submit(TileAddress::new(1, 0, 1), sink.clone()).unwrap();
        second.cancel();
        assert!(second.is_cancelled());

        let stats = pool.drain().await;
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.cancelled, 1);
        assert_eq!(sink.callbacks(), 1);
        assert_eq!(sink.failed.lock().unwrap()[0].0, TileAddress::new(0, 0, 1));
    }

    #[tokio::test]
    async fn test_queue_full() {
        let pool = WorkerPool::start(orchestrator(MockHttpClient::new(Err(not_found()))), config(1, 1))
            .unwrap();
        let sink = Arc::new(RecordingSink::default());

        pool.submit(TileAddress::new(0, 0, 1), sink.clone()).unwrap();
        let result = pool.submit(TileAddress::new(1, 0, 1), sink.clone());
        assert!(matches!(result, Err(PoolError::QueueFull)));
        pool.drain().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_stops_in_flight_and_queued() {
        let client = MockHttpClient::ok(png_bytes(2, 2)).with_delay(Duration::from_secs(60));
        let pool = WorkerPool::start(orchestrator(client), config(2, 16)).unwrap();
        let sink = Arc::new(RecordingSink::default());

        for x in 0..4 {
            pool.submit(TileAddress::new(x, 0, 4), sink.clone()).unwrap();
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
        pool.cancel_all();

        let stats = pool.drain().await;
        assert_eq!(stats.cancelled, 4);
        assert_eq!(sink.callbacks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submissions_after_cancel_all_run() {
        let pool = WorkerPool::start(orchestrator(MockHttpClient::new(Err(not_found()))), config(1, 16))
            .unwrap();
        let sink = Arc::new(RecordingSink::default());

        pool.cancel_all();
        let handle = pool.submit(TileAddress::new(0, 0, 1), sink.clone()).unwrap();
        assert!(!handle.is_cancelled());

        let stats = pool.drain().await;
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_in_flight() {
        let client = MockHttpClient::ok(png_bytes(2, 2)).with_delay(Duration::from_secs(60));
        let pool = WorkerPool::start(orchestrator(client), config(1, 16)).unwrap();
        let sink = Arc::new(RecordingSink::default());

        pool.submit(TileAddress::new(0, 0, 1), sink.clone()).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        let stats = pool.shutdown().await;
        assert_eq!(stats.cancelled, 1);
        assert_eq!(sink.callbacks(), 0);
    }

    #[tokio::test]
    async fn test_rejects_zero_workers() {
        let result = WorkerPool::start(orchestrator(MockHttpClient::ok(bytes::Bytes::new())), config(0, 16));
        assert!(matches!(result, Err(PoolError::InvalidConfig(_))));
    }
}
