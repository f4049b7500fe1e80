//! Inbound processing strategy.
//!
//! Decouples the arrival rate of decoded requests from the rate at which
//! they are processed. Producers append to a bounded FIFO queue and wait
//! while it is full; a fixed pool of worker tasks dequeues and hands each
//! request to the next stage. Nothing is dropped while the strategy runs.
//!
//! Stopping cancels blocked producers and idle workers, lets in-flight
//! requests finish, and abandons anything still queued.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use fleetwire_core::config::InboundConfig;
use fleetwire_core::error::{Error, Result};

use crate::dispatch::InboundRequestHandler;
use crate::request::DecodedDeviceRequest;

/// Queue entry; the timestamp is taken when the producer starts waiting.
struct QueuedRequest {
    request: DecodedDeviceRequest,
    enqueued_at: Instant,
}

/// Lock-free counters shared by producers, workers and the monitor.
#[derive(Debug, Default)]
struct MetricsRecorder {
    accepted: AtomicU64,
    processed: AtomicU64,
    errors: AtomicU64,
    total_wait_micros: AtomicU64,
    total_processing_micros: AtomicU64,
}

impl MetricsRecorder {
    fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    fn record_processed(&self, wait: Duration, processing: Duration, failed: bool) {
        self.total_wait_micros
            .fetch_add(wait.as_micros() as u64, Ordering::Relaxed);
        self.total_processing_micros
            .fetch_add(processing.as_micros() as u64, Ordering::Relaxed);
        if failed {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self, backlog: usize) -> InboundMetrics {
        let processed = self.processed.load(Ordering::Relaxed);
        let average = |total: &AtomicU64| {
            if processed == 0 {
                Duration::ZERO
            } else {
                Duration::from_micros(total.load(Ordering::Relaxed) / processed)
            }
        };
        InboundMetrics {
            event_count: self.accepted.load(Ordering::Relaxed),
            processed_count: processed,
            error_count: self.errors.load(Ordering::Relaxed),
            backlog,
            average_wait: average(&self.total_wait_micros),
            average_processing: average(&self.total_processing_micros),
        }
    }
}

/// Point-in-time view of the strategy's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InboundMetrics {
    /// Requests accepted into the queue
    pub event_count: u64,
    /// Requests that finished processing, successfully or not
    pub processed_count: u64,
    pub error_count: u64,
    /// Requests waiting in the queue
    pub backlog: usize,
    /// Time from the start of `enqueue` until a worker took the request
    pub average_wait: Duration,
    /// Time spent in the downstream handler
    pub average_processing: Duration,
}

impl fmt::Display for InboundMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Count({:5}) Errors({:5}) Backlog({:5}) AvgWait({:5} ms) AvgProc({:5} ms)",
            self.event_count,
            self.error_count,
            self.backlog,
            self.average_wait.as_millis(),
            self.average_processing.as_millis()
        )
    }
}

/// Bounded queue plus worker pool in front of an [`InboundRequestHandler`].
pub struct InboundProcessingStrategy {
    config: InboundConfig,
    sender: async_channel::Sender<QueuedRequest>,
    receiver: async_channel::Receiver<QueuedRequest>,
    handler: Arc<dyn InboundRequestHandler>,
    metrics: Arc<MetricsRecorder>,
    shutdown: CancellationToken,
    started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl InboundProcessingStrategy {
    pub fn new(config: InboundConfig, handler: Arc<dyn InboundRequestHandler>) -> Self {
        let (sender, receiver) = async_channel::bounded(config.queue_capacity.max(1));
        Self {
            config,
            sender,
            receiver,
            handler,
            metrics: Arc::new(MetricsRecorder::default()),
            shutdown: CancellationToken::new(),
            started: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &InboundConfig {
        &self.config
    }

    /// Spawn the worker pool and, when enabled, the monitor task.
    ///
    /// Must be called from within a tokio runtime. Starting twice is a
    /// no-op; a stopped strategy can not be restarted.
    pub fn start(&self) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(Error::Transport(
                "inbound processing strategy has been stopped".to_string(),
            ));
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut tasks = self.tasks.lock();
        for worker_id in 0..self.config.worker_count {
            tasks.push(tokio::spawn(run_worker(
                worker_id,
                self.receiver.clone(),
                self.handler.clone(),
                self.metrics.clone(),
                self.shutdown.clone(),
            )));
        }
        if self.config.enable_monitoring {
            tasks.push(tokio::spawn(run_monitor(
                self.config.monitoring_interval(),
                self.receiver.clone(),
                self.metrics.clone(),
                self.shutdown.clone(),
            )));
        }

        tracing::info!(
            queue_capacity = self.config.queue_capacity,
            worker_count = self.config.worker_count,
            monitoring = self.config.enable_monitoring,
            "Started inbound processing strategy"
        );
        Ok(())
    }

    /// Append a request, waiting while the queue is full.
    ///
    /// Fails with a transport error if the strategy is stopped before the
    /// request could be queued.
    pub async fn enqueue(&self, request: DecodedDeviceRequest) -> Result<()> {
        let queued = QueuedRequest {
            request,
            enqueued_at: Instant::now(),
        };
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(cancelled()),
            sent = self.sender.send(queued) => {
                sent.map_err(|_| cancelled())?;
                self.metrics.record_accepted();
                Ok(())
            }
        }
    }

    /// Blocking variant of [`enqueue`](Self::enqueue) for producers running
    /// on their own OS threads. Must not be called from an async task.
    pub fn enqueue_blocking(&self, request: DecodedDeviceRequest) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(cancelled());
        }
        self.sender
            .send_blocking(QueuedRequest {
                request,
                enqueued_at: Instant::now(),
            })
            .map_err(|_| cancelled())?;
        self.metrics.record_accepted();
        Ok(())
    }

    pub fn metrics(&self) -> InboundMetrics {
        self.metrics.snapshot(self.receiver.len())
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop accepting requests, wake every waiter and wait for the workers
    /// to finish their current request.
    pub async fn stop(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        self.sender.close();

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                tracing::error!("Inbound task failed to shut down cleanly: {}", e);
            }
        }

        let abandoned = self.receiver.len();
        if abandoned > 0 {
            tracing::warn!(abandoned, "Abandoned queued requests at shutdown");
        }
        tracing::info!(metrics = %self.metrics(), "Stopped inbound processing strategy");
    }
}

fn cancelled() -> Error {
    Error::Transport("enqueue cancelled: inbound processing strategy stopped".to_string())
}

async fn run_worker(
    worker_id: usize,
    receiver: async_channel::Receiver<QueuedRequest>,
    handler: Arc<dyn InboundRequestHandler>,
    metrics: Arc<MetricsRecorder>,
    shutdown: CancellationToken,
) {
    loop {
        let queued = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            received = receiver.recv() => match received {
                Ok(queued) => queued,
                Err(_) => break,
            },
        };

        let wait = queued.enqueued_at.elapsed();
        let hardware_id = queued.request.hardware_id.clone();
        let kind = queued.request.kind();

        let started = Instant::now();
        let outcome = AssertUnwindSafe(handler.handle(queued.request))
            .catch_unwind()
            .await;
        let processing = started.elapsed();

        let failed = match outcome {
            Ok(Ok(())) => false,
            Ok(Err(e)) => {
                tracing::error!(
                    worker = worker_id,
                    hardware_id = %hardware_id,
                    kind = %kind,
                    "Failed to process inbound request: {}",
                    e
                );
                true
            }
            Err(_) => {
                tracing::error!(
                    worker = worker_id,
                    hardware_id = %hardware_id,
                    kind = %kind,
                    "Handler panicked while processing inbound request"
                );
                true
            }
        };
        metrics.record_processed(wait, processing, failed);
    }
    tracing::debug!(worker = worker_id, "Inbound worker stopped");
}

async fn run_monitor(
    interval: Duration,
    receiver: async_channel::Receiver<QueuedRequest>,
    metrics: Arc<MetricsRecorder>,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
    // The first tick completes immediately
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                tracing::info!("{}", metrics.snapshot(receiver.len()));
            }
        }
    }
}
