//! Inbound processing strategy tests.
//!
//! - Backpressure: producers wait while the queue is full, nothing is lost
//! - Stop cancels waiting producers
//! - Handler failures are counted without stopping workers
//! - Dispatch by request kind

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use common::wait_for_processed;
use fleetwire_core::config::InboundConfig;
use fleetwire_core::{Error, Result};
use fleetwire_devices::{
    DecodedDeviceRequest, DispatchTable, InboundProcessingStrategy, InboundRequestHandler,
    RequestKind,
};

/// Handler that waits for a permit before finishing each request.
struct GatedHandler {
    gate: Semaphore,
    handled: AtomicUsize,
}

impl GatedHandler {
    fn closed() -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(0),
            handled: AtomicUsize::new(0),
        })
    }

    fn open(&self) {
        self.gate.add_permits(1_000);
    }
}

#[async_trait]
impl InboundRequestHandler for GatedHandler {
    async fn handle(&self, _request: DecodedDeviceRequest) -> Result<()> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| Error::Processing(e.to_string()))?;
        self.handled.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Fails or panics depending on the sender's hardware id.
struct FlakyHandler;

#[async_trait]
impl InboundRequestHandler for FlakyHandler {
    async fn handle(&self, request: DecodedDeviceRequest) -> Result<()> {
        if request.hardware_id.starts_with("panic") {
            panic!("handler panic for {}", request.hardware_id);
        }
        if request.hardware_id.starts_with("bad") {
            return Err(Error::Processing("rejected".to_string()));
        }
        Ok(())
    }
}

/// Records the kinds it was asked to handle.
#[derive(Default)]
struct RecordingHandler {
    kinds: Mutex<Vec<RequestKind>>,
}

#[async_trait]
impl InboundRequestHandler for RecordingHandler {
    async fn handle(&self, request: DecodedDeviceRequest) -> Result<()> {
        self.kinds.lock().push(request.kind());
        Ok(())
    }
}

fn config(queue_capacity: usize, worker_count: usize) -> InboundConfig {
    InboundConfig {
        queue_capacity,
        worker_count,
        enable_monitoring: false,
        monitoring_interval_secs: 1,
    }
}

fn request(hardware_id: &str) -> DecodedDeviceRequest {
    DecodedDeviceRequest::measurements(hardware_id, [("temp", 20.0)])
}

#[tokio::test]
async fn test_backpressure_blocks_excess_producers() {
    let handler = GatedHandler::closed();
    let strategy = Arc::new(InboundProcessingStrategy::new(config(2, 2), handler.clone()));
    strategy.start().expect("Failed to start strategy");

    let enqueued = Arc::new(AtomicUsize::new(0));
    let producers: Vec<_> = (0..10)
        .map(|i| {
            let strategy = strategy.clone();
            let enqueued = enqueued.clone();
            tokio::spawn(async move {
                strategy.enqueue(request(&format!("dev-{}", i))).await?;
                enqueued.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Error>(())
            })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(200)).await;
    // Two requests held by workers, two in the queue, the rest waiting
    assert_eq!(enqueued.load(Ordering::SeqCst), 4);
    assert_eq!(strategy.metrics().backlog, 2);
    assert_eq!(handler.handled.load(Ordering::SeqCst), 0);

    handler.open();
    for producer in producers {
        producer
            .await
            .expect("producer panicked")
            .expect("Failed to enqueue");
    }
    wait_for_processed(&strategy, 10).await;

    let metrics = strategy.metrics();
    assert_eq!(metrics.event_count, 10);
    assert_eq!(metrics.processed_count, metrics.event_count);
    assert_eq!(metrics.error_count, 0);
    assert_eq!(metrics.backlog, 0);
    assert_eq!(handler.handled.load(Ordering::SeqCst), 10);

    strategy.stop().await;
}

#[tokio::test]
async fn test_stop_cancels_blocked_producer() {
    let handler = GatedHandler::closed();
    let strategy = Arc::new(InboundProcessingStrategy::new(config(1, 1), handler.clone()));
    strategy.start().unwrap();

    // One request in the worker, one in the queue
    strategy.enqueue(request("dev-1")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    strategy.enqueue(request("dev-2")).await.unwrap();

    let blocked = {
        let strategy = strategy.clone();
        tokio::spawn(async move { strategy.enqueue(request("dev-3")).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!blocked.is_finished());

    let stopping = {
        let strategy = strategy.clone();
        tokio::spawn(async move { strategy.stop().await })
    };

    let err = blocked
        .await
        .expect("producer panicked")
        .expect_err("blocked enqueue should be cancelled");
    assert!(matches!(err, Error::Transport(_)));

    // Let the in-flight request finish so the worker can exit
    handler.open();
    tokio::time::timeout(Duration::from_secs(5), stopping)
        .await
        .expect("stop timed out")
        .expect("stop panicked");

    assert!(strategy.is_stopped());
    assert_eq!(handler.handled.load(Ordering::SeqCst), 1);
    assert_eq!(strategy.metrics().event_count, 2);

    let err = strategy.enqueue(request("dev-4")).await.unwrap_err();
    assert!(matches!(err, Error::Transport(_)));
    assert!(strategy.start().is_err());
}

#[tokio::test]
async fn test_failures_are_counted_and_workers_survive() {
    let strategy = InboundProcessingStrategy::new(config(16, 1), Arc::new(FlakyHandler));
    strategy.start().unwrap();

    for hardware_id in ["bad-1", "panic-1", "dev-1", "bad-2", "dev-2"] {
        strategy.enqueue(request(hardware_id)).await.unwrap();
    }
    wait_for_processed(&strategy, 5).await;

    let metrics = strategy.metrics();
    assert_eq!(metrics.event_count, 5);
    assert_eq!(metrics.error_count, 3);

    // The single worker is still alive
    strategy.enqueue(request("dev-3")).await.unwrap();
    wait_for_processed(&strategy, 6).await;
    assert_eq!(strategy.metrics().error_count, 3);

    strategy.stop().await;
}

#[tokio::test]
async fn test_blocking_producers() {
    let handler = GatedHandler::closed();
    handler.open();
    let strategy = Arc::new(InboundProcessingStrategy::new(config(4, 2), handler.clone()));
    strategy.start().unwrap();

    let producers: Vec<_> = (0..4)
        .map(|p| {
            let strategy = strategy.clone();
            tokio::task::spawn_blocking(move || {
                for i in 0..5 {
                    strategy.enqueue_blocking(request(&format!("dev-{}-{}", p, i)))?;
                }
                Ok::<_, Error>(())
            })
        })
        .collect();
    for producer in producers {
        producer.await.unwrap().expect("Failed to enqueue");
    }

    wait_for_processed(&strategy, 20).await;
    assert_eq!(strategy.metrics().event_count, 20);
    strategy.stop().await;
}

#[tokio::test]
async fn test_monitor_stops_with_strategy() {
    let strategy = InboundProcessingStrategy::new(
        InboundConfig {
            enable_monitoring: true,
            monitoring_interval_secs: 1,
            ..config(8, 2)
        },
        Arc::new(FlakyHandler),
    );
    strategy.start().unwrap();
    strategy.enqueue(request("dev-1")).await.unwrap();
    wait_for_processed(&strategy, 1).await;

    tokio::time::timeout(Duration::from_secs(5), strategy.stop())
        .await
        .expect("stop should not wait for the next monitor tick");
}

#[tokio::test]
async fn test_dispatch_by_kind() {
    let onboarding = Arc::new(RecordingHandler::default());
    let telemetry = Arc::new(RecordingHandler::default());
    let table = DispatchTable::standard(onboarding.clone(), telemetry.clone());

    table
        .handle(DecodedDeviceRequest::registration("dev-1", "spec", None))
        .await
        .unwrap();
    table
        .handle(DecodedDeviceRequest::mapping("gw-1", "dev-1", "slot1"))
        .await
        .unwrap();
    table.handle(request("dev-1")).await.unwrap();

    assert_eq!(
        *onboarding.kinds.lock(),
        vec![RequestKind::Registration, RequestKind::Mapping]
    );
    assert_eq!(*telemetry.kinds.lock(), vec![RequestKind::Measurements]);

    let partial = DispatchTable::new().with_handler(RequestKind::Registration, onboarding);
    let err = partial.handle(request("dev-1")).await.unwrap_err();
    assert!(matches!(err, Error::Processing(_)));
}
