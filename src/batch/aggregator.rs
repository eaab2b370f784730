//! The aggregator: accumulates admitted swaps into the open batch and closes
//! it on size or timeout.

use super::{BatchMetrics, Partition, dispatcher::{self, DispatchContext}, partition_by_chain};
use crate::{config::BatchConfig, types::{QueueStatus, SwapRequest}};
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use tokio::{
    sync::mpsc,
    time::{self, Instant},
};
use tracing::{debug, error};

/// Handle to communicate with the [`BatchProcessor`].
#[derive(Debug, Clone)]
pub struct BatchProcessorHandle {
    admit_tx: mpsc::UnboundedSender<SwapRequest>,
    open_len: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
    max_size: usize,
}

impl BatchProcessorHandle {
    /// Admits a validated, persisted swap into the open batch.
    ///
    /// Total: once the swap is persisted, the pipeline owns it and will drive
    /// it to a terminal state.
    pub fn admit(&self, request: SwapRequest) {
        let _ = self.admit_tx.send(request);
    }

    /// Number of swaps in the open batch.
    pub fn current_size(&self) -> usize {
        self.open_len.load(Ordering::Relaxed)
    }

    /// Number of dispatcher tasks currently running.
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Snapshot for the queue-status endpoint.
    pub fn queue_status(&self) -> QueueStatus {
        QueueStatus {
            length: self.current_size(),
            max_size: self.max_size,
            active_batches: self.active_count(),
        }
    }
}

/// The aggregation core.
///
/// Exclusively owns the open batch. Closing swaps in a fresh open batch and
/// re-arms the timer before the captured batch is published, so admission of
/// the next batch never waits on dispatch.
pub struct BatchProcessor {
    admit_rx: mpsc::UnboundedReceiver<SwapRequest>,
    dispatch_tx: mpsc::Sender<Partition>,
    open: Vec<SwapRequest>,
    open_len: Arc<AtomicUsize>,
    config: BatchConfig,
    metrics: BatchMetrics,
}

impl BatchProcessor {
    /// Spawns the aggregator and its dispatch consumer, returning the handle.
    pub fn spawn(config: BatchConfig, ctx: DispatchContext) -> BatchProcessorHandle {
        let (admit_tx, admit_rx) = mpsc::unbounded_channel();
        let (dispatch_tx, dispatch_rx) = mpsc::channel(config.queue_depth);

        let open_len = Arc::new(AtomicUsize::new(0));
        let active = Arc::new(AtomicUsize::new(0));

        let handle = BatchProcessorHandle {
            admit_tx,
            open_len: open_len.clone(),
            active: active.clone(),
            max_size: config.max_size,
        };

        let processor = Self {
            admit_rx,
            dispatch_tx,
            open: Vec::with_capacity(config.max_size),
            open_len,
            config: config.clone(),
            metrics: BatchMetrics::default(),
        };

        tokio::spawn(dispatcher::run_dispatch_loop(dispatch_rx, ctx, config, active));
        tokio::spawn(processor.run());

        handle
    }

    async fn run(mut self) {
        let mut deadline = Instant::now() + self.config.timeout;

        loop {
            tokio::select! {
                request = self.admit_rx.recv() => match request {
                    Some(request) => {
                        self.open.push(request);
                        self.open_len.store(self.open.len(), Ordering::Relaxed);
                        self.metrics.admitted.increment(1);

                        if self.open.len() >= self.config.max_size {
                            self.close().await;
                            deadline = Instant::now() + self.config.timeout;
                        }
                    }
                    None => {
                        // All handles dropped: flush and stop.
                        self.close().await;
                        break;
                    }
                },
                _ = time::sleep_until(deadline) => {
                    self.close().await;
                    deadline = Instant::now() + self.config.timeout;
                }
            }
        }
    }

    /// Captures the open batch and publishes its partitions.
    ///
    /// A timer firing on an empty open batch only re-arms.
    async fn close(&mut self) {
        if self.open.is_empty() {
            return;
        }

        let captured = std::mem::take(&mut self.open);
        self.open.reserve(self.config.max_size);
        self.open_len.store(0, Ordering::Relaxed);
        debug!(size = captured.len(), "closing open batch");

        for partition in partition_by_chain(captured) {
            if self.dispatch_tx.send(partition).await.is_err() {
                error!("dispatch queue closed, dropping partition");
            }
        }
    }
}
