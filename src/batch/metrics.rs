use metrics::{Counter, Gauge, Histogram};
use metrics_derive::Metrics;

#[derive(Metrics)]
#[metrics(scope = "batcher")]
pub struct BatchMetrics {
    /// Number of swaps admitted into the open batch.
    pub admitted: Counter,
    /// Number of partitions handed to dispatchers.
    pub dispatched: Counter,
    /// Number of batches that completed.
    pub completed: Counter,
    /// Number of batches that failed.
    pub failed: Counter,
    /// Dispatcher tasks currently running.
    pub active: Gauge,
    /// Seconds from broadcast to confirmation.
    pub confirmation_time: Histogram,
}
