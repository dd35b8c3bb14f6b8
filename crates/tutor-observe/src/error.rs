//! Error types for metrics collection.

/// Errors that can occur while collecting metrics.
#[derive(Debug, thiserror::Error)]
pub enum ObserveError {
    /// The aggregation task panicked or was aborted.
    #[error("metrics collector task failed: {0}")]
    CollectorTask(#[from] tokio::task::JoinError),
}
