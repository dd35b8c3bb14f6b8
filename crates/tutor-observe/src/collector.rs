//! Aggregation task consuming the pipeline's metrics channel.

use crate::error::ObserveError;
use crate::log::log_metrics;
use crate::metrics::AgentMetrics;
use crate::usage::{UsageCollector, UsageSummary};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Logs and accumulates every metrics event of one session, in emission
/// order.
///
/// The usage state sits behind a `std::sync::Mutex`: every acquisition is a
/// short fold or clone that never spans an `.await`.
#[derive(Debug)]
pub struct MetricsCollector {
    usage: Arc<Mutex<UsageCollector>>,
    task: JoinHandle<()>,
}

impl MetricsCollector {
    /// Spawns the aggregation task on the current runtime.
    pub fn spawn(mut rx: mpsc::UnboundedReceiver<AgentMetrics>) -> Self {
        let usage = Arc::new(Mutex::new(UsageCollector::new()));
        let task_usage = Arc::clone(&usage);

        let task = tokio::spawn(async move {
            while let Some(metrics) = rx.recv().await {
                log_metrics(&metrics);
                lock(&task_usage).collect(&metrics);
            }
            tracing::debug!("metrics channel closed");
        });

        Self { usage, task }
    }

    /// Snapshot of the totals folded so far.
    pub fn get_summary(&self) -> UsageSummary {
        lock(&self.usage).get_summary()
    }

    /// Waits for every sender to be dropped and every queued event to be
    /// folded, then returns the final summary.
    pub async fn finish(self) -> Result<UsageSummary, ObserveError> {
        self.task.await?;
        Ok(lock(&self.usage).get_summary())
    }
}

fn lock(usage: &Mutex<UsageCollector>) -> MutexGuard<'_, UsageCollector> {
    usage.lock().unwrap_or_else(PoisonError::into_inner)
}
