//! Metrics and usage accounting for voice sessions.
//!
//! The voice pipeline emits one [`AgentMetrics`] event per measurable unit
//! of work. Events flow through an ordered channel into a
//! [`MetricsCollector`] task which logs each one and folds it into a
//! [`UsageSummary`]. The summary is read once more at shutdown to produce the
//! session's usage report.
//!
//! # Metric kinds
//!
//! | Kind | Emitted after |
//! |------|---------------|
//! | `STT` | a speech segment was transcribed |
//! | `LLM` | the language model produced a reply |
//! | `TTS` | text was synthesised to audio |
//! | `VAD` | a speech segment closed |
//! | `EOU` | the turn detector scored a user turn |
//!
//! # Usage
//!
//! ```rust,ignore
//! use tutor_observe::MetricsCollector;
//!
//! let collector = MetricsCollector::spawn(metrics_rx);
//! // ... session runs, pipeline sends AgentMetrics ...
//! let summary = collector.finish().await?;
//! tracing::info!("Usage: {summary}");
//! ```

mod collector;
mod error;
mod log;
mod metrics;
mod usage;

pub use collector::MetricsCollector;
pub use error::ObserveError;
pub use log::log_metrics;
pub use metrics::{
    AgentMetrics, EouMetrics, LlmMetrics, MetricKind, ParseMetricKindError, SttMetrics,
    TtsMetrics, VadMetrics,
};
pub use usage::{Pricing, UsageCollector, UsageSummary};

#[cfg(test)]
mod tests;
