//! Running usage totals for one session.

use crate::metrics::{AgentMetrics, MetricKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Aggregate usage of a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub llm_prompt_tokens: u64,
    pub llm_completion_tokens: u64,
    pub tts_characters_count: u64,
    /// Seconds of synthesised audio.
    pub tts_audio_duration: f64,
    /// Seconds of transcribed audio.
    pub stt_audio_duration: f64,
    /// Number of events received per metric kind.
    pub events_by_kind: BTreeMap<MetricKind, u64>,
}

impl UsageSummary {
    /// Total number of metrics events folded into this summary.
    pub fn total_events(&self) -> u64 {
        self.events_by_kind.values().sum()
    }

    pub fn events(&self, kind: MetricKind) -> u64 {
        self.events_by_kind.get(&kind).copied().unwrap_or(0)
    }

    /// Estimated spend in the pricing's currency.
    pub fn estimated_cost(&self, pricing: &Pricing) -> f64 {
        self.llm_prompt_tokens as f64 / 1_000_000.0 * pricing.llm_prompt_per_million
            + self.llm_completion_tokens as f64 / 1_000_000.0 * pricing.llm_completion_per_million
            + self.tts_characters_count as f64 / 1_000_000.0 * pricing.tts_per_million_characters
            + self.stt_audio_duration / 60.0 * pricing.stt_per_minute
    }
}

impl fmt::Display for UsageSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "llm_prompt_tokens={} llm_completion_tokens={} tts_characters_count={} \
             tts_audio_duration={:.2}s stt_audio_duration={:.2}s",
            self.llm_prompt_tokens,
            self.llm_completion_tokens,
            self.tts_characters_count,
            self.tts_audio_duration,
            self.stt_audio_duration,
        )?;
        for (kind, count) in &self.events_by_kind {
            write!(f, " {}_events={}", kind.as_str().to_lowercase(), count)?;
        }
        Ok(())
    }
}

/// Unit prices used to estimate session cost. All default to zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pricing {
    pub llm_prompt_per_million: f64,
    pub llm_completion_per_million: f64,
    pub tts_per_million_characters: f64,
    pub stt_per_minute: f64,
}

/// Folds metrics events into a [`UsageSummary`].
#[derive(Debug, Clone, Default)]
pub struct UsageCollector {
    summary: UsageSummary,
}

impl UsageCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collect(&mut self, metrics: &AgentMetrics) {
        let summary = &mut self.summary;
        *summary.events_by_kind.entry(metrics.kind()).or_insert(0) += 1;

        match metrics {
            AgentMetrics::Llm(m) => {
                summary.llm_prompt_tokens += m.prompt_tokens;
                summary.llm_completion_tokens += m.completion_tokens;
            }
            AgentMetrics::Tts(m) => {
                summary.tts_characters_count += m.characters_count;
                summary.tts_audio_duration += m.audio_duration;
            }
            AgentMetrics::Stt(m) => {
                summary.stt_audio_duration += m.audio_duration;
            }
            AgentMetrics::Vad(_) | AgentMetrics::Eou(_) => {}
        }
    }

    pub fn get_summary(&self) -> UsageSummary {
        self.summary.clone()
    }
}
