//! Metric kinds and per-kind payloads emitted by the voice pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Category of a metrics event. Used as the key of usage counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MetricKind {
    /// Speech-to-text transcription.
    #[serde(rename = "STT")]
    Stt,
    /// Language-model completion.
    #[serde(rename = "LLM")]
    Llm,
    /// Text-to-speech synthesis.
    #[serde(rename = "TTS")]
    Tts,
    /// Voice-activity detection.
    #[serde(rename = "VAD")]
    Vad,
    /// End-of-utterance (turn) detection.
    #[serde(rename = "EOU")]
    Eou,
}

impl MetricKind {
    /// Returns the canonical string label for this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stt => "STT",
            Self::Llm => "LLM",
            Self::Tts => "TTS",
            Self::Vad => "VAD",
            Self::Eou => "EOU",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MetricKind {
    type Err = ParseMetricKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STT" => Ok(Self::Stt),
            "LLM" => Ok(Self::Llm),
            "TTS" => Ok(Self::Tts),
            "VAD" => Ok(Self::Vad),
            "EOU" => Ok(Self::Eou),
            _ => Err(ParseMetricKindError(s.to_string())),
        }
    }
}

/// Error returned when parsing an unknown metric kind string.
#[derive(Debug, Clone)]
pub struct ParseMetricKindError(pub String);

impl std::fmt::Display for ParseMetricKindError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown metric kind: {}", self.0)
    }
}

impl std::error::Error for ParseMetricKindError {}

/// One transcription request. Durations are in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SttMetrics {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    /// Wall-clock time of the request.
    pub duration: f64,
    /// Length of the transcribed audio.
    pub audio_duration: f64,
    pub streamed: bool,
}

/// One chat completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmMetrics {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    /// Time to first token. Equal to `duration` for non-streamed replies.
    pub ttft: f64,
    pub duration: f64,
    pub cancelled: bool,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub tokens_per_second: f64,
}

/// One synthesis request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TtsMetrics {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    /// Time to first audio byte.
    pub ttfb: f64,
    pub duration: f64,
    pub audio_duration: f64,
    pub characters_count: u64,
    pub cancelled: bool,
}

/// Voice-activity detection work accumulated since the previous report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VadMetrics {
    pub timestamp: DateTime<Utc>,
    /// Audio time spent outside of speech.
    pub idle_time: f64,
    pub inference_count: u64,
    pub inference_duration_total: f64,
}

/// Turn-detection decision for a committed user utterance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EouMetrics {
    pub timestamp: DateTime<Utc>,
    /// Time from end of speech until the turn was committed.
    pub end_of_utterance_delay: f64,
    /// Time from end of speech until the transcript was available.
    pub transcription_delay: f64,
    /// End-of-turn probability reported by the turn detector.
    pub probability: f32,
}

/// A metrics event emitted by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentMetrics {
    Stt(SttMetrics),
    Llm(LlmMetrics),
    Tts(TtsMetrics),
    Vad(VadMetrics),
    Eou(EouMetrics),
}

impl AgentMetrics {
    /// Returns the kind of this event.
    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Stt(_) => MetricKind::Stt,
            Self::Llm(_) => MetricKind::Llm,
            Self::Tts(_) => MetricKind::Tts,
            Self::Vad(_) => MetricKind::Vad,
            Self::Eou(_) => MetricKind::Eou,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Stt(m) => m.timestamp,
            Self::Llm(m) => m.timestamp,
            Self::Tts(m) => m.timestamp,
            Self::Vad(m) => m.timestamp,
            Self::Eou(m) => m.timestamp,
        }
    }
}

impl From<SttMetrics> for AgentMetrics {
    fn from(m: SttMetrics) -> Self {
        Self::Stt(m)
    }
}

impl From<LlmMetrics> for AgentMetrics {
    fn from(m: LlmMetrics) -> Self {
        Self::Llm(m)
    }
}

impl From<TtsMetrics> for AgentMetrics {
    fn from(m: TtsMetrics) -> Self {
        Self::Tts(m)
    }
}

impl From<VadMetrics> for AgentMetrics {
    fn from(m: VadMetrics) -> Self {
        Self::Vad(m)
    }
}

impl From<EouMetrics> for AgentMetrics {
    fn from(m: EouMetrics) -> Self {
        Self::Eou(m)
    }
}
