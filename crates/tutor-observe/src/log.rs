//! Structured logging of metrics events.

use crate::metrics::AgentMetrics;

/// Logs one metrics event at `info` with its fields as tracing fields.
pub fn log_metrics(metrics: &AgentMetrics) {
    match metrics {
        AgentMetrics::Stt(m) => tracing::info!(
            target: "tutor_observe::metrics",
            kind = "STT",
            request_id = %m.request_id,
            duration = format_args!("{:.2}", m.duration),
            audio_duration = format_args!("{:.2}", m.audio_duration),
            streamed = m.streamed,
            "STT metrics"
        ),
        AgentMetrics::Llm(m) => tracing::info!(
            target: "tutor_observe::metrics",
            kind = "LLM",
            request_id = %m.request_id,
            ttft = format_args!("{:.2}", m.ttft),
            duration = format_args!("{:.2}", m.duration),
            prompt_tokens = m.prompt_tokens,
            completion_tokens = m.completion_tokens,
            tokens_per_second = format_args!("{:.2}", m.tokens_per_second),
            cancelled = m.cancelled,
            "LLM metrics"
        ),
        AgentMetrics::Tts(m) => tracing::info!(
            target: "tutor_observe::metrics",
            kind = "TTS",
            request_id = %m.request_id,
            ttfb = format_args!("{:.2}", m.ttfb),
            duration = format_args!("{:.2}", m.duration),
            audio_duration = format_args!("{:.2}", m.audio_duration),
            characters_count = m.characters_count,
            cancelled = m.cancelled,
            "TTS metrics"
        ),
        AgentMetrics::Vad(m) => tracing::debug!(
            target: "tutor_observe::metrics",
            kind = "VAD",
            idle_time = format_args!("{:.2}", m.idle_time),
            inference_count = m.inference_count,
            inference_duration_total = format_args!("{:.4}", m.inference_duration_total),
            "VAD metrics"
        ),
        AgentMetrics::Eou(m) => tracing::info!(
            target: "tutor_observe::metrics",
            kind = "EOU",
            end_of_utterance_delay = format_args!("{:.2}", m.end_of_utterance_delay),
            transcription_delay = format_args!("{:.2}", m.transcription_delay),
            probability = format_args!("{:.2}", m.probability),
            "EOU metrics"
        ),
    }
}
