//! Unit tests for metrics accounting.

use chrono::Utc;
use tokio::sync::mpsc;

use crate::collector::MetricsCollector;
use crate::metrics::{
    AgentMetrics, EouMetrics, LlmMetrics, MetricKind, SttMetrics, TtsMetrics, VadMetrics,
};
use crate::usage::{Pricing, UsageCollector, UsageSummary};

fn stt(audio_duration: f64) -> AgentMetrics {
    AgentMetrics::Stt(SttMetrics {
        request_id: "stt-1".to_string(),
        timestamp: Utc::now(),
        duration: 0.4,
        audio_duration,
        streamed: false,
    })
}

fn llm(prompt_tokens: u64, completion_tokens: u64) -> AgentMetrics {
    AgentMetrics::Llm(LlmMetrics {
        request_id: "llm-1".to_string(),
        timestamp: Utc::now(),
        ttft: 0.3,
        duration: 0.3,
        cancelled: false,
        prompt_tokens,
        completion_tokens,
        total_tokens: prompt_tokens + completion_tokens,
        tokens_per_second: 100.0,
    })
}

fn tts(characters_count: u64, audio_duration: f64) -> AgentMetrics {
    AgentMetrics::Tts(TtsMetrics {
        request_id: "tts-1".to_string(),
        timestamp: Utc::now(),
        ttfb: 0.2,
        duration: 0.2,
        audio_duration,
        characters_count,
        cancelled: false,
    })
}

fn vad() -> AgentMetrics {
    AgentMetrics::Vad(VadMetrics {
        timestamp: Utc::now(),
        idle_time: 1.0,
        inference_count: 50,
        inference_duration_total: 0.01,
    })
}

fn eou() -> AgentMetrics {
    AgentMetrics::Eou(EouMetrics {
        timestamp: Utc::now(),
        end_of_utterance_delay: 0.6,
        transcription_delay: 0.4,
        probability: 0.9,
    })
}

// ── MetricKind ───────────────────────────────────────────────────────

#[test]
fn metric_kind_string_round_trip() {
    for kind in [
        MetricKind::Stt,
        MetricKind::Llm,
        MetricKind::Tts,
        MetricKind::Vad,
        MetricKind::Eou,
    ] {
        let parsed: MetricKind = kind.as_str().parse().expect("should parse");
        assert_eq!(parsed, kind);
    }
    let err = "ASR".parse::<MetricKind>().unwrap_err();
    assert_eq!(err.to_string(), "unknown metric kind: ASR");
}

#[test]
fn agent_metrics_serializes_with_kind_tag() {
    let json = serde_json::to_value(llm(10, 5)).expect("serialize");
    assert_eq!(json["kind"], "LLM");
    assert_eq!(json["prompt_tokens"], 10);
}

// ── UsageCollector ───────────────────────────────────────────────────

#[test]
fn collect_folds_every_kind() {
    let mut usage = UsageCollector::new();
    for event in [
        stt(2.0),
        eou(),
        llm(120, 30),
        tts(80, 4.5),
        vad(),
        stt(1.5),
        llm(200, 40),
        tts(20, 1.0),
    ] {
        usage.collect(&event);
    }

    let summary = usage.get_summary();
    assert_eq!(summary.llm_prompt_tokens, 320);
    assert_eq!(summary.llm_completion_tokens, 70);
    assert_eq!(summary.tts_characters_count, 100);
    assert!((summary.tts_audio_duration - 5.5).abs() < 1e-9);
    assert!((summary.stt_audio_duration - 3.5).abs() < 1e-9);
    assert_eq!(summary.events(MetricKind::Stt), 2);
    assert_eq!(summary.events(MetricKind::Llm), 2);
    assert_eq!(summary.events(MetricKind::Vad), 1);
    assert_eq!(summary.total_events(), 8);
}

#[test]
fn empty_summary_is_default() {
    assert_eq!(UsageCollector::new().get_summary(), UsageSummary::default());
}

#[test]
fn estimated_cost_uses_unit_prices() {
    let mut usage = UsageCollector::new();
    usage.collect(&llm(1_000_000, 500_000));
    usage.collect(&tts(2_000_000, 10.0));
    usage.collect(&stt(120.0));

    let pricing = Pricing {
        llm_prompt_per_million: 0.10,
        llm_completion_per_million: 0.20,
        tts_per_million_characters: 15.0,
        stt_per_minute: 0.006,
    };
    let cost = usage.get_summary().estimated_cost(&pricing);
    // 0.10 + 0.10 + 30.0 + 0.012
    assert!((cost - 30.212).abs() < 1e-9, "cost was {cost}");
}

#[test]
fn summary_display_lists_event_counts() {
    let mut usage = UsageCollector::new();
    usage.collect(&llm(3, 4));
    let line = usage.get_summary().to_string();
    assert!(line.contains("llm_prompt_tokens=3"));
    assert!(line.contains("llm_completion_tokens=4"));
    assert!(line.contains("llm_events=1"));
}

// ── MetricsCollector ─────────────────────────────────────────────────

#[tokio::test]
async fn collector_finish_waits_for_all_events() {
    let (tx, rx) = mpsc::unbounded_channel();
    let collector = MetricsCollector::spawn(rx);

    for i in 0..100 {
        tx.send(llm(i, 1)).expect("collector should be receiving");
    }
    drop(tx);

    let summary = collector.finish().await.expect("finish should succeed");
    assert_eq!(summary.llm_prompt_tokens, (0..100).sum::<u64>());
    assert_eq!(summary.llm_completion_tokens, 100);
    assert_eq!(summary.events(MetricKind::Llm), 100);
}

#[tokio::test]
async fn collector_snapshot_is_available_before_finish() {
    let (tx, rx) = mpsc::unbounded_channel();
    let collector = MetricsCollector::spawn(rx);

    tx.send(stt(2.0)).unwrap();
    for _ in 0..50 {
        if collector.get_summary().events(MetricKind::Stt) == 1 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    assert_eq!(collector.get_summary().events(MetricKind::Stt), 1);

    drop(tx);
    let summary = collector.finish().await.unwrap();
    assert!((summary.stt_audio_duration - 2.0).abs() < 1e-9);
}
