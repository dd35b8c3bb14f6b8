mod common;

use common::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tutor_agent::persona::{initial_context, GREETING};
use tutor_agent::{AgentError, AgentEvent, PipelineOptions, PipelinePlugins, VoicePipelineAgent};
use tutor_observe::{MetricKind, MetricsCollector, UsageCollector};
use tutor_types::{ChatRole, Participant};
use tutor_voice::{AutoSubscribe, EouModel, Room, RoomBridge, Vad};

const STUDENT: &str = "student-1";
const LONG_ANSWER: &str =
    "Sehr gut! Jetzt üben wir das Perfekt mit einigen Verben, die du jeden Tag benutzt.";

fn agent_for(plugins: &FakePlugins, options: PipelineOptions) -> VoicePipelineAgent {
    let pipeline = PipelinePlugins {
        vad: Arc::new(Vad::load().unwrap()),
        stt: plugins.fake_stt(),
        llm: plugins.fake_llm(),
        tts: plugins.fake_tts(),
        turn_detector: Some(Arc::new(EouModel::new())),
    };
    VoicePipelineAgent::new(pipeline, initial_context()).with_options(options)
}

fn fast_options() -> PipelineOptions {
    PipelineOptions {
        realtime_playout: false,
        min_endpointing_delay: Duration::from_millis(50),
        ..PipelineOptions::default()
    }
}

fn open_room() -> (Arc<Room>, RoomBridge) {
    let (room, bridge) = Room::pair("lesson", AutoSubscribe::AudioOnly);
    bridge.join(Participant::new(STUDENT));
    (Arc::new(room), bridge)
}

async fn next_matching<F>(events: &mut broadcast::Receiver<AgentEvent>, mut matches: F) -> AgentEvent
where
    F: FnMut(&AgentEvent) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await {
                Ok(event) if matches(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("agent events closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for agent event")
}

#[tokio::test]
async fn greeting_and_turn_commit_to_context() {
    let log = Arc::new(CallLog::default());
    let plugins = FakePlugins::new(Arc::clone(&log));
    let agent = agent_for(&plugins, fast_options());
    let (room, bridge) = open_room();

    agent.start(room, Participant::new(STUDENT)).unwrap();
    agent.say(GREETING, true).unwrap();
    collect_frames(&bridge, TTS_FRAMES).await;

    for frame in utterance() {
        assert!(bridge.push_audio(STUDENT, frame).await.unwrap());
    }
    collect_frames(&bridge, TTS_FRAMES).await;

    let chat_ctx = agent.aclose().await;
    let roles: Vec<ChatRole> = chat_ctx.messages().iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![
            ChatRole::System,
            ChatRole::Assistant,
            ChatRole::User,
            ChatRole::Assistant
        ]
    );
    assert_eq!(chat_ctx.messages()[1].content, GREETING);
    assert_eq!(chat_ctx.messages()[2].content, TRANSCRIPT);
    assert_eq!(chat_ctx.messages()[3].content, REPLY);

    // The model saw the persona once, the greeting and the student turn.
    let requests = log.llm_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].system_messages().count(), 1);
    assert_eq!(requests[0].len(), 3);
    assert_eq!(requests[0].last_user_message(), Some(TRANSCRIPT));
}

#[tokio::test]
async fn collector_summary_matches_emitted_metrics() {
    let log = Arc::new(CallLog::default());
    let plugins = FakePlugins::new(log);
    let agent = agent_for(&plugins, fast_options());
    let metrics = agent.take_metrics_receiver().unwrap();
    assert!(agent.take_metrics_receiver().is_none());
    let mut events = agent.subscribe();
    let collector = MetricsCollector::spawn(metrics);
    let (room, bridge) = open_room();

    agent.start(room, Participant::new(STUDENT)).unwrap();
    agent.say(GREETING, true).unwrap();
    collect_frames(&bridge, TTS_FRAMES).await;
    for frame in utterance() {
        bridge.push_audio(STUDENT, frame).await.unwrap();
    }
    collect_frames(&bridge, TTS_FRAMES).await;

    agent.aclose().await;
    let summary = collector.finish().await.unwrap();

    let mut folded = UsageCollector::new();
    while let Ok(event) = events.try_recv() {
        if let AgentEvent::MetricsCollected(metrics) = event {
            folded.collect(&metrics);
        }
    }
    assert_eq!(summary, folded.get_summary());
    assert_eq!(summary.events(MetricKind::Tts), 2);
    assert_eq!(summary.events(MetricKind::Stt), 1);
    assert_eq!(summary.llm_prompt_tokens, PROMPT_TOKENS);
    assert_eq!(summary.llm_completion_tokens, COMPLETION_TOKENS);
}

#[tokio::test]
async fn user_speech_interrupts_reply_and_truncates_context() {
    let log = Arc::new(CallLog::default());
    let mut plugins = FakePlugins::new(log);
    // Two seconds of audio, played at real time.
    plugins.tts_samples = 48_000;
    let options = PipelineOptions {
        realtime_playout: true,
        ..fast_options()
    };
    let agent = agent_for(&plugins, options);
    let mut events = agent.subscribe();
    let (room, bridge) = open_room();

    agent.start(room, Participant::new(STUDENT)).unwrap();
    let speech = agent.say(LONG_ANSWER, true).unwrap();
    next_matching(&mut events, |e| {
        matches!(e, AgentEvent::AgentStartedSpeaking { .. })
    })
    .await;

    for _ in 0..5 {
        bridge.push_audio(STUDENT, speech_frame()).await.unwrap();
    }
    let event = next_matching(&mut events, |e| {
        matches!(e, AgentEvent::AgentSpeechInterrupted { .. })
    })
    .await;
    let AgentEvent::AgentSpeechInterrupted { speech_id, text } = event else {
        unreachable!()
    };
    assert_eq!(speech_id, speech.id());
    assert!(text.len() < LONG_ANSWER.len());
    assert!(LONG_ANSWER.starts_with(&text));
    assert!(speech.is_interrupted());
    speech.wait_for_playout().await;

    let chat_ctx = agent.aclose().await;
    assert!(chat_ctx
        .messages()
        .iter()
        .all(|m| m.content != LONG_ANSWER));
}

#[tokio::test]
async fn uninterruptible_speech_plays_to_the_end() {
    let log = Arc::new(CallLog::default());
    let mut plugins = FakePlugins::new(log);
    plugins.tts_samples = 12_000;
    let options = PipelineOptions {
        realtime_playout: true,
        ..fast_options()
    };
    let agent = agent_for(&plugins, options);
    let mut events = agent.subscribe();
    let (room, bridge) = open_room();

    agent.start(room, Participant::new(STUDENT)).unwrap();
    let speech = agent.say(GREETING, false).unwrap();
    next_matching(&mut events, |e| {
        matches!(e, AgentEvent::AgentStartedSpeaking { .. })
    })
    .await;
    for _ in 0..5 {
        bridge.push_audio(STUDENT, speech_frame()).await.unwrap();
    }

    let event = next_matching(&mut events, |e| {
        matches!(
            e,
            AgentEvent::AgentSpeechCommitted { .. } | AgentEvent::AgentSpeechInterrupted { .. }
        )
    })
    .await;
    match event {
        AgentEvent::AgentSpeechCommitted { text, .. } => assert_eq!(text, GREETING),
        other => panic!("expected committed speech, got {:?}", other),
    }
    assert!(!speech.is_interrupted());
    agent.aclose().await;
}

#[tokio::test]
async fn audio_from_other_participants_is_ignored() {
    let log = Arc::new(CallLog::default());
    let plugins = FakePlugins::new(Arc::clone(&log));
    let agent = agent_for(&plugins, fast_options());
    let (room, bridge) = open_room();
    bridge.join(Participant::new("observer"));

    agent.start(room, Participant::new(STUDENT)).unwrap();
    for frame in utterance() {
        bridge.push_audio("observer", frame).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    agent.aclose().await;
    assert!(log.entries().is_empty());
}

#[tokio::test]
async fn start_twice_and_say_after_close_fail() {
    let log = Arc::new(CallLog::default());
    let plugins = FakePlugins::new(log);
    let agent = agent_for(&plugins, fast_options());
    let (room, _bridge) = open_room();

    agent
        .start(Arc::clone(&room), Participant::new(STUDENT))
        .unwrap();
    let err = agent.start(room, Participant::new(STUDENT)).unwrap_err();
    assert!(matches!(err, AgentError::AlreadyStarted));

    agent.aclose().await;
    let err = agent.say("Tschüss!", true).unwrap_err();
    assert!(matches!(err, AgentError::Closed));
}

#[tokio::test]
async fn interruptible_say_is_cut_even_when_replies_are_not() {
    let log = Arc::new(CallLog::default());
    let mut plugins = FakePlugins::new(log);
    plugins.tts_samples = 48_000;
    let options = PipelineOptions {
        allow_interruptions: false,
        realtime_playout: true,
        ..fast_options()
    };
    let agent = agent_for(&plugins, options);
    let mut events = agent.subscribe();
    let (room, bridge) = open_room();

    agent.start(room, Participant::new(STUDENT)).unwrap();
    let speech = agent.say(LONG_ANSWER, true).unwrap();
    next_matching(&mut events, |e| {
        matches!(e, AgentEvent::AgentStartedSpeaking { .. })
    })
    .await;
    for _ in 0..5 {
        bridge.push_audio(STUDENT, speech_frame()).await.unwrap();
    }

    let event = next_matching(&mut events, |e| {
        matches!(e, AgentEvent::AgentSpeechInterrupted { .. })
    })
    .await;
    let AgentEvent::AgentSpeechInterrupted { speech_id, .. } = event else {
        unreachable!()
    };
    assert_eq!(speech_id, speech.id());
    assert!(speech.is_interrupted());
    agent.aclose().await;
}

#[tokio::test]
async fn close_does_not_wait_for_a_slow_completion() {
    let log = Arc::new(CallLog::default());
    let mut plugins = FakePlugins::new(Arc::clone(&log));
    plugins.llm_delay = Some(Duration::from_secs(30));
    let agent = agent_for(&plugins, fast_options());
    let collector = MetricsCollector::spawn(agent.take_metrics_receiver().unwrap());
    let (room, bridge) = open_room();

    agent.start(room, Participant::new(STUDENT)).unwrap();
    for frame in utterance() {
        bridge.push_audio(STUDENT, frame).await.unwrap();
    }
    assert_eq!(log.wait_for_entries(2).await, vec!["stt", "llm"]);

    let chat_ctx = tokio::time::timeout(Duration::from_secs(2), agent.aclose())
        .await
        .expect("close waited for the language model");
    assert_eq!(chat_ctx.last_user_message(), Some(TRANSCRIPT));
    assert_eq!(chat_ctx.messages().last().map(|m| m.role), Some(ChatRole::User));

    let summary = collector.finish().await.unwrap();
    assert_eq!(summary.events(MetricKind::Llm), 1);
    assert_eq!(summary.llm_prompt_tokens, 0);
    assert_eq!(summary.events(MetricKind::Tts), 0);
    assert_eq!(log.entries().len(), 2);
}

#[tokio::test]
async fn room_closing_during_a_slow_completion_stops_the_pipeline() {
    let log = Arc::new(CallLog::default());
    let mut plugins = FakePlugins::new(Arc::clone(&log));
    plugins.llm_delay = Some(Duration::from_secs(30));
    let agent = agent_for(&plugins, fast_options());
    let mut events = agent.subscribe();
    let (room, bridge) = open_room();

    agent.start(room, Participant::new(STUDENT)).unwrap();
    for frame in utterance() {
        bridge.push_audio(STUDENT, frame).await.unwrap();
    }
    log.wait_for_entries(2).await;
    bridge.close();

    let event = next_matching(&mut events, |e| {
        matches!(e, AgentEvent::MetricsCollected(m) if m.kind() == MetricKind::Llm)
    })
    .await;
    let AgentEvent::MetricsCollected(tutor_observe::AgentMetrics::Llm(metrics)) = event else {
        unreachable!()
    };
    assert!(metrics.cancelled);
    assert_eq!(metrics.total_tokens, 0);
    tokio::time::timeout(Duration::from_secs(2), agent.aclose())
        .await
        .expect("pipeline kept waiting after the room closed");
}

#[tokio::test]
async fn segment_mixing_sample_rates_is_not_transcribed() {
    let log = Arc::new(CallLog::default());
    let plugins = FakePlugins::new(Arc::clone(&log));
    let agent = agent_for(&plugins, fast_options());
    let mut events = agent.subscribe();
    let (room, bridge) = open_room();

    agent.start(room, Participant::new(STUDENT)).unwrap();
    for _ in 0..10 {
        bridge.push_audio(STUDENT, speech_frame()).await.unwrap();
    }
    for _ in 0..10 {
        bridge.push_audio(STUDENT, speech_frame_at(48_000)).await.unwrap();
    }
    for _ in 0..40 {
        bridge.push_audio(STUDENT, silence_frame()).await.unwrap();
    }
    next_matching(&mut events, |e| matches!(e, AgentEvent::UserStoppedSpeaking)).await;

    agent.aclose().await;
    assert!(log.entries().is_empty());
}
