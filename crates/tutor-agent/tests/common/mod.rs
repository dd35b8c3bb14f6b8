#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tutor_agent::PluginFactory;
use tutor_types::{AudioFrame, ChatContext};
use tutor_voice::{
    LanguageModel, LlmCompletion, RoomBridge, SpeechEvent, SpeechToText, TextToSpeech,
    TokenUsage, VoiceError, TTS_SAMPLE_RATE,
};

pub const WAIT: Duration = Duration::from_secs(10);
pub const TRANSCRIPT: &str = "Ich heiße Anna.";
pub const REPLY: &str = "Freut mich, Anna! Wie lange lernst du schon Deutsch?";
pub const PROMPT_TOKENS: u64 = 100;
pub const COMPLETION_TOKENS: u64 = 12;

/// 200 ms of synthesised audio, published as ten 20 ms frames.
pub const TTS_SAMPLES: usize = 4800;
pub const TTS_FRAMES: usize = 10;

const INPUT_RATE: u32 = 16_000;
const INPUT_FRAME_SAMPLES: usize = 320;

/// Ordered record of plugin calls across a session.
#[derive(Debug, Default)]
pub struct CallLog {
    entries: Mutex<Vec<String>>,
    requests: Mutex<Vec<ChatContext>>,
}

impl CallLog {
    fn push(&self, entry: impl Into<String>) {
        self.entries.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    pub fn llm_requests(&self) -> Vec<ChatContext> {
        self.requests.lock().unwrap().clone()
    }

    /// Polls until at least `count` calls were recorded.
    pub async fn wait_for_entries(&self, count: usize) -> Vec<String> {
        tokio::time::timeout(WAIT, async {
            loop {
                let entries = self.entries();
                if entries.len() >= count {
                    return entries;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("timed out waiting for plugin calls")
    }
}

pub struct FakeStt {
    log: Arc<CallLog>,
}

#[async_trait]
impl SpeechToText for FakeStt {
    async fn transcribe(&self, _audio: &AudioFrame) -> Result<SpeechEvent, VoiceError> {
        self.log.push("stt");
        Ok(SpeechEvent {
            text: TRANSCRIPT.to_string(),
            language: Some("de".to_string()),
        })
    }
}

pub struct FakeLlm {
    log: Arc<CallLog>,
    delay: Option<Duration>,
}

#[async_trait]
impl LanguageModel for FakeLlm {
    async fn chat(&self, chat_ctx: &ChatContext) -> Result<LlmCompletion, VoiceError> {
        self.log.push("llm");
        self.log.requests.lock().unwrap().push(chat_ctx.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(LlmCompletion {
            text: REPLY.to_string(),
            usage: TokenUsage {
                prompt_tokens: PROMPT_TOKENS,
                completion_tokens: COMPLETION_TOKENS,
                total_tokens: PROMPT_TOKENS + COMPLETION_TOKENS,
            },
        })
    }
}

pub struct FakeTts {
    log: Arc<CallLog>,
    samples: usize,
}

#[async_trait]
impl TextToSpeech for FakeTts {
    async fn synthesize(&self, text: &str) -> Result<AudioFrame, VoiceError> {
        self.log.push(format!("tts:{}", text));
        Ok(AudioFrame::new(vec![1000; self.samples], TTS_SAMPLE_RATE, 1))
    }
}

pub struct FakePlugins {
    pub log: Arc<CallLog>,
    pub tts_samples: usize,
    /// Time every completion takes.
    pub llm_delay: Option<Duration>,
}

impl FakePlugins {
    pub fn new(log: Arc<CallLog>) -> Self {
        Self {
            log,
            tts_samples: TTS_SAMPLES,
            llm_delay: None,
        }
    }

    pub fn fake_stt(&self) -> Arc<dyn SpeechToText> {
        Arc::new(FakeStt {
            log: Arc::clone(&self.log),
        })
    }

    pub fn fake_llm(&self) -> Arc<dyn LanguageModel> {
        Arc::new(FakeLlm {
            log: Arc::clone(&self.log),
            delay: self.llm_delay,
        })
    }

    pub fn fake_tts(&self) -> Arc<dyn TextToSpeech> {
        Arc::new(FakeTts {
            log: Arc::clone(&self.log),
            samples: self.tts_samples,
        })
    }
}

impl PluginFactory for FakePlugins {
    fn stt(&self) -> Result<Arc<dyn SpeechToText>, VoiceError> {
        Ok(self.fake_stt())
    }

    fn llm(&self) -> Result<Arc<dyn LanguageModel>, VoiceError> {
        Ok(self.fake_llm())
    }

    fn tts(&self) -> Result<Arc<dyn TextToSpeech>, VoiceError> {
        Ok(self.fake_tts())
    }
}

/// 20 ms of a 100 Hz buzz with harmonics up to 3 kHz, which the detector
/// hears as a voiced vowel. Holds two whole periods, so repeated frames join
/// smoothly.
pub fn speech_frame() -> AudioFrame {
    speech_frame_at(INPUT_RATE)
}

pub fn speech_frame_at(sample_rate: u32) -> AudioFrame {
    let samples = (0..sample_rate as usize / 50)
        .map(|i| {
            let t = i as f64 / sample_rate as f64;
            let value: f64 = (1..=30)
                .map(|k| {
                    let k = k as f64;
                    (2.0 * std::f64::consts::PI * 100.0 * k * t).sin() / k
                })
                .sum();
            (value * 6000.0) as i16
        })
        .collect();
    AudioFrame::new(samples, sample_rate, 1)
}

pub fn silence_frame() -> AudioFrame {
    AudioFrame::new(vec![0; INPUT_FRAME_SAMPLES], INPUT_RATE, 1)
}

/// Half a second of speech followed by enough silence to close the segment,
/// hangover included.
pub fn utterance() -> Vec<AudioFrame> {
    let mut frames = vec![speech_frame(); 25];
    frames.extend(vec![silence_frame(); 40]);
    frames
}

/// Waits for `count` frames of agent audio.
pub async fn collect_frames(bridge: &RoomBridge, count: usize) -> Vec<AudioFrame> {
    let mut frames = Vec::with_capacity(count);
    for _ in 0..count {
        let frame = tokio::time::timeout(WAIT, bridge.recv_published())
            .await
            .expect("timed out waiting for agent audio")
            .expect("room audio closed");
        frames.push(frame);
    }
    frames
}
