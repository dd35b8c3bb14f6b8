//! Voice infrastructure for the German tutor agent.
//!
//! Wraps everything between a LiveKit room and the conversation: the room
//! connection and its audio streams, voice activity detection, the
//! end-of-utterance model, and clients for the speech-to-text, language
//! model and speech synthesis endpoints.
//!
//! The plugin seams are traits ([`SpeechToText`], [`LanguageModel`],
//! [`TextToSpeech`], [`TurnDetector`], [`RoomConnector`]) so the pipeline
//! can run against the OpenAI-compatible services in production and against
//! in-process fakes in tests.

pub mod config;
pub mod error;
mod http;
pub mod llm;
pub mod room;
pub mod service;
pub mod stt;
pub mod tts;
pub mod turn;
pub mod vad;

pub use config::{LiveKitConfig, LlmConfig, SttConfig, TtsConfig};
pub use error::VoiceError;
pub use llm::{LanguageModel, LlmCompletion, OpenAiLlm, TokenUsage};
pub use room::{
    AutoSubscribe, BridgeConnector, ParticipantAudio, Room, RoomBridge, RoomConnector,
    RoomRegistry,
};
pub use service::VoiceService;
pub use stt::{OpenAiStt, SpeechEvent, SpeechToText};
pub use tts::{OpenAiTts, TextToSpeech, TTS_SAMPLE_RATE};
pub use turn::{EouModel, TurnDetector};
pub use vad::{Vad, VadAggressiveness, VadEvent, VadOptions, VadStats, VadStream};
