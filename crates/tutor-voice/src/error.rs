use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("LiveKit API error: {0}")]
    LiveKit(#[from] livekit_api::access_token::AccessTokenError),

    #[error("Room service error: {0}")]
    RoomService(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("STT error: {0}")]
    Stt(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("TTS error: {0}")]
    Tts(String),

    #[error("VAD error: {0}")]
    Vad(String),

    #[error("Room '{0}' is closed")]
    RoomClosed(String),

    #[error("Room '{0}' is already connected")]
    RoomAlreadyConnected(String),

    #[error("Audio stream of room '{0}' was already taken")]
    AudioStreamTaken(String),

    #[error("Timed out after {0:?} waiting for a participant")]
    ParticipantTimeout(std::time::Duration),
}
