use crate::error::VoiceError;
use serde::{Deserialize, Serialize};
use std::fmt;

fn default_token_ttl_seconds() -> u64 {
    3600
}

fn default_agent_identity() -> String {
    "tutor-agent".to_string()
}

#[derive(Clone, Serialize, Deserialize)]
pub struct LiveKitConfig {
    /// Server URL used for Room Service calls. Empty disables LiveKit.
    #[serde(default)]
    pub url: String,
    /// Browser-facing URL. Falls back to `url` when empty.
    #[serde(default)]
    pub public_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default, skip_serializing)]
    pub api_secret: String,
    /// JWT token TTL in seconds for LiveKit join tokens. Default: 3600 (1 hour).
    #[serde(default = "default_token_ttl_seconds")]
    pub token_ttl_seconds: u64,
    /// Identity the agent joins rooms with.
    #[serde(default = "default_agent_identity")]
    pub agent_identity: String,
}

impl Default for LiveKitConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            public_url: String::new(),
            api_key: String::new(),
            api_secret: String::new(),
            token_ttl_seconds: default_token_ttl_seconds(),
            agent_identity: default_agent_identity(),
        }
    }
}

impl fmt::Debug for LiveKitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveKitConfig")
            .field("url", &self.url)
            .field("public_url", &self.public_url)
            .field("api_key", &self.api_key)
            .field("api_secret", &"[REDACTED]")
            .field("token_ttl_seconds", &self.token_ttl_seconds)
            .field("agent_identity", &self.agent_identity)
            .finish()
    }
}

impl LiveKitConfig {
    pub fn new(
        url: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            ..Self::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.url.is_empty()
    }
}

fn redact(key: &str) -> &'static str {
    if key.is_empty() {
        "[EMPTY]"
    } else {
        "[REDACTED]"
    }
}

fn require(value: &str, what: &str) -> Result<(), VoiceError> {
    if value.trim().is_empty() {
        return Err(VoiceError::Config(format!("{what} must not be empty")));
    }
    Ok(())
}

/// Speech-to-text endpoint (OpenAI `audio/transcriptions` compatible).
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SttConfig {
    pub base_url: String,
    pub model: String,
    /// ISO-639-1 language hint sent with each request.
    pub language: String,
    #[serde(skip_serializing)]
    pub api_key: String,
}

impl SttConfig {
    /// Environment variable holding the STT credential.
    pub const API_KEY_ENV: &'static str = "STT_API_KEY";

    pub fn validate(&self) -> Result<(), VoiceError> {
        require(&self.base_url, "stt.base_url")?;
        require(&self.model, "stt.model")?;
        require(&self.api_key, Self::API_KEY_ENV)
    }
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            base_url: "https://stt.appautomation.cloud/v1".to_string(),
            model: "whisper-1".to_string(),
            language: "de".to_string(),
            api_key: String::new(),
        }
    }
}

impl fmt::Debug for SttConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SttConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("language", &self.language)
            .field("api_key", &redact(&self.api_key))
            .finish()
    }
}

/// Chat-completion endpoint (OpenAI `chat/completions` compatible).
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: Option<f32>,
    /// Non-system messages sent per request; older turns are dropped.
    pub max_history: usize,
    #[serde(skip_serializing)]
    pub api_key: String,
}

impl LlmConfig {
    /// Environment variable holding the LLM credential.
    pub const API_KEY_ENV: &'static str = "CEREBRAS_API_KEY";

    pub fn validate(&self) -> Result<(), VoiceError> {
        require(&self.base_url, "llm.base_url")?;
        require(&self.model, "llm.model")?;
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(VoiceError::Config(
                    "llm.temperature must be between 0.0 and 2.0".to_string(),
                ));
            }
        }
        require(&self.api_key, Self::API_KEY_ENV)
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.cerebras.ai/v1".to_string(),
            model: "llama3.1-8b".to_string(),
            temperature: None,
            max_history: 40,
            api_key: String::new(),
        }
    }
}

impl fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_history", &self.max_history)
            .field("api_key", &redact(&self.api_key))
            .finish()
    }
}

/// Speech synthesis endpoint (OpenAI `audio/speech` compatible).
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    pub base_url: String,
    pub model: String,
    pub voice: String,
    pub speed: f32,
    #[serde(skip_serializing)]
    pub api_key: String,
}

impl TtsConfig {
    /// Environment variable holding the TTS credential.
    pub const API_KEY_ENV: &'static str = "TTS_API_KEY";

    pub fn validate(&self) -> Result<(), VoiceError> {
        require(&self.base_url, "tts.base_url")?;
        require(&self.voice, "tts.voice")?;
        if !(0.25..=4.0).contains(&self.speed) {
            return Err(VoiceError::Config(
                "tts.speed must be between 0.25 and 4.0".to_string(),
            ));
        }
        require(&self.api_key, Self::API_KEY_ENV)
    }
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            base_url: "https://tts.appautomation.cloud/v1".to_string(),
            model: "tts-1".to_string(),
            voice: "de-DE-SeraphinaMultilingualNeural".to_string(),
            speed: 1.0,
            api_key: String::new(),
        }
    }
}

impl fmt::Debug for TtsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TtsConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("voice", &self.voice)
            .field("speed", &self.speed)
            .field("api_key", &redact(&self.api_key))
            .finish()
    }
}
