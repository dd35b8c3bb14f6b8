//! Worker configuration loading from file and environment variables.

use crate::job::JobSettings;
use crate::pipeline::PipelineOptions;
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use thiserror::Error;
use tutor_observe::Pricing;
use tutor_voice::{LiveKitConfig, LlmConfig, SttConfig, TtsConfig};

/// Top-level worker configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Control surface network settings.
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// LiveKit room service. Disabled when `url` is empty.
    #[serde(default)]
    pub livekit: LiveKitConfig,

    #[serde(default)]
    pub stt: SttConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub tts: TtsConfig,

    /// Conversation and session behaviour.
    #[serde(default)]
    pub agent: AgentConfig,

    /// Unit prices for the usage report.
    #[serde(default)]
    pub pricing: Pricing,
}

/// Network configuration for the HTTP control surface.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "tutor_agent=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_true")]
    pub allow_interruptions: bool,

    #[serde(default = "default_min_endpointing_delay_ms")]
    pub min_endpointing_delay_ms: u64,

    #[serde(default = "default_max_endpointing_delay_ms")]
    pub max_endpointing_delay_ms: u64,

    /// Seconds to wait for a participant. `0` waits indefinitely.
    #[serde(default = "default_participant_timeout_secs")]
    pub participant_timeout_secs: u64,

    /// Seconds allowed for shutdown callbacks.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    #[serde(default = "default_true")]
    pub realtime_playout: bool,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    8081
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_min_endpointing_delay_ms() -> u64 {
    500
}

fn default_max_endpointing_delay_ms() -> u64 {
    6000
}

fn default_participant_timeout_secs() -> u64 {
    600
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            allow_interruptions: true,
            min_endpointing_delay_ms: default_min_endpointing_delay_ms(),
            max_endpointing_delay_ms: default_max_endpointing_delay_ms(),
            participant_timeout_secs: default_participant_timeout_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            realtime_playout: true,
        }
    }
}

impl Config {
    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            allow_interruptions: self.agent.allow_interruptions,
            min_endpointing_delay: Duration::from_millis(self.agent.min_endpointing_delay_ms),
            max_endpointing_delay: Duration::from_millis(self.agent.max_endpointing_delay_ms),
            realtime_playout: self.agent.realtime_playout,
            max_history: self.llm.max_history,
            ..PipelineOptions::default()
        }
    }

    pub fn job_settings(&self) -> JobSettings {
        JobSettings {
            participant_timeout: match self.agent.participant_timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            shutdown_timeout: Duration::from_secs(self.agent.shutdown_timeout_secs),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `TUTOR_HOST` overrides `worker.host`
/// - `TUTOR_PORT` overrides `worker.port`
/// - `TUTOR_LOG_LEVEL` overrides `logging.level`
/// - `TUTOR_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `TUTOR_PARTICIPANT_TIMEOUT_SECS` overrides `agent.participant_timeout_secs`
/// - `LIVEKIT_URL`, `LIVEKIT_API_KEY`, `LIVEKIT_API_SECRET` override `[livekit]`
/// - `STT_API_KEY`, `CEREBRAS_API_KEY`, `TTS_API_KEY` supply the endpoint
///   credentials, which are never read from the file
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    // Environment variable overrides
    if let Ok(host) = std::env::var("TUTOR_HOST") {
        if let Ok(parsed) = host.parse() {
            config.worker.host = parsed;
        }
    }
    if let Ok(port) = std::env::var("TUTOR_PORT") {
        if let Ok(parsed) = port.parse() {
            config.worker.port = parsed;
        }
    }
    if let Ok(level) = std::env::var("TUTOR_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Ok(json) = std::env::var("TUTOR_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Ok(secs) = std::env::var("TUTOR_PARTICIPANT_TIMEOUT_SECS") {
        if let Ok(parsed) = secs.parse() {
            config.agent.participant_timeout_secs = parsed;
        }
    }
    if let Ok(url) = std::env::var("LIVEKIT_URL") {
        config.livekit.url = url;
    }
    if let Ok(key) = std::env::var("LIVEKIT_API_KEY") {
        config.livekit.api_key = key;
    }
    if let Ok(secret) = std::env::var("LIVEKIT_API_SECRET") {
        config.livekit.api_secret = secret;
    }
    if let Ok(key) = std::env::var(SttConfig::API_KEY_ENV) {
        config.stt.api_key = key;
    }
    if let Ok(key) = std::env::var(LlmConfig::API_KEY_ENV) {
        config.llm.api_key = key;
    }
    if let Ok(key) = std::env::var(TtsConfig::API_KEY_ENV) {
        config.tts.api_key = key;
    }

    Ok(config)
}
