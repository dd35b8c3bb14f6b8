use crate::config::TtsConfig;
use crate::error::VoiceError;
use crate::http::{build_client, endpoint, ensure_success};
use async_trait::async_trait;
use serde::Serialize;
use std::io::Cursor;
use std::time::Duration;
use tracing::debug;
use tutor_types::AudioFrame;

/// Maximum text input size for TTS (64 KiB). Prevents resource exhaustion from
/// oversized synthesis requests.
const MAX_TTS_INPUT_BYTES: usize = 64 * 1024;

/// Timeout for one synthesis request.
const TTS_TIMEOUT: Duration = Duration::from_secs(60);

/// Sample rate of `response_format=pcm` audio.
pub const TTS_SAMPLE_RATE: u32 = 24_000;

#[async_trait]
pub trait TextToSpeech: Send + Sync {
    /// Synthesises `text` to mono PCM.
    async fn synthesize(&self, text: &str) -> Result<AudioFrame, VoiceError>;
}

/// Client for an OpenAI-compatible `audio/speech` endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiTts {
    config: TtsConfig,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'static str,
    speed: f32,
}

impl OpenAiTts {
    pub fn new(config: TtsConfig) -> Result<Self, VoiceError> {
        config.validate()?;
        Ok(Self {
            config,
            client: build_client(TTS_TIMEOUT)?,
        })
    }
}

#[async_trait]
impl TextToSpeech for OpenAiTts {
    async fn synthesize(&self, text: &str) -> Result<AudioFrame, VoiceError> {
        if text.len() > MAX_TTS_INPUT_BYTES {
            return Err(VoiceError::Tts(format!(
                "text exceeds maximum size: {} bytes (limit: {} bytes)",
                text.len(),
                MAX_TTS_INPUT_BYTES
            )));
        }
        if text.trim().is_empty() {
            return Ok(AudioFrame::new(Vec::new(), TTS_SAMPLE_RATE, 1));
        }

        let request = SpeechRequest {
            model: &self.config.model,
            input: text,
            voice: &self.config.voice,
            response_format: "pcm",
            speed: self.config.speed,
        };

        let url = endpoint(&self.config.base_url, "audio/speech");
        debug!(%url, chars = text.chars().count(), "sending speech request");
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;
        let response = ensure_success(response, VoiceError::Tts).await?;
        let bytes = response.bytes().await?;

        decode_pcm(&bytes)
    }
}

/// Decodes raw s16le PCM at [`TTS_SAMPLE_RATE`]. Some servers answer with
/// a WAV container despite `response_format=pcm`; its own rate and channel
/// count are used then.
pub fn decode_pcm(bytes: &[u8]) -> Result<AudioFrame, VoiceError> {
    if !bytes.starts_with(b"RIFF") {
        return Ok(AudioFrame::from_le_bytes(bytes, TTS_SAMPLE_RATE, 1));
    }

    let wav_error = |e: hound::Error| VoiceError::Tts(format!("invalid WAV response: {}", e));
    let reader = hound::WavReader::new(Cursor::new(bytes)).map_err(wav_error)?;
    let spec = reader.spec();
    if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(VoiceError::Tts(format!(
            "unsupported WAV response: {} bit {:?}",
            spec.bits_per_sample, spec.sample_format
        )));
    }
    let data = reader
        .into_samples::<i16>()
        .collect::<Result<Vec<_>, _>>()
        .map_err(wav_error)?;
    debug!(
        sample_rate = spec.sample_rate,
        channels = spec.channels,
        "speech response was a WAV file"
    );
    Ok(AudioFrame::new(data, spec.sample_rate, spec.channels))
}
