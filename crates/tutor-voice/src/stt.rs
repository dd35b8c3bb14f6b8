use crate::config::SttConfig;
use crate::error::VoiceError;
use crate::http::{build_client, endpoint, ensure_success};
use async_trait::async_trait;
use serde::Deserialize;
use std::io::Cursor;
use std::time::Duration;
use tracing::debug;
use tutor_types::AudioFrame;

/// Maximum audio input size for STT (10 MiB). Prevents OOM from oversized payloads.
const MAX_STT_INPUT_BYTES: usize = 10 * 1024 * 1024;

/// Timeout for one transcription request.
const STT_TIMEOUT: Duration = Duration::from_secs(120);

/// Final transcript of one speech segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechEvent {
    pub text: String,
    pub language: Option<String>,
}

#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe(&self, audio: &AudioFrame) -> Result<SpeechEvent, VoiceError>;
}

/// Client for an OpenAI-compatible `audio/transcriptions` endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiStt {
    config: SttConfig,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: String,
    #[serde(default)]
    language: Option<String>,
}

impl OpenAiStt {
    pub fn new(config: SttConfig) -> Result<Self, VoiceError> {
        config.validate()?;
        Ok(Self {
            config,
            client: build_client(STT_TIMEOUT)?,
        })
    }
}

#[async_trait]
impl SpeechToText for OpenAiStt {
    async fn transcribe(&self, audio: &AudioFrame) -> Result<SpeechEvent, VoiceError> {
        if audio.is_empty() {
            return Ok(SpeechEvent {
                text: String::new(),
                language: None,
            });
        }

        let wav = encode_wav(audio)?;
        if wav.len() > MAX_STT_INPUT_BYTES {
            return Err(VoiceError::Stt(format!(
                "audio data exceeds maximum size: {} bytes (limit: {} bytes)",
                wav.len(),
                MAX_STT_INPUT_BYTES
            )));
        }

        let part = reqwest::multipart::Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| VoiceError::Stt(e.to_string()))?;
        let mut form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.config.model.clone())
            .text("response_format", "json");
        if !self.config.language.is_empty() {
            form = form.text("language", self.config.language.clone());
        }

        let url = endpoint(&self.config.base_url, "audio/transcriptions");
        debug!(%url, samples = audio.data.len(), "sending transcription request");
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .multipart(form)
            .send()
            .await?;
        let response = ensure_success(response, VoiceError::Stt).await?;

        let body: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| VoiceError::Stt(format!("invalid transcription response: {}", e)))?;

        Ok(SpeechEvent {
            text: body.text.trim().to_string(),
            language: body.language.or_else(|| Some(self.config.language.clone())),
        })
    }
}

/// Encodes PCM as a 16-bit WAV file for upload.
pub fn encode_wav(frame: &AudioFrame) -> Result<Vec<u8>, VoiceError> {
    let spec = hound::WavSpec {
        channels: frame.num_channels.max(1),
        sample_rate: frame.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let wav_error = |e: hound::Error| VoiceError::Stt(format!("WAV encoding failed: {}", e));

    let mut cursor = Cursor::new(Vec::with_capacity(44 + frame.data.len() * 2));
    let mut writer = hound::WavWriter::new(&mut cursor, spec).map_err(wav_error)?;
    for &sample in &frame.data {
        writer.write_sample(sample).map_err(wav_error)?;
    }
    writer.finalize().map_err(wav_error)?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_upload_is_readable_by_a_wav_decoder() {
        let frame = AudioFrame::new(vec![0, 1, -1, 2, 300, -300], 16_000, 2);
        let wav = encode_wav(&frame).unwrap();

        let reader = hound::WavReader::new(Cursor::new(wav)).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.sample_rate, 16_000);
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(spec.sample_format, hound::SampleFormat::Int);
        let samples: Vec<i16> = reader
            .into_samples::<i16>()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(samples, frame.data);
    }

    #[test]
    fn new_requires_api_key() {
        let err = OpenAiStt::new(SttConfig::default()).unwrap_err();
        assert!(err.to_string().contains("STT_API_KEY"));
    }
}
