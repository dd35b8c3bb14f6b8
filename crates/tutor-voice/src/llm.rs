use crate::config::LlmConfig;
use crate::error::VoiceError;
use crate::http::{build_client, endpoint, ensure_success};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use tutor_types::{ChatContext, ChatMessage};

/// Timeout for one chat completion.
const LLM_TIMEOUT: Duration = Duration::from_secs(60);

/// Token accounting reported by the endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmCompletion {
    pub text: String,
    pub usage: TokenUsage,
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Produces the assistant's reply to the conversation so far.
    async fn chat(&self, chat_ctx: &ChatContext) -> Result<LlmCompletion, VoiceError>;
}

/// Client for an OpenAI-compatible `chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiLlm {
    config: LlmConfig,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiLlm {
    pub fn new(config: LlmConfig) -> Result<Self, VoiceError> {
        config.validate()?;
        Ok(Self {
            config,
            client: build_client(LLM_TIMEOUT)?,
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAiLlm {
    async fn chat(&self, chat_ctx: &ChatContext) -> Result<LlmCompletion, VoiceError> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: chat_ctx.messages(),
            temperature: self.config.temperature,
            stream: false,
        };

        let url = endpoint(&self.config.base_url, "chat/completions");
        debug!(%url, messages = chat_ctx.len(), "sending chat completion request");
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;
        let response = ensure_success(response, VoiceError::Llm).await?;

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| VoiceError::Llm(format!("invalid completion response: {}", e)))?;
        let text = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| VoiceError::Llm("completion contained no choices".to_string()))?;

        Ok(LlmCompletion {
            text: text.trim().to_string(),
            usage: body.usage.unwrap_or_default(),
        })
    }
}
