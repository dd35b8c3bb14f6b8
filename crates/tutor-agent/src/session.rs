//! The tutor session entrypoint.
//!
//! Connects to the room with audio only, waits for the student, starts the
//! pipeline with the warm VAD and the persona context, wires the metrics
//! collector, registers the usage report as the shutdown callback and greets
//! the student once.

use crate::error::AgentError;
use crate::job::{EntrypointFn, JobContext};
use crate::persona::{initial_context, GREETING};
use crate::pipeline::{PipelineOptions, PipelinePlugins, VoicePipelineAgent};
use futures_util::FutureExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};
use tutor_observe::{MetricsCollector, Pricing, UsageSummary};
use tutor_types::ChatContext;
use tutor_voice::{
    AutoSubscribe, EouModel, LanguageModel, LlmConfig, OpenAiLlm, OpenAiStt, OpenAiTts,
    SpeechToText, SttConfig, TextToSpeech, TtsConfig, TurnDetector, VoiceError,
};

/// Builds the per-session (cold) plugins.
pub trait PluginFactory: Send + Sync {
    fn stt(&self) -> Result<Arc<dyn SpeechToText>, VoiceError>;
    fn llm(&self) -> Result<Arc<dyn LanguageModel>, VoiceError>;
    fn tts(&self) -> Result<Arc<dyn TextToSpeech>, VoiceError>;

    fn turn_detector(&self) -> Option<Arc<dyn TurnDetector>> {
        Some(Arc::new(EouModel::new()))
    }
}

/// OpenAI-compatible STT, LLM and TTS endpoints from configuration.
#[derive(Debug, Clone)]
pub struct OpenAiPlugins {
    stt: SttConfig,
    llm: LlmConfig,
    tts: TtsConfig,
}

impl OpenAiPlugins {
    pub fn new(stt: SttConfig, llm: LlmConfig, tts: TtsConfig) -> Self {
        Self { stt, llm, tts }
    }

    /// Checks every endpoint configuration, including credentials.
    pub fn validate(&self) -> Result<(), VoiceError> {
        self.stt.validate()?;
        self.llm.validate()?;
        self.tts.validate()
    }
}

impl PluginFactory for OpenAiPlugins {
    fn stt(&self) -> Result<Arc<dyn SpeechToText>, VoiceError> {
        Ok(Arc::new(OpenAiStt::new(self.stt.clone())?))
    }

    fn llm(&self) -> Result<Arc<dyn LanguageModel>, VoiceError> {
        Ok(Arc::new(OpenAiLlm::new(self.llm.clone())?))
    }

    fn tts(&self) -> Result<Arc<dyn TextToSpeech>, VoiceError> {
        Ok(Arc::new(OpenAiTts::new(self.tts.clone())?))
    }
}

#[derive(Debug, Clone, Default)]
pub struct TutorSettings {
    pub pipeline: PipelineOptions,
    pub pricing: Pricing,
}

/// What a finished session reports.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub job_id: String,
    pub room: String,
    pub participant: String,
    pub chat_ctx: ChatContext,
    pub usage: UsageSummary,
    pub estimated_cost: f64,
}

/// Builder for the tutor entrypoint.
#[derive(Clone)]
pub struct TutorEntrypoint {
    settings: TutorSettings,
    plugins: Arc<dyn PluginFactory>,
    reports: Option<mpsc::UnboundedSender<SessionReport>>,
}

impl TutorEntrypoint {
    pub fn new(settings: TutorSettings, plugins: Arc<dyn PluginFactory>) -> Self {
        Self {
            settings,
            plugins,
            reports: None,
        }
    }

    /// Also delivers each session's report on `reports`.
    #[must_use]
    pub fn with_reports(mut self, reports: mpsc::UnboundedSender<SessionReport>) -> Self {
        self.reports = Some(reports);
        self
    }

    pub fn into_entrypoint(self) -> EntrypointFn {
        let this = Arc::new(self);
        Arc::new(move |ctx| {
            let this = Arc::clone(&this);
            async move { this.run(ctx).await }.boxed()
        })
    }

    async fn run(&self, ctx: JobContext) -> Result<(), AgentError> {
        info!(room = %ctx.room_name(), "connecting to room");
        let room = ctx.connect(AutoSubscribe::AudioOnly).await?;

        let participant = ctx.wait_for_participant().await?;
        info!(
            identity = %participant.identity,
            "starting voice assistant for participant"
        );

        let plugins = PipelinePlugins {
            vad: ctx.proc().vad(),
            stt: self.plugins.stt()?,
            llm: self.plugins.llm()?,
            tts: self.plugins.tts()?,
            turn_detector: self.plugins.turn_detector(),
        };
        let agent = Arc::new(
            VoicePipelineAgent::new(plugins, initial_context())
                .with_options(self.settings.pipeline.clone()),
        );
        let metrics = agent
            .take_metrics_receiver()
            .ok_or(AgentError::MetricsTaken)?;

        agent.start(room, participant.clone())?;
        ctx.mark_pipeline_active()?;

        let collector = MetricsCollector::spawn(metrics);
        let report = ReportContext {
            job_id: ctx.job_id().to_string(),
            room: ctx.room_name().to_string(),
            participant: participant.identity,
            pricing: self.settings.pricing.clone(),
            sink: self.reports.clone(),
        };
        {
            let agent = Arc::clone(&agent);
            ctx.add_shutdown_callback(async move {
                let chat_ctx = agent.aclose().await;
                match collector.finish().await {
                    Ok(usage) => report.publish(chat_ctx, usage),
                    Err(e) => error!("metrics collector failed: {}", e),
                }
            });
        }

        agent.say(GREETING, true)?;
        Ok(())
    }
}

/// Shorthand for `TutorEntrypoint::new(settings, plugins).into_entrypoint()`.
pub fn tutor_entrypoint(settings: TutorSettings, plugins: Arc<dyn PluginFactory>) -> EntrypointFn {
    TutorEntrypoint::new(settings, plugins).into_entrypoint()
}

struct ReportContext {
    job_id: String,
    room: String,
    participant: String,
    pricing: Pricing,
    sink: Option<mpsc::UnboundedSender<SessionReport>>,
}

impl ReportContext {
    fn publish(self, chat_ctx: ChatContext, usage: UsageSummary) {
        let estimated_cost = usage.estimated_cost(&self.pricing);
        info!(job_id = %self.job_id, room = %self.room, "Usage: {}", usage);
        info!(
            job_id = %self.job_id,
            estimated_cost_usd = estimated_cost,
            "estimated session cost"
        );
        if let Some(sink) = self.sink {
            let _ = sink.send(SessionReport {
                job_id: self.job_id,
                room: self.room,
                participant: self.participant,
                chat_ctx,
                usage,
                estimated_cost,
            });
        }
    }
}
