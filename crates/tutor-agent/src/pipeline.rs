//! Voice pipeline agent: VAD → STT → turn detection → LLM → TTS → playout.
//!
//! Each started agent runs two tasks. The session loop owns the per-session
//! state (VAD stream, buffered transcript, reply deadline) and processes, in
//! priority order, commands, playout reports, room closure, inbound audio and
//! the reply deadline. STT, LLM and TTS requests race the agent's shutdown
//! and the room's closure, so a slow service never holds up teardown. The
//! playout task paces synthesised audio into the room and reports how much
//! of each speech was actually played, so the conversation context records
//! what the user heard.
//!
//! The conversation context sits behind a `std::sync::Mutex`: every
//! acquisition is a short push or clone that never spans an `.await`.

use crate::error::AgentError;
use chrono::Utc;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use tutor_observe::{AgentMetrics, EouMetrics, LlmMetrics, SttMetrics, TtsMetrics, VadMetrics};
use tutor_types::{AudioFrame, ChatContext, ChatRole, Participant};
use tutor_voice::{
    LanguageModel, ParticipantAudio, Room, SpeechToText, TextToSpeech, TurnDetector, Vad,
    VadEvent, VadStream,
};

const EVENT_CAPACITY: usize = 256;

/// Plugins a pipeline runs on. The VAD is the process-wide warm instance;
/// the rest are created per session.
#[derive(Clone)]
pub struct PipelinePlugins {
    pub vad: Arc<Vad>,
    pub stt: Arc<dyn SpeechToText>,
    pub llm: Arc<dyn LanguageModel>,
    pub tts: Arc<dyn TextToSpeech>,
    pub turn_detector: Option<Arc<dyn TurnDetector>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOptions {
    /// Whether replies generated from user turns may be interrupted.
    pub allow_interruptions: bool,
    /// Wait after a user turn that is likely complete.
    pub min_endpointing_delay: Duration,
    /// Wait after a user turn the turn detector considers unfinished.
    pub max_endpointing_delay: Duration,
    /// Pace playout at audio speed. Disabled in tests.
    pub realtime_playout: bool,
    /// Duration of each published frame.
    pub playout_frame: Duration,
    /// Non-system messages sent to the language model per request.
    pub max_history: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            allow_interruptions: true,
            min_endpointing_delay: Duration::from_millis(500),
            max_endpointing_delay: Duration::from_secs(6),
            realtime_playout: true,
            playout_frame: Duration::from_millis(20),
            max_history: 40,
        }
    }
}

/// Events observable through [`VoicePipelineAgent::subscribe`].
#[derive(Debug, Clone)]
pub enum AgentEvent {
    UserStartedSpeaking,
    UserStoppedSpeaking,
    UserTranscript { text: String },
    UserSpeechCommitted { text: String },
    AgentStartedSpeaking { speech_id: String },
    AgentSpeechCommitted { speech_id: String, text: String },
    AgentSpeechInterrupted { speech_id: String, text: String },
    MetricsCollected(AgentMetrics),
}

/// A queued or playing utterance of the agent.
#[derive(Debug, Clone)]
pub struct SpeechHandle {
    inner: Arc<SpeechInner>,
}

#[derive(Debug)]
struct SpeechInner {
    id: String,
    text: String,
    allow_interruptions: bool,
    interrupted: watch::Sender<bool>,
    done: watch::Sender<bool>,
}

impl SpeechHandle {
    fn new(text: impl Into<String>, allow_interruptions: bool) -> Self {
        let (interrupted, _) = watch::channel(false);
        let (done, _) = watch::channel(false);
        Self {
            inner: Arc::new(SpeechInner {
                id: format!("SP_{}", uuid::Uuid::new_v4().simple()),
                text: text.into(),
                allow_interruptions,
                interrupted,
                done,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn text(&self) -> &str {
        &self.inner.text
    }

    pub fn allow_interruptions(&self) -> bool {
        self.inner.allow_interruptions
    }

    /// Stops the speech. Returns `false` if it does not allow interruptions
    /// or already finished.
    pub fn interrupt(&self) -> bool {
        if !self.inner.allow_interruptions || self.is_done() {
            return false;
        }
        self.force_interrupt();
        true
    }

    fn force_interrupt(&self) {
        self.inner.interrupted.send_replace(true);
    }

    pub fn is_interrupted(&self) -> bool {
        *self.inner.interrupted.borrow()
    }

    pub fn is_done(&self) -> bool {
        *self.inner.done.borrow()
    }

    fn mark_done(&self) {
        self.inner.done.send_replace(true);
    }

    /// Resolves once the speech was played out, interrupted or dropped.
    pub async fn wait_for_playout(&self) {
        let mut done = self.inner.done.subscribe();
        let _ = done.wait_for(|d| *d).await;
    }

    async fn interrupted(&self) {
        let mut interrupted = self.inner.interrupted.subscribe();
        let _ = interrupted.wait_for(|i| *i).await;
    }
}

enum Command {
    Say(SpeechHandle),
}

struct PlayoutRequest {
    handle: SpeechHandle,
    audio: AudioFrame,
}

/// Playout result. Progress is counted in samples per channel.
struct PlayoutDone {
    handle: SpeechHandle,
    played: usize,
    total: usize,
    interrupted: bool,
}

/// Conversational voice agent bound to one participant of one room.
pub struct VoicePipelineAgent {
    plugins: PipelinePlugins,
    options: PipelineOptions,
    chat_ctx: Arc<Mutex<ChatContext>>,
    events: broadcast::Sender<AgentEvent>,
    metrics_tx: Mutex<Option<mpsc::UnboundedSender<AgentMetrics>>>,
    metrics_rx: Mutex<Option<mpsc::UnboundedReceiver<AgentMetrics>>>,
    commands: mpsc::UnboundedSender<Command>,
    pending_commands: Mutex<Option<mpsc::UnboundedReceiver<Command>>>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
}

impl VoicePipelineAgent {
    pub fn new(plugins: PipelinePlugins, chat_ctx: ChatContext) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (metrics_tx, metrics_rx) = mpsc::unbounded_channel();
        let (commands, pending_commands) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        Self {
            plugins,
            options: PipelineOptions::default(),
            chat_ctx: Arc::new(Mutex::new(chat_ctx)),
            events,
            metrics_tx: Mutex::new(Some(metrics_tx)),
            metrics_rx: Mutex::new(Some(metrics_rx)),
            commands,
            pending_commands: Mutex::new(Some(pending_commands)),
            shutdown,
            task: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Takes the ordered metrics stream. Available once; every event emitted
    /// since construction is delivered.
    pub fn take_metrics_receiver(&self) -> Option<mpsc::UnboundedReceiver<AgentMetrics>> {
        lock(&self.metrics_rx).take()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.events.subscribe()
    }

    /// Starts listening to `participant` in `room` and speaking into it.
    pub fn start(&self, room: Arc<Room>, participant: Participant) -> Result<(), AgentError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(AgentError::AlreadyStarted);
        }
        let metrics = lock(&self.metrics_tx).take().ok_or(AgentError::Closed)?;
        let commands = lock(&self.pending_commands)
            .take()
            .ok_or(AgentError::AlreadyStarted)?;
        let audio = room.take_audio_stream()?;

        info!(
            room = %room.name(),
            identity = %participant.identity,
            "starting voice pipeline"
        );

        let (playout_tx, playout_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let playout = tokio::spawn(run_playout(
            Arc::clone(&room),
            playout_rx,
            done_tx,
            self.events.clone(),
            self.options.clone(),
        ));

        let session = SessionLoop {
            vad_stream: self.plugins.vad.stream(),
            plugins: self.plugins.clone(),
            options: self.options.clone(),
            chat_ctx: Arc::clone(&self.chat_ctx),
            events: self.events.clone(),
            metrics,
            room,
            participant,
            transcript: String::new(),
            pending_eou: None,
            reply_deadline: None,
            speeches: VecDeque::new(),
            playout_tx: Some(playout_tx),
            stop: self.shutdown.subscribe(),
        };
        let task = tokio::spawn(session.run(commands, audio, done_rx, playout));
        *lock(&self.task) = Some(task);
        Ok(())
    }

    /// Queues `text` to be synthesised and spoken. Commands are handled
    /// before audio, so speech queued right after [`start`](Self::start) is
    /// synthesised before any participant turn.
    pub fn say(
        &self,
        text: impl Into<String>,
        allow_interruptions: bool,
    ) -> Result<SpeechHandle, AgentError> {
        let handle = SpeechHandle::new(text, allow_interruptions);
        self.commands
            .send(Command::Say(handle.clone()))
            .map_err(|_| AgentError::Closed)?;
        Ok(handle)
    }

    /// Snapshot of the conversation context.
    pub async fn chat_ctx(&self) -> ChatContext {
        lock(&self.chat_ctx).clone()
    }

    /// Stops the pipeline and returns the final conversation context. Every
    /// metrics sender is dropped when this returns.
    pub async fn aclose(&self) -> ChatContext {
        self.shutdown.send_replace(true);
        let task = lock(&self.task).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("voice pipeline task failed: {}", e);
            }
        }
        lock(&self.metrics_tx).take();
        lock(&self.pending_commands).take();
        lock(&self.chat_ctx).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Turn detection result waiting for its reply deadline.
struct PendingEou {
    end_of_speech: Instant,
    transcription_delay: Duration,
    probability: f32,
}

struct SessionLoop {
    plugins: PipelinePlugins,
    options: PipelineOptions,
    chat_ctx: Arc<Mutex<ChatContext>>,
    events: broadcast::Sender<AgentEvent>,
    metrics: mpsc::UnboundedSender<AgentMetrics>,
    room: Arc<Room>,
    participant: Participant,
    vad_stream: VadStream,
    /// User speech transcribed but not yet committed to the context.
    transcript: String,
    pending_eou: Option<PendingEou>,
    reply_deadline: Option<Instant>,
    /// Speeches queued for or in playout, oldest first.
    speeches: VecDeque<SpeechHandle>,
    playout_tx: Option<mpsc::UnboundedSender<PlayoutRequest>>,
    stop: watch::Receiver<bool>,
}

impl SessionLoop {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut audio: mpsc::Receiver<ParticipantAudio>,
        mut playout_done: mpsc::UnboundedReceiver<PlayoutDone>,
        playout: JoinHandle<()>,
    ) {
        let room = Arc::clone(&self.room);
        loop {
            let deadline = self.reply_deadline;
            tokio::select! {
                biased;
                () = wait_true(self.stop.clone()) => break,
                command = commands.recv() => match command {
                    Some(Command::Say(handle)) => self.speak(handle).await,
                    None => break,
                },
                Some(done) = playout_done.recv() => self.on_playout_done(done),
                () = room.closed() => {
                    debug!(room = %room.name(), "room closed, stopping pipeline");
                    break;
                }
                frame = audio.recv() => match frame {
                    Some(frame) => self.on_audio(frame).await,
                    None => break,
                },
                () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.reply().await;
                }
            }
        }

        // Stop playout and record what was heard before returning.
        for speech in &self.speeches {
            speech.force_interrupt();
        }
        self.playout_tx.take();
        if let Err(e) = playout.await {
            warn!("playout task failed: {}", e);
        }
        while let Ok(done) = playout_done.try_recv() {
            self.on_playout_done(done);
        }
        info!(room = %room.name(), "voice pipeline stopped");
    }

    fn emit(&self, event: AgentEvent) {
        let _ = self.events.send(event);
    }

    fn emit_metrics(&self, metrics: impl Into<AgentMetrics>) {
        let metrics = metrics.into();
        let _ = self.metrics.send(metrics.clone());
        self.emit(AgentEvent::MetricsCollected(metrics));
    }

    async fn on_audio(&mut self, audio: ParticipantAudio) {
        if audio.identity != self.participant.identity {
            return;
        }
        for event in self.vad_stream.push_frame(&audio.frame) {
            match event {
                VadEvent::StartOfSpeech => self.on_start_of_speech(),
                VadEvent::EndOfSpeech {
                    frames,
                    speech_duration,
                } => {
                    self.emit(AgentEvent::UserStoppedSpeaking);
                    let stats = self.vad_stream.take_stats();
                    self.emit_metrics(VadMetrics {
                        timestamp: Utc::now(),
                        idle_time: stats.idle_time.as_secs_f64(),
                        inference_count: stats.inference_count,
                        inference_duration_total: stats.inference_duration_total.as_secs_f64(),
                    });
                    debug!(
                        speech_ms = speech_duration.as_millis() as u64,
                        "user speech segment closed"
                    );
                    self.on_end_of_speech(frames).await;
                }
            }
        }
    }

    fn on_start_of_speech(&mut self) {
        self.emit(AgentEvent::UserStartedSpeaking);
        if self.reply_deadline.take().is_some() {
            debug!("pending reply cancelled, user kept talking");
        }
        for speech in &self.speeches {
            if speech.interrupt() {
                debug!(speech_id = %speech.id(), "agent speech interrupted by user");
            }
        }
    }

    async fn on_end_of_speech(&mut self, frames: Vec<AudioFrame>) {
        let Some(audio) = AudioFrame::concat(&frames) else {
            warn!(
                room = %self.room.name(),
                frames = frames.len(),
                "speech segment mixes audio formats, turn dropped"
            );
            return;
        };
        let end_of_speech = Instant::now();
        let transcription = self.plugins.stt.transcribe(&audio);
        let Some(result) = unless_stopped(&self.stop, &self.room, transcription).await else {
            debug!("transcription abandoned, pipeline stopping");
            return;
        };
        let duration = end_of_speech.elapsed();
        self.emit_metrics(SttMetrics {
            request_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            duration: duration.as_secs_f64(),
            audio_duration: audio.duration().as_secs_f64(),
            streamed: false,
        });

        let text = match result {
            Ok(event) => event.text,
            Err(e) => {
                warn!(room = %self.room.name(), "transcription failed, turn dropped: {}", e);
                return;
            }
        };
        if text.trim().is_empty() {
            return;
        }
        self.emit(AgentEvent::UserTranscript { text: text.clone() });
        if !self.transcript.is_empty() {
            self.transcript.push(' ');
        }
        self.transcript.push_str(text.trim());

        let (probability, delay) = match &self.plugins.turn_detector {
            Some(detector) => {
                let candidate = lock(&self.chat_ctx)
                    .clone()
                    .append(ChatRole::User, self.transcript.clone());
                let probability = detector.predict_end_of_turn(&candidate);
                let delay = if probability < detector.unlikely_threshold() {
                    self.options.max_endpointing_delay
                } else {
                    self.options.min_endpointing_delay
                };
                (probability, delay)
            }
            None => (1.0, self.options.min_endpointing_delay),
        };
        debug!(
            probability,
            delay_ms = delay.as_millis() as u64,
            "end of utterance scored"
        );
        self.pending_eou = Some(PendingEou {
            end_of_speech,
            transcription_delay: end_of_speech.elapsed(),
            probability,
        });
        self.reply_deadline = Some(Instant::now() + delay);
    }

    async fn reply(&mut self) {
        self.reply_deadline = None;
        let text = std::mem::take(&mut self.transcript);
        if text.is_empty() {
            return;
        }

        lock(&self.chat_ctx).push(ChatRole::User, text.clone());
        self.emit(AgentEvent::UserSpeechCommitted { text });
        if let Some(eou) = self.pending_eou.take() {
            self.emit_metrics(EouMetrics {
                timestamp: Utc::now(),
                end_of_utterance_delay: eou.end_of_speech.elapsed().as_secs_f64(),
                transcription_delay: eou.transcription_delay.as_secs_f64(),
                probability: eou.probability,
            });
        }

        let request = lock(&self.chat_ctx).truncated(self.options.max_history);
        let started = Instant::now();
        let completion = self.plugins.llm.chat(&request);
        let Some(result) = unless_stopped(&self.stop, &self.room, completion).await else {
            let duration = started.elapsed().as_secs_f64();
            debug!("completion abandoned, pipeline stopping");
            self.emit_metrics(LlmMetrics {
                request_id: uuid::Uuid::new_v4().to_string(),
                timestamp: Utc::now(),
                ttft: duration,
                duration,
                cancelled: true,
                prompt_tokens: 0,
                completion_tokens: 0,
                total_tokens: 0,
                tokens_per_second: 0.0,
            });
            return;
        };
        let duration = started.elapsed().as_secs_f64();

        let completion = match result {
            Ok(completion) => completion,
            Err(e) => {
                warn!(room = %self.room.name(), "completion failed, turn dropped: {}", e);
                return;
            }
        };
        let usage = completion.usage;
        self.emit_metrics(LlmMetrics {
            request_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            ttft: duration,
            duration,
            cancelled: false,
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
            tokens_per_second: if duration > 0.0 {
                usage.completion_tokens as f64 / duration
            } else {
                0.0
            },
        });

        if completion.text.is_empty() {
            return;
        }
        let handle = SpeechHandle::new(completion.text, self.options.allow_interruptions);
        self.speak(handle).await;
    }

    /// Synthesises a speech and hands it to playout.
    async fn speak(&mut self, handle: SpeechHandle) {
        let started = Instant::now();
        let synthesis = self.plugins.tts.synthesize(handle.text());
        let Some(result) = unless_stopped(&self.stop, &self.room, synthesis).await else {
            let duration = started.elapsed().as_secs_f64();
            debug!(speech_id = %handle.id(), "synthesis abandoned, pipeline stopping");
            self.emit_metrics(TtsMetrics {
                request_id: uuid::Uuid::new_v4().to_string(),
                timestamp: Utc::now(),
                ttfb: duration,
                duration,
                audio_duration: 0.0,
                characters_count: handle.text().chars().count() as u64,
                cancelled: true,
            });
            handle.mark_done();
            return;
        };
        let duration = started.elapsed().as_secs_f64();

        let audio = match result {
            Ok(audio) => audio,
            Err(e) => {
                warn!(speech_id = %handle.id(), "synthesis failed, speech dropped: {}", e);
                handle.mark_done();
                return;
            }
        };
        self.emit_metrics(TtsMetrics {
            request_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            ttfb: duration,
            duration,
            audio_duration: audio.duration().as_secs_f64(),
            characters_count: handle.text().chars().count() as u64,
            cancelled: handle.is_interrupted(),
        });

        let Some(playout) = &self.playout_tx else {
            handle.mark_done();
            return;
        };
        let request = PlayoutRequest {
            handle: handle.clone(),
            audio,
        };
        if playout.send(request).is_err() {
            handle.mark_done();
            return;
        }
        self.speeches.push_back(handle);
    }

    fn on_playout_done(&mut self, done: PlayoutDone) {
        self.speeches.retain(|s| s.id() != done.handle.id());
        let speech_id = done.handle.id().to_string();

        if done.interrupted {
            let fraction = if done.total == 0 {
                0.0
            } else {
                done.played as f64 / done.total as f64
            };
            let heard = truncate_spoken(done.handle.text(), fraction);
            if !heard.is_empty() {
                lock(&self.chat_ctx).push(ChatRole::Assistant, heard.clone());
            }
            info!(%speech_id, played_fraction = fraction, "agent speech interrupted");
            self.emit(AgentEvent::AgentSpeechInterrupted {
                speech_id,
                text: heard,
            });
        } else {
            let text = done.handle.text().to_string();
            lock(&self.chat_ctx).push(ChatRole::Assistant, text.clone());
            self.emit(AgentEvent::AgentSpeechCommitted { speech_id, text });
        }
    }
}

async fn wait_true(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|v| *v).await;
}

/// Runs `work` unless the agent is closed or the room closes first.
async fn unless_stopped<T>(
    stop: &watch::Receiver<bool>,
    room: &Room,
    work: impl Future<Output = T>,
) -> Option<T> {
    tokio::select! {
        biased;
        () = wait_true(stop.clone()) => None,
        () = room.closed() => None,
        out = work => Some(out),
    }
}

/// Publishes queued speeches frame by frame and reports each one back.
async fn run_playout(
    room: Arc<Room>,
    mut queue: mpsc::UnboundedReceiver<PlayoutRequest>,
    done: mpsc::UnboundedSender<PlayoutDone>,
    events: broadcast::Sender<AgentEvent>,
    options: PipelineOptions,
) {
    while let Some(PlayoutRequest { handle, audio }) = queue.recv().await {
        let total = audio.samples_per_channel();
        let mut played = 0;

        if !handle.is_interrupted() {
            let _ = events.send(AgentEvent::AgentStartedSpeaking {
                speech_id: handle.id().to_string(),
            });
            for frame in audio.split(options.playout_frame) {
                if handle.is_interrupted() {
                    break;
                }
                let frame_duration = frame.duration();
                let frame_samples = frame.samples_per_channel();
                if let Err(e) = room.publish_frame(frame) {
                    debug!(speech_id = %handle.id(), "playout stopped: {}", e);
                    break;
                }
                played += frame_samples;
                if options.realtime_playout {
                    tokio::select! {
                        () = tokio::time::sleep(frame_duration) => {}
                        () = handle.interrupted() => {}
                    }
                }
            }
        }

        handle.mark_done();
        let report = PlayoutDone {
            interrupted: played < total,
            handle,
            played,
            total,
        };
        if done.send(report).is_err() {
            break;
        }
    }
}

/// Leading share of `text`, by words, matching the fraction of audio that
/// was played.
fn truncate_spoken(text: &str, fraction: f64) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    let keep = (words.len() as f64 * fraction.clamp(0.0, 1.0)).round() as usize;
    words[..keep].join(" ")
}
