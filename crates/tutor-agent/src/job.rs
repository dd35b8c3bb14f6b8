//! Warm resources and the per-session job context.
//!
//! A worker process runs its prewarm function once and keeps the resulting
//! [`JobProcess`]. Every job receives a [`JobContext`] that carries that
//! handle, the room it serves, and the session state machine
//! `Idle → Connected → AwaitingParticipant → PipelineActive → ShuttingDown →
//! Closed`.

use crate::error::AgentError;
use futures_util::future::BoxFuture;
use std::future::Future;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use tutor_types::{Participant, SessionState};
use tutor_voice::{AutoSubscribe, Room, RoomConnector, Vad, VoiceError};

/// Process-wide resources loaded once by prewarm and shared read-only by
/// every job.
#[derive(Debug, Clone)]
pub struct JobProcess {
    vad: Arc<Vad>,
}

impl JobProcess {
    pub fn new(vad: Vad) -> Self {
        Self { vad: Arc::new(vad) }
    }

    pub fn vad(&self) -> Arc<Vad> {
        Arc::clone(&self.vad)
    }
}

pub type PrewarmFn = Arc<dyn Fn() -> Result<JobProcess, VoiceError> + Send + Sync>;
pub type EntrypointFn =
    Arc<dyn Fn(JobContext) -> BoxFuture<'static, Result<(), AgentError>> + Send + Sync>;

/// Prewarm hook and session entrypoint of a worker.
#[derive(Clone)]
pub struct WorkerOptions {
    pub prewarm: PrewarmFn,
    pub entrypoint: EntrypointFn,
}

impl WorkerOptions {
    /// Uses [`default_prewarm`] with the given entrypoint.
    pub fn new(entrypoint: EntrypointFn) -> Self {
        Self {
            prewarm: Arc::new(default_prewarm),
            entrypoint,
        }
    }
}

/// Loads the voice activity detector with default options.
pub fn default_prewarm() -> Result<JobProcess, VoiceError> {
    Ok(JobProcess::new(Vad::load()?))
}

/// Timeouts applied by every job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSettings {
    /// `None` waits indefinitely.
    pub participant_timeout: Option<Duration>,
    /// Upper bound for running all shutdown callbacks.
    pub shutdown_timeout: Duration,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            participant_timeout: Some(Duration::from_secs(600)),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

type ShutdownCallback = BoxFuture<'static, ()>;

/// Handle a session uses to reach its room, its warm resources and its
/// lifecycle. Cheap to clone.
#[derive(Clone)]
pub struct JobContext {
    inner: Arc<JobInner>,
}

struct JobInner {
    job_id: String,
    room_name: String,
    proc: JobProcess,
    connector: Arc<dyn RoomConnector>,
    settings: JobSettings,
    room: OnceLock<Arc<Room>>,
    state: watch::Sender<SessionState>,
    shutdown_requested: watch::Sender<bool>,
    callbacks: Mutex<Vec<ShutdownCallback>>,
}

impl JobContext {
    pub fn new(
        job_id: impl Into<String>,
        room_name: impl Into<String>,
        proc: JobProcess,
        connector: Arc<dyn RoomConnector>,
        settings: JobSettings,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        let (shutdown_requested, _) = watch::channel(false);
        Self {
            inner: Arc::new(JobInner {
                job_id: job_id.into(),
                room_name: room_name.into(),
                proc,
                connector,
                settings,
                room: OnceLock::new(),
                state,
                shutdown_requested,
                callbacks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.inner.job_id
    }

    pub fn room_name(&self) -> &str {
        &self.inner.room_name
    }

    pub fn proc(&self) -> &JobProcess {
        &self.inner.proc
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    /// Watches the session state.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    fn transition(&self, next: SessionState) -> Result<(), AgentError> {
        let mut result = Ok(());
        self.inner.state.send_if_modified(|state| match state.transition(next) {
            Ok(next) => {
                info!(
                    job_id = %self.inner.job_id,
                    room = %self.inner.room_name,
                    from = %state,
                    to = %next,
                    "session state changed"
                );
                *state = next;
                true
            }
            Err(e) => {
                result = Err(e);
                false
            }
        });
        result.map_err(AgentError::from)
    }

    /// Connects to the job's room. A failure here is fatal for the session.
    pub async fn connect(&self, subscribe: AutoSubscribe) -> Result<Arc<Room>, AgentError> {
        if !self.state().can_transition_to(SessionState::Connected) {
            return Err(AgentError::Transition(tutor_types::InvalidTransition {
                from: self.state(),
                to: SessionState::Connected,
            }));
        }
        let room = self
            .inner
            .connector
            .connect(&self.inner.room_name, subscribe)
            .await?;
        if self.inner.room.set(Arc::clone(&room)).is_err() {
            room.disconnect();
            return Err(AgentError::Voice(VoiceError::RoomAlreadyConnected(
                self.inner.room_name.clone(),
            )));
        }
        self.transition(SessionState::Connected)?;
        Ok(room)
    }

    pub fn room(&self) -> Option<Arc<Room>> {
        self.inner.room.get().cloned()
    }

    /// Suspends until a remote participant is in the room, bounded by the
    /// configured participant timeout.
    pub async fn wait_for_participant(&self) -> Result<Participant, AgentError> {
        let room = self.room().ok_or(AgentError::NotConnected)?;
        self.transition(SessionState::AwaitingParticipant)?;

        let participant = match self.inner.settings.participant_timeout {
            Some(limit) => tokio::time::timeout(limit, room.wait_for_participant(None))
                .await
                .map_err(|_| VoiceError::ParticipantTimeout(limit))??,
            None => room.wait_for_participant(None).await?,
        };
        info!(
            job_id = %self.inner.job_id,
            identity = %participant.identity,
            "participant available"
        );
        Ok(participant)
    }

    pub fn mark_pipeline_active(&self) -> Result<(), AgentError> {
        self.transition(SessionState::PipelineActive)
    }

    /// Registers work to run once when the session shuts down. Callbacks
    /// registered after shutdown started are dropped.
    pub fn add_shutdown_callback<F>(&self, callback: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if matches!(
            self.state(),
            SessionState::ShuttingDown | SessionState::Closed
        ) {
            warn!(job_id = %self.inner.job_id, "shutdown already started, callback dropped");
            return;
        }
        self.inner
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::pin(callback));
    }

    /// Asks the job to shut down. The worker performs the actual shutdown.
    pub fn request_shutdown(&self) {
        self.inner.shutdown_requested.send_replace(true);
    }

    /// Resolves once shutdown was requested or started.
    pub async fn shutdown_requested(&self) {
        let mut rx = self.inner.shutdown_requested.subscribe();
        let _ = rx.wait_for(|requested| *requested).await;
    }

    /// Resolves once the room is closed. Never resolves before `connect`.
    pub async fn room_closed(&self) {
        match self.room() {
            Some(room) => room.closed().await,
            None => std::future::pending().await,
        }
    }

    /// Runs the shutdown callbacks exactly once, disconnects the room and
    /// closes the session. Later calls wait for the first one to finish.
    pub async fn shutdown(&self, reason: &str) -> Result<(), AgentError> {
        let mut first = false;
        self.inner.state.send_if_modified(|state| {
            if state.can_transition_to(SessionState::ShuttingDown) {
                info!(
                    job_id = %self.inner.job_id,
                    from = %state,
                    reason,
                    "session shutting down"
                );
                *state = SessionState::ShuttingDown;
                first = true;
                true
            } else {
                false
            }
        });
        if !first {
            let mut rx = self.inner.state.subscribe();
            let _ = rx.wait_for(|s| *s == SessionState::Closed).await;
            return Ok(());
        }
        self.inner.shutdown_requested.send_replace(true);

        let callbacks = std::mem::take(
            &mut *self
                .inner
                .callbacks
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        let limit = self.inner.settings.shutdown_timeout;
        let all = futures_util::future::join_all(callbacks);
        if tokio::time::timeout(limit, all).await.is_err() {
            warn!(
                job_id = %self.inner.job_id,
                timeout_secs = limit.as_secs_f64(),
                "shutdown callbacks timed out"
            );
        }

        if let Some(room) = self.room() {
            room.disconnect();
        }
        self.transition(SessionState::Closed)
    }
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("job_id", &self.inner.job_id)
            .field("room_name", &self.inner.room_name)
            .field("state", &self.state())
            .finish()
    }
}
