//! German voice tutor worker.
//!
//! Hosts "Maria", a German-language tutor that holds real-time voice
//! conversations with students in LiveKit rooms. The worker loads the voice
//! activity detector once at startup, then runs one job per room: connect
//! with audio only, wait for the student, run the voice pipeline with the
//! tutor persona, greet the student, and report token and audio usage when
//! the session ends.
//!
//! The HTTP control surface dispatches jobs and bridges room media.

pub mod api;
pub mod config;
pub mod error;
pub mod job;
pub mod persona;
pub mod pipeline;
pub mod session;
pub mod worker;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Extension, Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tutor_voice::{RoomRegistry, VoiceService};

pub use error::AgentError;
pub use job::{JobContext, JobProcess, JobSettings, WorkerOptions};
pub use pipeline::{AgentEvent, PipelineOptions, PipelinePlugins, SpeechHandle, VoicePipelineAgent};
pub use session::{tutor_entrypoint, OpenAiPlugins, PluginFactory, SessionReport, TutorEntrypoint, TutorSettings};
pub use worker::{JobInfo, JobRequest, Worker};

/// Upper bound for request bodies; audio uploads are the largest.
const MAX_REQUEST_BODY_BYTES: usize = 10 * 1024 * 1024;

/// State shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub worker: Worker,
    /// Media side of every connected room.
    pub registry: RoomRegistry,
    /// LiveKit room service, when configured.
    pub livekit: Option<Arc<VoiceService>>,
}

/// Builds the control surface router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(api::health))
        .route(
            "/jobs",
            get(api::list_jobs_handler).post(api::create_job_handler),
        )
        .route("/jobs/{job_id}", delete(api::stop_job_handler))
        .route("/rooms/{room}", delete(api::close_room_handler))
        .route("/rooms/{room}/token", post(api::create_token_handler))
        .route("/rooms/{room}/audio", get(api::pull_audio_handler))
        .route(
            "/rooms/{room}/participants",
            post(api::join_room_handler),
        )
        .route(
            "/rooms/{room}/participants/{identity}",
            delete(api::leave_room_handler),
        )
        .route(
            "/rooms/{room}/participants/{identity}/audio",
            post(api::push_audio_handler),
        )
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
