//! HTTP control surface: job dispatch and the room media bridge.

use crate::error::AgentError;
use crate::worker::JobRequest;
use crate::AppState;
use axum::{
    body::Bytes,
    extract::{Path, Query},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tutor_types::{AudioFrame, Participant, ParticipantKind};
use tutor_voice::{RoomBridge, VoiceError, TTS_SAMPLE_RATE};

const DEFAULT_INPUT_SAMPLE_RATE: u32 = 16_000;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("internal error: {0}")]
    InternalServerError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<AgentError> for ApiError {
    fn from(e: AgentError) -> Self {
        match e {
            AgentError::RoomBusy(_) => ApiError::Conflict(e.to_string()),
            AgentError::JobNotFound(_) => ApiError::NotFound(e.to_string()),
            AgentError::WorkerClosed => ApiError::ServiceUnavailable(e.to_string()),
            _ => ApiError::InternalServerError(e.to_string()),
        }
    }
}

impl From<VoiceError> for ApiError {
    fn from(e: VoiceError) -> Self {
        match e {
            VoiceError::RoomClosed(_) => ApiError::NotFound(e.to_string()),
            VoiceError::Config(_) => ApiError::ServiceUnavailable(e.to_string()),
            _ => ApiError::InternalServerError(e.to_string()),
        }
    }
}

fn open_room(state: &AppState, room: &str) -> Result<Arc<RoomBridge>, ApiError> {
    state
        .registry
        .get(room)
        .ok_or_else(|| ApiError::NotFound(format!("room not connected: {}", room)))
}

/// Handler for `GET /health`.
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Handler for `POST /jobs`.
pub async fn create_job_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<JobRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let room = payload.room.trim().to_string();
    if room.is_empty() {
        return Err(ApiError::BadRequest("room must not be empty".to_string()));
    }
    let job_id = state.worker.dispatch(JobRequest { room: room.clone() })?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "job_id": job_id, "room": room })),
    ))
}

/// Handler for `GET /jobs`.
pub async fn list_jobs_handler(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "jobs": state.worker.active_jobs() }))
}

/// Handler for `DELETE /jobs/{job_id}`.
pub async fn stop_job_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.worker.stop_job(&job_id)?;
    Ok(StatusCode::ACCEPTED)
}

#[derive(Debug, Deserialize)]
pub struct JoinRequest {
    pub identity: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub kind: ParticipantKind,
}

/// Handler for `POST /rooms/{room}/participants`.
pub async fn join_room_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(room): Path<String>,
    Json(payload): Json<JoinRequest>,
) -> Result<StatusCode, ApiError> {
    if payload.identity.trim().is_empty() {
        return Err(ApiError::BadRequest("identity must not be empty".to_string()));
    }
    let bridge = open_room(&state, &room)?;
    bridge.join(
        Participant::new(payload.identity)
            .with_name(payload.name)
            .with_kind(payload.kind),
    );
    Ok(StatusCode::CREATED)
}

/// Handler for `DELETE /rooms/{room}/participants/{identity}`.
pub async fn leave_room_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path((room, identity)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let bridge = open_room(&state, &room)?;
    if bridge.leave(&identity) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("participant not in room: {}", identity)))
    }
}

#[derive(Debug, Deserialize)]
pub struct AudioParams {
    pub sample_rate: Option<u32>,
}

/// Handler for `POST /rooms/{room}/participants/{identity}/audio`.
///
/// The body is raw mono s16le PCM.
pub async fn push_audio_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path((room, identity)): Path<(String, String)>,
    Query(params): Query<AudioParams>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    if body.len() % 2 != 0 {
        return Err(ApiError::BadRequest(
            "PCM body must contain whole 16-bit samples".to_string(),
        ));
    }
    let sample_rate = params.sample_rate.unwrap_or(DEFAULT_INPUT_SAMPLE_RATE);
    if sample_rate == 0 {
        return Err(ApiError::BadRequest("sample_rate must be positive".to_string()));
    }

    let bridge = open_room(&state, &room)?;
    let frame = AudioFrame::from_le_bytes(&body, sample_rate, 1);
    let delivered = bridge.push_audio(&identity, frame).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "delivered": delivered }))))
}

/// Handler for `GET /rooms/{room}/audio`.
///
/// Drains the agent audio published so far as raw s16le PCM.
pub async fn pull_audio_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(room): Path<String>,
) -> Result<Response, ApiError> {
    let bridge = open_room(&state, &room)?;
    let frames = bridge.drain_published().await;
    let (sample_rate, pcm) = match AudioFrame::concat(&frames) {
        Some(audio) => (audio.sample_rate, audio.to_le_bytes()),
        None if frames.is_empty() => (TTS_SAMPLE_RATE, Vec::new()),
        None => {
            return Err(ApiError::InternalServerError(
                "published frames have mixed formats".to_string(),
            ))
        }
    };

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::HeaderName::from_static("x-sample-rate"),
                sample_rate.to_string(),
            ),
        ],
        pcm,
    )
        .into_response())
}

/// Handler for `DELETE /rooms/{room}`.
pub async fn close_room_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(room): Path<String>,
) -> Result<StatusCode, ApiError> {
    let bridge = open_room(&state, &room)?;
    bridge.close();
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub identity: String,
    #[serde(default)]
    pub name: String,
}

/// Handler for `POST /rooms/{room}/token`.
///
/// Mints a LiveKit join token for a student.
pub async fn create_token_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(room): Path<String>,
    Json(payload): Json<TokenRequest>,
) -> Result<Json<Value>, ApiError> {
    let service = state
        .livekit
        .as_ref()
        .ok_or_else(|| ApiError::ServiceUnavailable("LiveKit is not configured".to_string()))?;
    if payload.identity.trim().is_empty() {
        return Err(ApiError::BadRequest("identity must not be empty".to_string()));
    }
    let name = if payload.name.is_empty() {
        payload.identity.as_str()
    } else {
        payload.name.as_str()
    };
    let token = service.generate_join_token(&room, &payload.identity, name)?;
    Ok(Json(json!({
        "token": token,
        "url": service.get_public_url(),
    })))
}
