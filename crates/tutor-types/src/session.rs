//! Session lifecycle and room participants.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle of one tutoring session.
///
/// ```text
/// Idle -> Connected -> AwaitingParticipant -> PipelineActive -> ShuttingDown -> Closed
/// ```
///
/// `ShuttingDown` is reachable from every non-terminal state so a session
/// can be torn down at any point; `Closed` is only reachable from
/// `ShuttingDown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Idle,
    Connected,
    AwaitingParticipant,
    PipelineActive,
    ShuttingDown,
    Closed,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Connected => "CONNECTED",
            Self::AwaitingParticipant => "AWAITING_PARTICIPANT",
            Self::PipelineActive => "PIPELINE_ACTIVE",
            Self::ShuttingDown => "SHUTTING_DOWN",
            Self::Closed => "CLOSED",
        }
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Closed
    }

    /// Returns `true` if the state machine permits moving to `next`.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Idle, Connected)
            | (Connected, AwaitingParticipant)
            | (AwaitingParticipant, PipelineActive)
            | (ShuttingDown, Closed) => true,
            (Closed, _) | (ShuttingDown, ShuttingDown) => false,
            (_, ShuttingDown) => true,
            _ => false,
        }
    }

    /// Validates and returns the next state.
    pub fn transition(self, next: SessionState) -> Result<SessionState, InvalidTransition> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned for a transition the session state machine forbids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid session transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: SessionState,
    pub to: SessionState,
}

/// Kind of room participant, as reported by the media server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantKind {
    /// A regular client (browser, mobile app).
    #[default]
    Standard,
    /// Another agent worker.
    Agent,
    /// A telephony participant.
    Sip,
    Ingress,
    Egress,
}

/// A remote participant in a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub identity: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub kind: ParticipantKind,
}

impl Participant {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            name: String::new(),
            kind: ParticipantKind::Standard,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn with_kind(mut self, kind: ParticipantKind) -> Self {
        self.kind = kind;
        self
    }

    /// Agents never count as the session's conversation partner.
    pub fn is_agent(&self) -> bool {
        self.kind == ParticipantKind::Agent
    }
}
