//! Shared types for the tutor workspace.
//!
//! This crate provides the data model every other crate builds on: the
//! role-tagged conversation context handed to the language model, the
//! per-session state machine, room participants, and PCM audio frames.
//!
//! It has no runtime dependencies beyond `serde` and `thiserror`, which keeps
//! the dependency graph free of cycles.

pub mod audio;
pub mod chat;
pub mod session;

pub use audio::AudioFrame;
pub use chat::{ChatContext, ChatMessage, ChatRole};
pub use session::{InvalidTransition, Participant, ParticipantKind, SessionState};
