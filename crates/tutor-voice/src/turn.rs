//! End-of-utterance detection.
//!
//! The VAD only knows that the user went quiet. The turn detector looks at
//! what was said to decide whether the user is actually done, so the
//! pipeline can wait longer after "Ich möchte, weil ..." than after a
//! complete question.

use tutor_types::{ChatContext, ChatRole};

/// Scores how likely the latest user message ends the user's turn.
pub trait TurnDetector: Send + Sync {
    /// Probability in `0.0..=1.0` that the user has finished speaking.
    fn predict_end_of_turn(&self, chat_ctx: &ChatContext) -> f32;

    /// Below this probability the turn is treated as unfinished.
    fn unlikely_threshold(&self) -> f32;
}

/// Words after which a German or English speaker is almost certainly going
/// to continue.
const CONTINUATION_WORDS: &[&str] = &[
    "und", "aber", "oder", "weil", "dass", "denn", "also", "wenn", "ob", "sondern", "damit",
    "obwohl", "der", "die", "das", "ein", "eine", "einen", "mit", "zu", "für", "ich", "äh", "ähm",
    "hm", "and", "but", "or", "because", "so", "the", "a", "to", "um", "uh",
];

/// Lightweight end-of-utterance model driven by the wording of the last
/// user message.
#[derive(Debug, Clone, Default)]
pub struct EouModel {
    _private: (),
}

impl EouModel {
    pub const UNLIKELY_THRESHOLD: f32 = 0.15;

    pub fn new() -> Self {
        Self::default()
    }

    fn score(text: &str) -> f32 {
        let text = text.trim();
        if text.is_empty() {
            return 0.0;
        }
        if text.ends_with("...") || text.ends_with('…') || text.ends_with(',') {
            return 0.1;
        }
        if text.ends_with(['.', '?', '!']) {
            return 0.95;
        }

        let last_word = text
            .rsplit(char::is_whitespace)
            .next()
            .unwrap_or_default()
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        if CONTINUATION_WORDS.contains(&last_word.as_str()) {
            return 0.05;
        }
        0.6
    }
}

impl TurnDetector for EouModel {
    fn predict_end_of_turn(&self, chat_ctx: &ChatContext) -> f32 {
        match chat_ctx.last() {
            Some(message) if message.role == ChatRole::User => Self::score(&message.content),
            _ => 0.0,
        }
    }

    fn unlikely_threshold(&self) -> f32 {
        Self::UNLIKELY_THRESHOLD
    }
}
