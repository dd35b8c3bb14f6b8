//! Conversation context passed to the language model.
//!
//! A [`ChatContext`] is an ordered list of role-tagged messages. It is seeded
//! with the persona's system message before a session starts and then grows
//! as user and assistant turns are committed.

use serde::{Deserialize, Serialize};

/// Author of a chat message. Serialises to the lowercase role names used by
/// OpenAI-compatible chat endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for ChatRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single message in the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Ordered, role-tagged conversation history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatContext {
    messages: Vec<ChatMessage>,
}

impl ChatContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a message and returns the context, for building an initial
    /// context in one expression.
    #[must_use]
    pub fn append(mut self, role: ChatRole, text: impl Into<String>) -> Self {
        self.push(role, text);
        self
    }

    pub fn push(&mut self, role: ChatRole, text: impl Into<String>) {
        self.messages.push(ChatMessage::new(role, text));
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn system_messages(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages
            .iter()
            .filter(|m| m.role == ChatRole::System)
    }

    /// Returns the content of the most recent user message, if any.
    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::User)
            .map(|m| m.content.as_str())
    }

    /// Returns a copy bounded to the newest `max_messages` non-system
    /// messages. Leading system messages are always kept so the persona
    /// prompt is never dropped from the request.
    pub fn truncated(&self, max_messages: usize) -> ChatContext {
        let leading_system = self
            .messages
            .iter()
            .take_while(|m| m.role == ChatRole::System)
            .count();
        let rest = &self.messages[leading_system..];
        let skip = rest.len().saturating_sub(max_messages);

        let mut messages = Vec::with_capacity(leading_system + rest.len() - skip);
        messages.extend_from_slice(&self.messages[..leading_system]);
        messages.extend_from_slice(&rest[skip..]);
        ChatContext { messages }
    }
}
