//! Conversation history shared between the orchestrator and the model request
//!
//! The history is an ordered, append-only log of turns. It is owned and
//! mutated by the orchestrator only; the streaming request receives a
//! snapshot taken at issue time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role of a conversation turn
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    /// User utterance (final transcript)
    User,
    /// Assistant response (accumulated stream text)
    Assistant,
}

impl TurnRole {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
        }
    }
}

/// A single turn in the conversation, immutable once appended
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// Role of the speaker
    pub role: TurnRole,

    /// Text content of the turn
    pub content: String,

    /// When the turn was appended
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    /// Create a new turn
    pub fn new(role: TurnRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a user turn
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(TurnRole::User, content)
    }

    /// Create an assistant turn
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(TurnRole::Assistant, content)
    }
}

/// Ordered log of conversation turns
///
/// Append-only during a session, cleared atomically at session start.
#[derive(Clone, Debug, Default)]
pub struct ConversationHistory {
    turns: Vec<ConversationTurn>,
}

impl ConversationHistory {
    /// Create an empty history
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a user turn
    pub fn add_user_turn(&mut self, content: impl Into<String>) {
        self.turns.push(ConversationTurn::user(content));
    }

    /// Append an assistant turn
    pub fn add_assistant_turn(&mut self, content: impl Into<String>) {
        self.turns.push(ConversationTurn::assistant(content));
    }

    /// All turns in order
    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    /// Snapshot of the history for a streaming request
    pub fn snapshot(&self) -> Vec<ConversationTurn> {
        self.turns.clone()
    }

    /// Get the last turn with the given role
    pub fn last_turn(&self, role: TurnRole) -> Option<&ConversationTurn> {
        self.turns.iter().rev().find(|t| t.role == role)
    }

    /// Number of turns in the log
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Check if the log is empty
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Clear all turns
    pub fn clear(&mut self) {
        self.turns.clear();
    }
}
