//! Conversation history data structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Default bound on retained messages per sender.
///
/// User and assistant entries are counted separately, so the default keeps
/// the five most recent chat turns.
pub const DEFAULT_MAX_HISTORY_MESSAGES: usize = 10;

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Role name as used by OpenAI-compatible APIs
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Bounded, chronologically ordered history of one sender
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    messages: VecDeque<ChatMessage>,
    max_messages: usize,
    /// First time this sender was seen
    pub created_at: DateTime<Utc>,
    /// Last append or clear
    pub updated_at: DateTime<Utc>,
}

impl ConversationHistory {
    /// Create an empty history holding at most `max_messages` entries.
    ///
    /// A bound of zero is raised to one; configuration validation rejects it
    /// before it gets here.
    pub fn new(max_messages: usize) -> Self {
        let now = Utc::now();
        Self {
            messages: VecDeque::new(),
            max_messages: max_messages.max(1),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a message, evicting the oldest entries beyond the bound
    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push_back(message);
        while self.messages.len() > self.max_messages {
            self.messages.pop_front();
        }
        self.updated_at = Utc::now();
    }

    /// Copy of the current messages, oldest first
    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.messages.iter().cloned().collect()
    }

    /// Remove all messages, returning how many were dropped
    pub fn clear(&mut self) -> usize {
        let dropped = self.messages.len();
        self.messages.clear();
        self.updated_at = Utc::now();
        dropped
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn max_messages(&self) -> usize {
        self.max_messages
    }
}
