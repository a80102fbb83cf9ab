//! Session management for conversation history
//!
//! Histories live in memory only and are bounded per sender; nothing is
//! written to disk.

pub mod manager;
pub mod store;

pub use manager::{HistoryStore, SessionGuard};
pub use store::{ChatMessage, ConversationHistory, Role, DEFAULT_MAX_HISTORY_MESSAGES};
