//! Base trait for completion gateways

use async_trait::async_trait;
use sigbridge_core::session::ChatMessage;
use thiserror::Error;

/// Why a completion or model-listing call failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Completion service unreachable: {0}")]
    Unreachable(String),

    #[error("Completion service timed out")]
    Timeout,

    #[error("Bad response from completion service: {0}")]
    BadResponse(String),

    #[error("No models configured or available")]
    NoModelsConfigured,
}

impl GatewayError {
    /// Short stable name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Unreachable(_) => "unreachable",
            GatewayError::Timeout => "timeout",
            GatewayError::BadResponse(_) => "bad_response",
            GatewayError::NoModelsConfigured => "no_models_configured",
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GatewayError::Timeout
        } else if e.is_decode() || e.is_status() {
            GatewayError::BadResponse(e.to_string())
        } else {
            GatewayError::Unreachable(e.to_string())
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Capability to run chat completions and list models on an external backend
#[async_trait]
pub trait CompletionGateway: Send + Sync {
    /// Complete a conversation: `history` (oldest first) followed by `new_turn`
    /// as the latest user message. Returns the assistant reply text.
    async fn complete(&self, history: &[ChatMessage], new_turn: &str) -> GatewayResult<String>;

    /// Model identifiers currently offered by the backend
    async fn list_models(&self) -> GatewayResult<Vec<String>>;
}

/// The message sequence sent to the backend for one chat turn
pub fn build_messages(history: &[ChatMessage], new_turn: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.extend_from_slice(history);
    messages.push(ChatMessage::user(new_turn));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_messages_appends_new_turn_last() {
        let history = vec![ChatMessage::user("q1"), ChatMessage::assistant("a1")];
        let messages = build_messages(&history, "q2");

        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0], ChatMessage::user("q1"));
        assert_eq!(messages[2], ChatMessage::user("q2"));
    }

    #[test]
    fn test_error_kinds_are_distinct() {
        let kinds = [
            GatewayError::Unreachable("x".into()).kind(),
            GatewayError::Timeout.kind(),
            GatewayError::BadResponse("x".into()).kind(),
            GatewayError::NoModelsConfigured.kind(),
        ];
        for (i, a) in kinds.iter().enumerate() {
            for b in &kinds[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
