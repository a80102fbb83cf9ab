//! Configuration schema definitions

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::session::DEFAULT_MAX_HISTORY_MESSAGES;

/// Root configuration for sigbridge
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Signal transport configuration
    #[serde(default)]
    pub signal: SignalConfig,
    /// Completion service configuration
    #[serde(default)]
    pub privatemode: PrivateModeConfig,
    /// Conversation history configuration
    #[serde(default)]
    pub session: SessionConfig,
    /// User-visible fixed replies
    #[serde(default)]
    pub replies: RepliesConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,
    /// Directory for log files
    #[serde(default = "default_log_dir")]
    pub dir: String,
    /// Module-specific overrides
    #[serde(default)]
    pub overrides: HashMap<String, String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            dir: default_log_dir(),
            overrides: HashMap::new(),
        }
    }
}

/// Signal channel configuration (signal-cli-rest-api)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalConfig {
    /// `host:port` of the signal-cli-rest-api service, optionally with a scheme
    #[serde(default = "default_signal_service")]
    pub service: String,
    /// Registered account number the bot runs as
    #[serde(default)]
    pub phone_number: String,
    /// Allowed senders (empty = allow everyone)
    #[serde(default)]
    pub allow_from: Vec<String>,
    /// Delay between websocket reconnect attempts
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
}

fn default_signal_service() -> String {
    "localhost:8080".to_string()
}

fn default_reconnect_delay() -> u64 {
    5
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            service: default_signal_service(),
            phone_number: String::new(),
            allow_from: Vec::new(),
            reconnect_delay_secs: default_reconnect_delay(),
        }
    }
}

/// OpenAI-compatible completion service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivateModeConfig {
    /// Base URL of the proxy, without the `/v1` suffix
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Optional bearer token
    #[serde(default)]
    pub api_key: String,
    /// Model to use; when unset the first model listed by the backend is used
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Upper bound for a single completion or model-listing call
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub extra_headers: HashMap<String, String>,
}

fn default_api_base() -> String {
    "http://localhost:8080".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    1000
}

fn default_timeout_secs() -> u64 {
    60
}

impl Default for PrivateModeConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            api_key: String::new(),
            model: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
            extra_headers: HashMap::new(),
        }
    }
}

/// Conversation history configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Maximum number of messages (user and assistant entries counted
    /// separately) retained per sender
    #[serde(default = "default_max_history_messages")]
    pub max_history_messages: usize,
}

fn default_max_history_messages() -> usize {
    DEFAULT_MAX_HISTORY_MESSAGES
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_history_messages: default_max_history_messages(),
        }
    }
}

/// Fixed strings sent back to users
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepliesConfig {
    #[serde(default = "default_cleared")]
    pub cleared: String,
    #[serde(default = "default_nothing_to_clear")]
    pub nothing_to_clear: String,
    #[serde(default = "default_chat_failed")]
    pub chat_failed: String,
    #[serde(default = "default_empty_chat")]
    pub empty_chat: String,
    #[serde(default = "default_models_header")]
    pub models_header: String,
    #[serde(default = "default_models_unavailable")]
    pub models_unavailable: String,
    /// Appended after the generated command list in `!help`
    #[serde(default = "default_help_footer")]
    pub help_footer: String,
}

fn default_cleared() -> String {
    "Conversation history cleared.".to_string()
}

fn default_nothing_to_clear() -> String {
    "No conversation history to clear.".to_string()
}

fn default_chat_failed() -> String {
    "Sorry, I couldn't process your request right now. Please try again later.".to_string()
}

fn default_empty_chat() -> String {
    "Please provide a message to chat with the AI.".to_string()
}

fn default_models_header() -> String {
    "Available models:".to_string()
}

fn default_models_unavailable() -> String {
    "No models available or unable to fetch model list.".to_string()
}

fn default_help_footer() -> String {
    "You can also send messages without commands for direct chat.".to_string()
}

impl Default for RepliesConfig {
    fn default() -> Self {
        Self {
            cleared: default_cleared(),
            nothing_to_clear: default_nothing_to_clear(),
            chat_failed: default_chat_failed(),
            empty_chat: default_empty_chat(),
            models_header: default_models_header(),
            models_unavailable: default_models_unavailable(),
            help_footer: default_help_footer(),
        }
    }
}
