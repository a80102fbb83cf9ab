//! Base trait for channel handlers

use async_trait::async_trait;
use sigbridge_core::bus::{InboundMessage, OutboundMessage};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

/// Trait for channel handlers
#[async_trait]
pub trait ChannelHandler: Send + Sync {
    /// Get the channel name
    fn name(&self) -> &str;

    /// Check if the channel is running
    fn is_running(&self) -> bool;

    /// Start the channel handler
    async fn start(&mut self) -> Result<()>;

    /// Stop the channel handler
    async fn stop(&mut self) -> Result<()>;

    /// Send a message
    async fn send(&self, message: OutboundMessage) -> Result<()>;

    /// Set the inbound message sender
    fn set_inbound_sender(&mut self, tx: mpsc::UnboundedSender<InboundMessage>);

    /// Check if a sender is allowed
    fn is_allowed(&self, sender_id: &str) -> bool;
}

/// Channel errors
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel not configured: {0}")]
    NotConfigured(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),
}

pub type Result<T> = std::result::Result<T, ChannelError>;

/// Shared channel handler type
pub type ChannelHandlerPtr = Arc<RwLock<dyn ChannelHandler>>;

/// Allow-list check shared by handlers.
///
/// An empty list allows everyone; `*` is a wildcard. Compound IDs such as
/// `+15551234|uuid` match when any part is listed.
pub fn sender_allowed(allow_from: &[String], sender_id: &str) -> bool {
    if allow_from.is_empty() || allow_from.iter().any(|a| a == "*") {
        return true;
    }

    if allow_from.iter().any(|a| a == sender_id) {
        return true;
    }

    sender_id.contains('|')
        && sender_id
            .split('|')
            .any(|part| !part.is_empty() && allow_from.iter().any(|a| a == part))
}
