//! Transport integrations for sigbridge
//!
//! Signal messages arrive through a signal-cli-rest-api service; replies are
//! sent back through the same service.

pub mod base;
pub mod manager;
pub mod signal;

pub use base::{sender_allowed, ChannelError, ChannelHandler, ChannelHandlerPtr, Result};
pub use manager::ChannelManager;
pub use signal::SignalHandler;
