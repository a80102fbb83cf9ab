//! Completion service integrations for sigbridge
//!
//! This crate defines the [`CompletionGateway`] capability and its HTTP
//! implementation for the PrivateMode proxy.

pub mod base;
pub mod privatemode;

pub use base::{build_messages, CompletionGateway, GatewayError, GatewayResult};
pub use privatemode::PrivateModeClient;
