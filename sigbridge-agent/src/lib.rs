//! Message routing for sigbridge
//!
//! This crate classifies inbound text into commands and runs the chat-turn
//! protocol against the completion gateway.

pub mod command;
pub mod router;

pub use command::{classify, help_text, Command, CommandInfo, COMMANDS};
pub use router::{Outcome, Reply, SessionRouter};
