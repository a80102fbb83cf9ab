//! Core types for sigbridge
//!
//! This crate provides the configuration, message bus, per-sender
//! conversation store and logging setup shared by the other sigbridge crates.

pub mod bus;
pub mod config;
pub mod error;
pub mod logging;
pub mod session;
pub mod utils;

pub use error::{Error, Result};
