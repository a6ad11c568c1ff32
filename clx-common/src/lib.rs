//! # CantoLex Common Library
//!
//! Shared code for CantoLex services including:
//! - Error types (`Error` enum)
//! - Event types (`ClxEvent` enum) and the `EventBus`
//! - Configuration loading and root folder resolution
//! - Human-readable time formatting for ETA display

pub mod config;
pub mod error;
pub mod events;
pub mod human_time;

pub use error::{Error, Result};
