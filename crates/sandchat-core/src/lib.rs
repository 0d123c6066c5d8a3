//! Sandchat Core Library
//!
//! Shared functionality for the Sandchat relay:
//! - Chat and shell request model with validation
//! - Prompt rendering from a conversation transcript
//! - Stream events and their wire frames
//! - Configuration resolution and hierarchy
//! - Common error types

pub mod config;
pub mod error;
pub mod event;
pub mod message;
pub mod prompt;
pub mod tracing_init;

pub use config::Config;
pub use error::{Error, Result, ValidationError};
pub use event::StreamEvent;
pub use message::{ChatRequest, Message, Role, ShellRequest};
pub use prompt::Persona;
