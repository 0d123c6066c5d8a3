//! Error types for the Sandchat core library.

use thiserror::Error;

/// Result type alias using the core `Error`.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for Sandchat operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Malformed, empty, or misordered request input.
///
/// Reported to the caller before any producer is invoked.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("No messages provided")]
    NoMessages,

    #[error("Last message must be from user")]
    LastMessageNotUser,

    #[error("Invalid request body: {0}")]
    MalformedBody(String),
}
