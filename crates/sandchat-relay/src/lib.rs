//! Sandchat Relay Library
//!
//! - Producers: hosted Messages API client and child processes
//! - Relay loop from producer fragments to stream events
//! - Shell command dispatch
//! - axum HTTP server with SSE responses

pub mod producer;
pub mod relay;
pub mod server;
pub mod shell;
