//! Text producers.
//!
//! A producer turns one request into a lazy, finite stream of text
//! fragments followed by an exit status. The relay loop consumes every
//! producer the same way, whether the text comes from the hosted Messages
//! API or from a child process.

pub mod api;
pub mod process;
mod sse;

use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use sandchat_core::config::{ChatBackend, ChatConfig};
use sandchat_core::event::{MAX_ERROR_DETAIL, truncate_chars};
use sandchat_core::{Message, Persona, prompt};

pub use api::{ApiConfig, ApiProducer};
pub use process::{Identity, ProcessProducer, ProcessSpec};

/// One item yielded by a producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    /// Incremental text from a streaming API; concatenated as-is.
    Delta(String),
    /// One complete line of process output, without its terminator.
    Line(String),
    /// The producer finished successfully.
    Exit(Option<i32>),
}

/// Stream of fragments. Ends after `Exit` or the first error.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<Fragment, ProducerError>> + Send>>;

/// Everything a producer may need to answer one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerInput {
    /// System instruction (persona) for structured APIs.
    pub system: String,
    /// Structured conversation for structured APIs.
    pub messages: Vec<Message>,
    /// Single text argument for process producers: the flattened prompt,
    /// or the shell command.
    pub text: String,
}

impl ProducerInput {
    /// Input for a chat turn.
    pub fn chat(persona: &Persona, messages: Vec<Message>) -> Self {
        Self {
            system: persona.as_str().to_string(),
            text: prompt::render(persona, &messages),
            messages,
        }
    }

    /// Input for a shell command.
    pub fn command(command: impl Into<String>) -> Self {
        Self {
            system: String::new(),
            messages: Vec::new(),
            text: command.into(),
        }
    }
}

/// Something that yields text for a request.
#[async_trait::async_trait]
pub trait Producer: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Begin producing. Errors here mean nothing was started.
    async fn start(&self, input: ProducerInput) -> Result<FragmentStream, ProducerError>;
}

/// Errors from producer operations.
#[derive(Debug, thiserror::Error)]
pub enum ProducerError {
    #[error("Failed to spawn {program}: {reason}")]
    SpawnFailed { program: String, reason: String },

    #[error("{}", exit_message(.code, .stderr))]
    Exited { code: Option<i32>, stderr: String },

    #[error("I/O error: {0}")]
    Io(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("API returned status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Producer misconfigured: {0}")]
    Config(String),
}

#[allow(clippy::ref_option)]
fn exit_message(code: &Option<i32>, stderr: &str) -> String {
    if !stderr.trim().is_empty() {
        return truncate_chars(stderr, MAX_ERROR_DETAIL).to_string();
    }
    match *code {
        Some(code) => format!("process exited with status {code}"),
        None => "process terminated by signal".to_string(),
    }
}

/// Build the chat producer selected by configuration.
pub fn chat_producer(
    config: &ChatConfig,
    api_key: Option<String>,
) -> Result<Arc<dyn Producer>, ProducerError> {
    match config.backend {
        ChatBackend::Api => {
            let api_key = api_key.ok_or_else(|| {
                ProducerError::Config("ANTHROPIC_API_KEY is required for the api backend".into())
            })?;
            let producer = ApiProducer::new(ApiConfig::from_chat_config(config, api_key))?;
            Ok(Arc::new(producer))
        }
        ChatBackend::Cli => Ok(Arc::new(ProcessProducer::cli(config, api_key))),
    }
}
