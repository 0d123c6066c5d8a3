//! The relay loop.
//!
//! Turns a producer's fragments into stream events (streaming mode) or one
//! concatenated response (non-streaming mode). Both modes are written once
//! against [`Producer`] and serve the chat and shell endpoints alike.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use sandchat_core::event::ContentKind;
use sandchat_core::{ChatRequest, Message, Persona, StreamEvent, ValidationError};
use tracing::{info, warn};

use crate::producer::{Fragment, FragmentStream, Producer, ProducerError, ProducerInput};

/// Events sent to the caller, always ending with one terminal event.
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Errors from a non-streaming relay.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Producer(#[from] ProducerError),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

/// Chat relay: a persona, the producer that answers, and the bound applied
/// to non-streaming requests.
pub struct Relay {
    persona: Persona,
    producer: Arc<dyn Producer>,
    timeout: Duration,
}

impl Relay {
    pub fn new(persona: Persona, producer: Arc<dyn Producer>, timeout: Duration) -> Self {
        Self {
            persona,
            producer,
            timeout,
        }
    }

    /// Validate a chat request and start streaming its answer.
    ///
    /// Validation failures return before the producer is touched.
    pub async fn stream_chat(
        &self,
        request: ChatRequest,
        kind: ContentKind,
    ) -> Result<EventStream, ValidationError> {
        request.validate()?;
        let input = ProducerInput::chat(&self.persona, request.messages);
        Ok(start_stream(self.producer.as_ref(), input, kind).await)
    }

    /// Validate a chat request and wait for the complete answer.
    pub async fn complete_chat(&self, request: ChatRequest) -> Result<String, RelayError> {
        request.validate()?;
        let input = ProducerInput::chat(&self.persona, request.messages);
        collect(self.producer.as_ref(), input, self.timeout).await
    }

    /// Stream an answer to a single question typed outside the chat UI.
    pub async fn stream_question(&self, question: &str, kind: ContentKind) -> EventStream {
        let input = ProducerInput::chat(&self.persona, vec![Message::user(question)]);
        start_stream(self.producer.as_ref(), input, kind).await
    }
}

/// Start `producer` and relay its output. A failure to start becomes a
/// single `Error` event.
pub async fn start_stream(
    producer: &dyn Producer,
    input: ProducerInput,
    kind: ContentKind,
) -> EventStream {
    match producer.start(input).await {
        Ok(fragments) => relay(producer.name(), fragments, kind),
        Err(e) => {
            warn!(producer = producer.name(), error = %e, "Producer failed to start");
            Box::pin(futures::stream::once(async move {
                StreamEvent::error(e.to_string())
            }))
        }
    }
}

/// Re-emit fragments as events, in arrival order and unmodified.
///
/// `Exit` becomes `Done`, the first error becomes a terminal `Error`, and a
/// stream that simply ends is treated as a successful completion.
pub fn relay(name: &'static str, mut fragments: FragmentStream, kind: ContentKind) -> EventStream {
    Box::pin(async_stream::stream! {
        let mut relayed = 0usize;
        let mut terminal = None;
        while let Some(item) = fragments.next().await {
            match item {
                Ok(Fragment::Delta(text) | Fragment::Line(text)) => {
                    relayed += 1;
                    yield kind.wrap(text);
                }
                Ok(Fragment::Exit(exit_code)) => {
                    terminal = Some(StreamEvent::Done { exit_code });
                    break;
                }
                Err(e) => {
                    warn!(producer = name, error = %e, relayed, "Producer failed mid-stream");
                    terminal = Some(StreamEvent::error(e.to_string()));
                    break;
                }
            }
        }
        info!(producer = name, relayed, "Relay finished");
        yield terminal.unwrap_or(StreamEvent::Done { exit_code: None });
    })
}

/// Run `producer` to completion under `timeout` and concatenate its text.
///
/// Deltas are joined as-is; lines are joined with newlines.
pub async fn collect(
    producer: &dyn Producer,
    input: ProducerInput,
    timeout: Duration,
) -> Result<String, RelayError> {
    let work = async {
        let mut fragments = producer.start(input).await?;
        let mut lines = Vec::new();
        let mut text = String::new();
        while let Some(item) = fragments.next().await {
            match item? {
                Fragment::Delta(delta) => text.push_str(&delta),
                Fragment::Line(line) => lines.push(line),
                Fragment::Exit(_) => break,
            }
        }
        if !lines.is_empty() {
            text.push_str(&lines.join("\n"));
        }
        Ok::<_, ProducerError>(text)
    };

    match tokio::time::timeout(timeout, work).await {
        Ok(result) => Ok(result?),
        Err(_) => {
            warn!(
                producer = producer.name(),
                timeout = ?timeout,
                "Producer timed out"
            );
            Err(RelayError::Timeout(timeout))
        }
    }
}
