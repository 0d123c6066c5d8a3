use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use sandchat_core::event::ContentKind;
use sandchat_core::{ChatRequest, ShellRequest};
use serde_json::{Value, json};
use tracing::{debug, info};
use uuid::Uuid;

use super::AppState;
use super::error::ApiError;
use super::sse::event_stream_response;
use crate::producer::ProducerInput;
use crate::relay::start_stream;
use crate::shell::ShellAction;

/// `GET /health`
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "service": "sandchat" }))
}

/// `POST /chat`: stream the answer as SSE, or return `{"response": ...}`
/// when the body sets `"stream": false`.
pub async fn chat(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let request = ChatRequest::from_slice(&body)?;
    let request_id = Uuid::new_v4();
    info!(
        %request_id,
        messages = request.messages.len(),
        stream = request.stream,
        "chat request"
    );

    if request.stream {
        let events = state.relay.stream_chat(request, ContentKind::Text).await?;
        return Ok(event_stream_response(events));
    }

    let response = state.relay.complete_chat(request).await?;
    debug!(%request_id, len = response.len(), "chat response complete");
    Ok(Json(json!({ "response": response })).into_response())
}

/// `POST /shell`: run a command and stream its output as SSE.
pub async fn shell(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let request = ShellRequest::from_slice(&body)?;
    let request_id = Uuid::new_v4();

    match state.shell.dispatch(&request.command) {
        ShellAction::Noop => Ok(Json(json!({ "output": "", "exit_code": 0 })).into_response()),
        ShellAction::Welcome => {
            debug!(%request_id, "shell welcome");
            Ok(Json(json!({ "output": state.shell.welcome_text(), "exit_code": 0 })).into_response())
        }
        ShellAction::Chat(question) => {
            info!(%request_id, "shell command routed to chat");
            let events = state.relay.stream_question(question, ContentKind::Output).await;
            Ok(event_stream_response(events))
        }
        ShellAction::Execute(command) => {
            let executor = state.shell.executor().ok_or(ApiError::ShellDisabled)?;
            info!(
                %request_id,
                command_len = command.len(),
                history = request.history.len(),
                "shell command"
            );
            let events =
                start_stream(executor, ProducerInput::command(command), ContentKind::Output).await;
            Ok(event_stream_response(events))
        }
    }
}
