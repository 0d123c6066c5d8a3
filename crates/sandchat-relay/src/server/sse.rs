//! Server-Sent Events responses.

use std::convert::Infallible;

use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;

use crate::relay::EventStream;

/// Write each event as one `data: <json>` frame.
///
/// Intermediary buffering and caching are disabled so frames reach the
/// caller as soon as they are produced.
pub fn event_stream_response(events: EventStream) -> Response {
    let frames =
        events.map(|event| Ok::<_, Infallible>(Event::default().data(event.to_frame().to_string())));
    (
        [("cache-control", "no-cache"), ("x-accel-buffering", "no")],
        Sse::new(frames),
    )
        .into_response()
}
