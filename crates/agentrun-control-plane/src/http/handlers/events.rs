//! Server-sent event stream over the process-wide event log.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        IntoResponse, Response,
    },
};
use futures_util::stream::StreamExt;
use tracing::{debug, warn};

use agentrun_core::Event;

use crate::http::responses::{ApiError, EventsQuery};
use crate::state::AppState;

const LAST_EVENT_ID: &str = "last-event-id";

/// Stream events as SSE.
///
/// GET /v1/events
///
/// Without a cursor the stream starts at the current head. `?after=<seq>`
/// or a `Last-Event-ID` header replays everything after that position.
pub async fn stream_events(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventsQuery>,
    headers: HeaderMap,
) -> Response {
    let after = query.after.or_else(|| {
        headers
            .get(LAST_EVENT_ID)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
    });

    let subscription = match state.events.subscribe(after) {
        Ok(subscription) => subscription,
        Err(e) => {
            return ApiError::Internal {
                message: e.to_string(),
            }
            .into_response();
        }
    };
    debug!(after = ?after, "SSE subscriber attached");

    let stream = subscription
        .into_stream()
        .map(|event| Ok::<_, Infallible>(to_sse(&event)));

    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

fn to_sse(event: &Event) -> SseEvent {
    let frame = SseEvent::default()
        .id(event.seq.to_string())
        .event(event.event_type());
    match frame.json_data(event) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(seq = event.seq, error = %e, "Could not encode event");
            SseEvent::default().comment(format!("unencodable event {}", event.seq))
        }
    }
}
