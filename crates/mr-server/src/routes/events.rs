//! Server-Sent Events (SSE) handler.
//!
//! Subscribes to the [`mr_core::events::EventBus`], replays recent events for
//! late joiners, and sends keepalive heartbeats.

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use serde::Deserialize;
use std::convert::Infallible;
use std::time::Duration;

use crate::context::AppContext;

/// Number of past events replayed when no `replay` is given.
const DEFAULT_REPLAY: usize = 50;

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// How many recent events to replay before going live.
    pub replay: Option<usize>,
}

/// GET /api/events -- SSE stream of job and readiness events.
pub async fn events_handler(
    State(ctx): State<AppContext>,
    Query(params): Query<EventsQuery>,
) -> Sse<impl futures_core::Stream<Item = Result<Event, Infallible>>> {
    let recent = ctx
        .event_bus
        .recent_events(params.replay.unwrap_or(DEFAULT_REPLAY));
    let mut rx = ctx.event_bus.subscribe();

    let stream = async_stream::stream! {
        for event in recent.into_iter().rev() {
            if let Ok(data) = serde_json::to_string(&event) {
                yield Ok(Event::default().id(event.id.to_string()).data(data));
            }
        }

        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Ok(data) = serde_json::to_string(&event) {
                        yield Ok(Event::default().id(event.id.to_string()).data(data));
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!("SSE client lagged by {n} events");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}
