use axum::{
    extract::{Path, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    Extension,
};
use futures::stream::{self, Stream};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::{
    error::RoomError,
    models::{Identity, RoomCode, ServerEvent},
    services::AppState,
};

/// SSE mirror of a room's broadcast, for the owner's dashboard.
/// GET /api/v1/rooms/{code}/events
pub async fn room_stream(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(code): Path<String>,
) -> Result<impl IntoResponse, RoomError> {
    let code = RoomCode::parse(&code)?;
    let events = state.rooms.subscribe(&code, &identity).await?;

    tracing::info!("Client connected to SSE stream: room={}", code);

    Ok(Sse::new(create_event_stream(code, events)).keep_alive(KeepAlive::default()))
}

/// Ends when the room is dropped from the registry.
fn create_event_stream(
    code: RoomCode,
    events: broadcast::Receiver<ServerEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold((code, events), |(code, mut events)| async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let sse = Event::default()
                        .event(event.event_name())
                        .data(event.to_json());
                    return Some((Ok(sse), (code, events)));
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("SSE stream lagged: room={}, skipped={}", code, skipped);
                }
                Err(RecvError::Closed) => {
                    tracing::info!("SSE stream closed: room={}", code);
                    return None;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn stream_forwards_events_and_ends_when_room_closes() {
        let (tx, rx) = broadcast::channel(8);
        let code = RoomCode::parse("ABC123").unwrap();
        let stream = create_event_stream(code, rx);

        tx.send(ServerEvent::QuizStarted).unwrap();
        tx.send(ServerEvent::QuizStopped).unwrap();
        drop(tx);

        let items: Vec<_> = stream.collect().await;
        assert_eq!(items.len(), 2);
    }
}
