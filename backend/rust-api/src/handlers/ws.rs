use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::{
    metrics::WS_CONNECTIONS_ACTIVE,
    middlewares::auth::bearer_token,
    models::{Identity, ServerEvent},
    services::{room_gateway::RoomGateway, AppState},
};

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

/// GET /api/v1/ws
///
/// Anonymous connections are accepted; a token, when given, must be valid.
pub async fn room_socket(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
) -> Result<Response, StatusCode> {
    let token = params.token.as_deref().or_else(|| bearer_token(&headers));
    let identity = match token {
        Some(token) => Some(state.jwt.identify(token).map_err(|e| {
            tracing::warn!("WebSocket JWT validation failed: {}", e);
            StatusCode::UNAUTHORIZED
        })?),
        None => None,
    };

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, identity)))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, identity: Option<Identity>) {
    WS_CONNECTIONS_ACTIVE.inc();

    let (mut sink, mut stream) = socket.split();
    let (outbound, mut pending) = mpsc::channel::<ServerEvent>(state.config.rooms.event_buffer.max(1));
    let mut gateway = RoomGateway::new(state.rooms.clone(), identity, outbound);
    let connection_id = gateway.connection_id();

    tracing::debug!(%connection_id, "WebSocket connected");

    let writer = tokio::spawn(async move {
        while let Some(event) = pending.recv().await {
            if sink.send(Message::Text(event.to_json().into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => gateway.handle_text(text.as_str()).await,
            Ok(Message::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                Ok(text) => gateway.handle_text(text).await,
                Err(e) => gateway.reject_malformed(e),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(%connection_id, error = %e, "WebSocket receive failed");
                break;
            }
        }
    }

    gateway.close().await;
    writer.abort();

    WS_CONNECTIONS_ACTIVE.dec();
    tracing::debug!(%connection_id, "WebSocket disconnected");
}
