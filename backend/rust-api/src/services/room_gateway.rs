use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::room_registry::RoomRegistry;
use crate::error::RoomError;
use crate::models::{
    ClientMessage, ConnectionId, Identity, OptionIndex, QuestionId, RoomCode, ServerEvent,
    SessionStatus,
};

/// Per-connection protocol state machine.
///
/// Decodes client frames, drives the registry and pushes events for the
/// connection into `outbound`. Failures are reported only to this
/// connection, as an `error` event.
pub struct RoomGateway {
    registry: Arc<RoomRegistry>,
    connection_id: ConnectionId,
    identity: Option<Identity>,
    outbound: mpsc::Sender<ServerEvent>,
    forwarder: Option<JoinHandle<()>>,
}

impl RoomGateway {
    pub fn new(
        registry: Arc<RoomRegistry>,
        identity: Option<Identity>,
        outbound: mpsc::Sender<ServerEvent>,
    ) -> Self {
        Self {
            registry,
            connection_id: Uuid::new_v4(),
            identity,
            outbound,
            forwarder: None,
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Handles one raw text frame.
    pub async fn handle_text(&mut self, text: &str) {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => self.handle(message).await,
            Err(e) => self.reject_malformed(e),
        }
    }

    /// Reports an undecodable frame to this connection only.
    pub fn reject_malformed(&self, detail: impl std::fmt::Display) {
        tracing::debug!(connection_id = %self.connection_id, error = %detail, "Malformed client frame");
        self.send(ServerEvent::Error {
            code: "malformed_message".to_string(),
            message: format!("could not decode message: {}", detail),
        });
    }

    pub async fn handle(&mut self, message: ClientMessage) {
        if let Err(err) = self.dispatch(message).await {
            tracing::debug!(connection_id = %self.connection_id, error = %err, "Client request rejected");
            self.send(ServerEvent::from(&err));
        }
    }

    async fn dispatch(&mut self, message: ClientMessage) -> Result<(), RoomError> {
        match message {
            ClientMessage::JoinRoom {
                room_code,
                display_name,
            } => self.join(&room_code, display_name).await,
            ClientMessage::LeaveRoom { room_code } => self.leave(&room_code).await,
            ClientMessage::StartQuiz { room_code } => {
                self.transition(&room_code, SessionStatus::InProgress).await
            }
            ClientMessage::StopQuiz { room_code } => {
                self.transition(&room_code, SessionStatus::Completed).await
            }
            ClientMessage::SubmitAnswer {
                room_code,
                question_id,
                selected_option_index,
            } => {
                self.submit(&room_code, question_id, selected_option_index)
                    .await
            }
        }
    }

    async fn join(&mut self, room_code: &str, display_name: Option<String>) -> Result<(), RoomError> {
        let code = RoomCode::parse(room_code)?;
        let name = display_name
            .filter(|n| !n.trim().is_empty())
            .or_else(|| self.identity.as_ref().map(|i| i.name.clone()))
            .ok_or_else(|| RoomError::Validation("display name is required".to_string()))?;

        let outcome = self.registry.join(&code, self.connection_id, &name).await?;

        self.send(ServerEvent::RoomJoined {
            room_code: outcome.room_code.clone(),
            participant_id: outcome.participant.id.clone(),
            status: outcome.status,
        });
        self.forwarder = Some(tokio::spawn(forward(
            outcome.events,
            self.outbound.clone(),
            self.connection_id,
        )));
        Ok(())
    }

    async fn leave(&mut self, room_code: &str) -> Result<(), RoomError> {
        let code = RoomCode::parse(room_code)?;
        match self.registry.binding(self.connection_id).await {
            Some((bound, _)) if bound == code => {
                self.stop_forwarding();
                self.registry.leave(self.connection_id).await;
                Ok(())
            }
            Some((bound, _)) => Err(RoomError::Validation(format!(
                "connection is in room {}, not {}",
                bound, code
            ))),
            None => Err(RoomError::State("connection has not joined a room".to_string())),
        }
    }

    async fn transition(&mut self, room_code: &str, target: SessionStatus) -> Result<(), RoomError> {
        let code = RoomCode::parse(room_code)?;
        let actor = self
            .identity
            .as_ref()
            .ok_or_else(|| RoomError::Authorization("sign in to control a room".to_string()))?;
        self.registry.transition(&code, target, actor).await?;
        Ok(())
    }

    async fn submit(
        &mut self,
        room_code: &str,
        question_id: String,
        selected_option_index: i64,
    ) -> Result<(), RoomError> {
        let code = RoomCode::parse(room_code)?;
        let selected = OptionIndex::try_from(selected_option_index)?;
        let participant_id = match self.registry.binding(self.connection_id).await {
            Some((bound, participant_id)) if bound == code => participant_id,
            _ => {
                return Err(RoomError::State(format!(
                    "connection has not joined room {}",
                    code
                )))
            }
        };

        self.registry
            .submit_answer(&code, &participant_id, &QuestionId::new(question_id), selected)
            .await?;
        Ok(())
    }

    /// Queues an event for this connection only. Dropped if the outbound
    /// buffer is full.
    fn send(&self, event: ServerEvent) {
        if let Err(TrySendError::Full(event)) = self.outbound.try_send(event) {
            tracing::warn!(
                connection_id = %self.connection_id,
                event = event.event_name(),
                "Outbound buffer full, dropping event"
            );
        }
    }

    fn stop_forwarding(&mut self) {
        if let Some(handle) = self.forwarder.take() {
            handle.abort();
        }
    }

    /// Connection went away: stop forwarding and detach from the room.
    pub async fn close(mut self) {
        self.stop_forwarding();
        self.registry.disconnect(self.connection_id).await;
    }
}

impl Drop for RoomGateway {
    fn drop(&mut self) {
        self.stop_forwarding();
    }
}

async fn forward(
    mut events: broadcast::Receiver<ServerEvent>,
    outbound: mpsc::Sender<ServerEvent>,
    connection_id: ConnectionId,
) {
    loop {
        match events.recv().await {
            Ok(event) => match outbound.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(event)) => {
                    tracing::warn!(
                        %connection_id,
                        event = event.event_name(),
                        "Outbound buffer full, dropping event"
                    );
                }
                Err(TrySendError::Closed(_)) => break,
            },
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(%connection_id, skipped, "Connection lagged behind room events");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
