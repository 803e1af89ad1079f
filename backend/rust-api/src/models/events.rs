use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::participant::ParticipantId;
use super::quiz::{OptionIndex, QuestionId};
use super::session::{RoomCode, SessionStatus};
use crate::error::RoomError;

/// Messages a client sends over the room channel.
///
/// Fields stay loosely typed here; the gateway validates them before they
/// reach the registry.
#[derive(Debug, Clone, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ClientMessage {
    JoinRoom {
        room_code: String,
        #[serde(default)]
        display_name: Option<String>,
    },
    LeaveRoom {
        room_code: String,
    },
    StartQuiz {
        room_code: String,
    },
    StopQuiz {
        room_code: String,
    },
    SubmitAnswer {
        room_code: String,
        question_id: String,
        selected_option_index: i64,
    },
}

/// Events the server pushes to connections.
///
/// Delivery is at-most-once: a receiver that falls behind the room buffer
/// loses the oldest events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    RoomJoined {
        room_code: RoomCode,
        participant_id: ParticipantId,
        status: SessionStatus,
    },
    ParticipantJoined {
        id: ParticipantId,
        name: String,
        joined_at: DateTime<Utc>,
    },
    ParticipantLeft {
        id: ParticipantId,
    },
    QuizStarted,
    QuizStopped,
    AnswerSubmitted {
        participant_id: ParticipantId,
        question_id: QuestionId,
        answer: OptionIndex,
    },
    Error {
        code: String,
        message: String,
    },
}

impl ServerEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerEvent::RoomJoined { .. } => "room-joined",
            ServerEvent::ParticipantJoined { .. } => "participant-joined",
            ServerEvent::ParticipantLeft { .. } => "participant-left",
            ServerEvent::QuizStarted => "quiz-started",
            ServerEvent::QuizStopped => "quiz-stopped",
            ServerEvent::AnswerSubmitted { .. } => "answer-submitted",
            ServerEvent::Error { .. } => "error",
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

impl From<&RoomError> for ServerEvent {
    fn from(err: &RoomError) -> Self {
        ServerEvent::Error {
            code: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_messages_use_kebab_case_tags_and_camel_case_fields() {
        let raw = r#"{"type":"submit-answer","roomCode":"abc123","questionId":"q1","selectedOptionIndex":2}"#;
        match serde_json::from_str::<ClientMessage>(raw).unwrap() {
            ClientMessage::SubmitAnswer {
                room_code,
                question_id,
                selected_option_index,
            } => {
                assert_eq!(room_code, "abc123");
                assert_eq!(question_id, "q1");
                assert_eq!(selected_option_index, 2);
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn unit_events_serialize_as_bare_tags() {
        assert_eq!(ServerEvent::QuizStarted.to_json(), r#"{"type":"quiz-started"}"#);
        assert_eq!(ServerEvent::QuizStopped.event_name(), "quiz-stopped");
    }

    #[test]
    fn room_errors_become_error_events() {
        let event = ServerEvent::from(&RoomError::Validation("bad index".into()));
        let json: serde_json::Value = serde_json::from_str(&event.to_json()).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["code"], "validation_error");
        assert_eq!(json["message"], "validation failed: bad index");
    }
}
