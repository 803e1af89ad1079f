use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::participant::ParticipantSummary;
use crate::error::RoomError;

pub const ROOM_CODE_LEN: usize = 6;

const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Six-character alphanumeric room code, stored upper-cased so that every
/// lookup is case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomCode(String);

impl RoomCode {
    pub fn parse(raw: &str) -> Result<Self, RoomError> {
        let trimmed = raw.trim();
        if trimmed.len() != ROOM_CODE_LEN || !trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(RoomError::Validation(format!(
                "room code must be {} alphanumeric characters",
                ROOM_CODE_LEN
            )));
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let code = (0..ROOM_CODE_LEN)
            .map(|_| ROOM_CODE_ALPHABET[rng.random_range(0..ROOM_CODE_ALPHABET.len())] as char)
            .collect();
        Self(code)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RoomCode {
    type Error = RoomError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        RoomCode::parse(&value)
    }
}

impl From<RoomCode> for String {
    fn from(code: RoomCode) -> Self {
        code.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Waiting,
    InProgress,
    Completed,
}

impl SessionStatus {
    /// The only status this one may move to.
    pub fn next(self) -> Option<SessionStatus> {
        match self {
            SessionStatus::Waiting => Some(SessionStatus::InProgress),
            SessionStatus::InProgress => Some(SessionStatus::Completed),
            SessionStatus::Completed => None,
        }
    }

    pub fn can_transition_to(self, target: SessionStatus) -> bool {
        self.next() == Some(target)
    }

    pub fn is_active(self) -> bool {
        self != SessionStatus::Completed
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Waiting => "waiting",
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable session row as exchanged with the entity store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub room_code: RoomCode,
    pub quiz_id: String,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
}

#[derive(Debug, Deserialize, validator::Validate)]
pub struct CreateRoomRequest {
    #[validate(length(min = 1, max = 128))]
    pub quiz_id: String,
}

#[derive(Debug, Serialize)]
pub struct CreateRoomResponse {
    pub room_code: RoomCode,
    pub status: SessionStatus,
    pub quiz_id: String,
}

/// Point-in-time view of a room.
#[derive(Debug, Clone, Serialize)]
pub struct RoomSnapshot {
    pub room_code: RoomCode,
    pub session_id: String,
    pub quiz_id: String,
    pub status: SessionStatus,
    pub participants: Vec<ParticipantSummary>,
    pub created_at: DateTime<Utc>,
}
