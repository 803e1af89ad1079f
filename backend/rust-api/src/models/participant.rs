use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::category::CategoryBreakdown;
use super::quiz::AnswerMap;

pub type ParticipantId = String;
pub type ConnectionId = uuid::Uuid;

/// A participant of one session. `score` always equals the number of
/// correct entries in `answers`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub display_name: String,
    pub score: u32,
    pub answers: AnswerMap,
    pub joined_at: DateTime<Utc>,
}

impl Participant {
    pub fn new(id: ParticipantId, display_name: String) -> Self {
        Self {
            id,
            display_name,
            score: 0,
            answers: AnswerMap::new(),
            joined_at: Utc::now(),
        }
    }

    pub fn summary(&self) -> ParticipantSummary {
        ParticipantSummary {
            id: self.id.clone(),
            display_name: self.display_name.clone(),
            score: self.score,
            joined_at: self.joined_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantSummary {
    pub id: ParticipantId,
    pub display_name: String,
    pub score: u32,
    pub joined_at: DateTime<Utc>,
}

/// Scored roster entry consumed by results and grouping.
#[derive(Debug, Clone, Serialize)]
pub struct ParticipantResult {
    pub id: ParticipantId,
    pub display_name: String,
    pub score: u32,
    pub answered: usize,
    pub breakdown: CategoryBreakdown,
}
