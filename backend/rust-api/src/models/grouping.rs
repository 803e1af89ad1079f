use serde::{Deserialize, Serialize};

use super::participant::ParticipantId;

#[derive(Debug, Deserialize)]
pub struct GroupingQuery {
    pub size: i64,
    pub category: Option<String>,
}

/// What the roster was actually sorted by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RankingBasis {
    OverallScore,
    Category {
        category: String,
    },
    /// A category was requested but at least one participant had no
    /// questions in it, so everyone was ranked by overall score instead.
    OverallScoreFallback {
        requested_category: String,
        missing: Vec<ParticipantId>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupMember {
    pub participant_id: ParticipantId,
    pub display_name: String,
    pub score: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct Grouping {
    pub basis: RankingBasis,
    pub groups: Vec<Vec<GroupMember>>,
}

impl Grouping {
    pub fn empty(basis: RankingBasis) -> Self {
        Self {
            basis,
            groups: Vec::new(),
        }
    }

    pub fn member_count(&self) -> usize {
        self.groups.iter().map(Vec::len).sum()
    }
}
