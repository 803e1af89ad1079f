use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::RoomError;

/// Number of options every question carries.
pub const OPTION_COUNT: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuestionId(String);

impl QuestionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QuestionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for QuestionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Selected option, guaranteed to lie in `0..OPTION_COUNT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct OptionIndex(u8);

impl OptionIndex {
    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<i64> for OptionIndex {
    type Error = RoomError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        if (0..OPTION_COUNT as i64).contains(&value) {
            Ok(Self(value as u8))
        } else {
            Err(RoomError::Validation(format!(
                "option index {} is outside 0..={}",
                value,
                OPTION_COUNT - 1
            )))
        }
    }
}

impl From<OptionIndex> for u8 {
    fn from(value: OptionIndex) -> Self {
        value.0
    }
}

/// Answers keyed by question. Only ever built from validated input.
pub type AnswerMap = BTreeMap<QuestionId, OptionIndex>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    pub text: String,
    pub options: [String; OPTION_COUNT],
    pub correct_option_index: OptionIndex,
    /// Derived from `subcategory` when the quiz is admitted to a room.
    #[serde(default)]
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,
}

impl Question {
    pub fn is_correct(&self, selected: OptionIndex) -> bool {
        self.correct_option_index == selected
    }
}

/// Quiz content; immutable for as long as a room is running it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quiz {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub questions: Vec<Question>,
}

impl Quiz {
    pub fn question(&self, id: &QuestionId) -> Option<&Question> {
        self.questions.iter().find(|q| &q.id == id)
    }
}
