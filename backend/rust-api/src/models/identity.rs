use serde::{Deserialize, Serialize};

/// Verified caller identity supplied by the token verifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub name: String,
    pub role: String,
}

impl Identity {
    pub fn is_teacher(&self) -> bool {
        matches!(self.role.as_str(), "teacher" | "admin")
    }
}
