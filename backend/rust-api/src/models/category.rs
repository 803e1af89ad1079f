use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub correct: u32,
    pub total: u32,
}

impl Tally {
    pub fn record(&mut self, correct: bool) {
        self.total += 1;
        if correct {
            self.correct += 1;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryScore {
    pub correct: u32,
    pub total: u32,
    pub subcategories: BTreeMap<String, Tally>,
}

/// Per-category correctness for one participant, keyed by category name.
pub type CategoryBreakdown = BTreeMap<String, CategoryScore>;

/// Taxonomy as written in configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TaxonomyConfig {
    pub categories: Vec<String>,
    pub default_category: String,
    /// subcategory -> category
    #[serde(default)]
    pub subcategories: BTreeMap<String, String>,
}
