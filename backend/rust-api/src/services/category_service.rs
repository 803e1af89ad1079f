use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

use crate::error::RoomError;
use crate::models::{AnswerMap, CategoryBreakdown, Quiz, TaxonomyConfig};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaxonomyError {
    #[error("taxonomy declares no categories")]
    NoCategories,
    #[error("default category `{0}` is not a declared category")]
    UnknownDefault(String),
    #[error("subcategory `{subcategory}` maps to undeclared category `{category}`")]
    UnknownCategory {
        subcategory: String,
        category: String,
    },
    #[error("subcategory `{0}` is mapped more than once")]
    DuplicateSubcategory(String),
}

/// Canonical, total subcategory -> category mapping.
///
/// Built once from configuration; a table that references an undeclared
/// category is rejected at construction time.
#[derive(Debug, Clone)]
pub struct CategoryTaxonomy {
    default_category: String,
    subcategories: HashMap<String, String>,
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

impl CategoryTaxonomy {
    pub fn from_config(config: TaxonomyConfig) -> Result<Self, TaxonomyError> {
        let categories: BTreeSet<String> = config.categories.iter().map(|c| normalize(c)).collect();
        if categories.is_empty() {
            return Err(TaxonomyError::NoCategories);
        }

        let default_category = normalize(&config.default_category);
        if !categories.contains(&default_category) {
            return Err(TaxonomyError::UnknownDefault(config.default_category));
        }

        let mut subcategories = HashMap::with_capacity(config.subcategories.len());
        for (subcategory, category) in config.subcategories {
            let category_key = normalize(&category);
            if !categories.contains(&category_key) {
                return Err(TaxonomyError::UnknownCategory {
                    subcategory,
                    category,
                });
            }
            if subcategories
                .insert(normalize(&subcategory), category_key)
                .is_some()
            {
                return Err(TaxonomyError::DuplicateSubcategory(subcategory));
            }
        }

        Ok(Self {
            default_category,
            subcategories,
        })
    }

    /// Mathematics diagnostic taxonomy used when configuration has none.
    pub fn builtin() -> Self {
        let table: &[(&str, &str)] = &[
            ("bilangan bulat", "bilangan"),
            ("pecahan", "bilangan"),
            ("desimal", "bilangan"),
            ("persen", "bilangan"),
            ("perbandingan", "bilangan"),
            ("persamaan", "aljabar"),
            ("pertidaksamaan", "aljabar"),
            ("fungsi", "aljabar"),
            ("pola", "aljabar"),
            ("bangun datar", "geometri"),
            ("bangun ruang", "geometri"),
            ("sudut", "geometri"),
            ("pythagoras", "geometri"),
            ("peluang", "statistika"),
            ("data", "statistika"),
            ("rata-rata", "statistika"),
        ];

        let config = TaxonomyConfig {
            categories: ["bilangan", "aljabar", "geometri", "statistika", "umum"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
            default_category: "umum".to_string(),
            subcategories: table
                .iter()
                .map(|(sub, cat)| (sub.to_string(), cat.to_string()))
                .collect(),
        };

        match Self::from_config(config) {
            Ok(taxonomy) => taxonomy,
            Err(err) => unreachable!("built-in taxonomy is inconsistent: {err}"),
        }
    }

    pub fn default_category(&self) -> &str {
        &self.default_category
    }

    /// Category of a subcategory. Absent or blank subcategories take the
    /// default category; a named subcategory missing from the table is an
    /// error.
    pub fn resolve(&self, subcategory: Option<&str>) -> Result<&str, RoomError> {
        match subcategory.map(normalize).filter(|s| !s.is_empty()) {
            None => Ok(&self.default_category),
            Some(key) => self
                .subcategories
                .get(&key)
                .map(String::as_str)
                .ok_or_else(|| {
                    RoomError::Validation(format!("subcategory `{}` has no category", key))
                }),
        }
    }

    /// Stamps every question with its canonical category.
    pub fn categorize(&self, mut quiz: Quiz) -> Result<Quiz, RoomError> {
        for question in &mut quiz.questions {
            question.category = self.resolve(question.subcategory.as_deref())?.to_string();
        }
        Ok(quiz)
    }
}

/// Correct/total counts per category and subcategory for one answer map.
///
/// Every question of the quiz counts towards `total`; unanswered questions
/// are simply not correct.
pub fn aggregate(quiz: &Quiz, answers: &AnswerMap) -> CategoryBreakdown {
    let mut breakdown = CategoryBreakdown::new();

    for question in &quiz.questions {
        let correct = answers
            .get(&question.id)
            .is_some_and(|selected| question.is_correct(*selected));

        let entry = breakdown.entry(question.category.clone()).or_default();
        entry.total += 1;
        if correct {
            entry.correct += 1;
        }

        if let Some(sub) = question
            .subcategory
            .as_deref()
            .map(normalize)
            .filter(|s| !s.is_empty())
        {
            entry.subcategories.entry(sub).or_default().record(correct);
        }
    }

    breakdown
}
