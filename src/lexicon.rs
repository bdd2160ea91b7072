//! Word lists that construction templates draw from.
//!
//! Each category is tagged with the feature task it represents. The built-in
//! lexicon is loaded once per process; a replacement can be read from JSON, in
//! which case it is validated as strictly as the built-in one.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::construction::FeatureTask;

// =============================================================================
// Category ids
// =============================================================================

/// Every category a generator can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CategoryId {
    UrbanLocation,
    NaturalLocation,
    HumanSubject,
    AnimalSubject,
    ReligiousLeader,
    SecularLeader,
    MalePronoun,
    FemalePronoun,
    ProperNoun,
    PositiveCopula,
    NegatedCopula,
}

impl CategoryId {
    pub const ALL: [CategoryId; 11] = [
        CategoryId::UrbanLocation,
        CategoryId::NaturalLocation,
        CategoryId::HumanSubject,
        CategoryId::AnimalSubject,
        CategoryId::ReligiousLeader,
        CategoryId::SecularLeader,
        CategoryId::MalePronoun,
        CategoryId::FemalePronoun,
        CategoryId::ProperNoun,
        CategoryId::PositiveCopula,
        CategoryId::NegatedCopula,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CategoryId::UrbanLocation => "urban_location",
            CategoryId::NaturalLocation => "natural_location",
            CategoryId::HumanSubject => "human_subject",
            CategoryId::AnimalSubject => "animal_subject",
            CategoryId::ReligiousLeader => "religious_leader",
            CategoryId::SecularLeader => "secular_leader",
            CategoryId::MalePronoun => "male_pronoun",
            CategoryId::FemalePronoun => "female_pronoun",
            CategoryId::ProperNoun => "propn",
            CategoryId::PositiveCopula => "positive",
            CategoryId::NegatedCopula => "negation",
        }
    }

    /// The feature task this category belongs to.
    pub fn task(self) -> FeatureTask {
        match self {
            CategoryId::UrbanLocation | CategoryId::NaturalLocation => FeatureTask::Location,
            CategoryId::HumanSubject | CategoryId::AnimalSubject => FeatureTask::Subject,
            // Secular leaders are the negative pole of the religious task.
            CategoryId::ReligiousLeader | CategoryId::SecularLeader => FeatureTask::Religious,
            CategoryId::MalePronoun | CategoryId::FemalePronoun => FeatureTask::Pronoun,
            CategoryId::ProperNoun => FeatureTask::Propn,
            CategoryId::PositiveCopula | CategoryId::NegatedCopula => FeatureTask::Negation,
        }
    }
}

impl fmt::Display for CategoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CategoryId {
    type Err = LexiconError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CategoryId::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| LexiconError::UnknownCategory(s.to_string()))
    }
}

// =============================================================================
// Category / Lexicon
// =============================================================================

/// A named set of literal surface strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub id: CategoryId,
    pub values: Vec<String>,
    pub task: FeatureTask,
}

#[derive(Debug, thiserror::Error)]
pub enum LexiconError {
    #[error("unknown category label: {0:?}")]
    UnknownCategory(String),
    #[error("unknown feature task {task:?} for category {category}")]
    UnknownTask { category: String, task: String },
    #[error("category {0} is missing")]
    MissingCategory(CategoryId),
    #[error("category {0} is defined more than once")]
    DuplicateCategory(CategoryId),
    #[error("category {0} has no values")]
    EmptyCategory(CategoryId),
    #[error("category {0} contains a blank value")]
    BlankValue(CategoryId),
    #[error("category {category} is tagged {found}, expected {expected}")]
    WrongTask {
        category: CategoryId,
        expected: FeatureTask,
        found: FeatureTask,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed lexicon json: {0}")]
    Json(#[from] serde_json::Error),
}

/// All categories, keyed by id. Immutable once built.
#[derive(Debug, Clone)]
pub struct Lexicon {
    categories: BTreeMap<CategoryId, Category>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LexiconFile {
    categories: Vec<CategoryRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CategoryRecord {
    label: String,
    task: String,
    values: Vec<String>,
}

static BUILTIN: Lazy<Lexicon> =
    Lazy::new(|| Lexicon::from_categories(builtin_categories()).expect("Invalid built-in lexicon"));

impl Lexicon {
    /// The process-wide built-in lexicon.
    pub fn builtin() -> &'static Lexicon {
        &BUILTIN
    }

    /// Build from explicit categories, rejecting anything incomplete.
    pub fn from_categories(categories: Vec<Category>) -> Result<Self, LexiconError> {
        let mut map = BTreeMap::new();
        for category in categories {
            if category.task != category.id.task() {
                return Err(LexiconError::WrongTask {
                    category: category.id,
                    expected: category.id.task(),
                    found: category.task,
                });
            }
            if category.values.is_empty() {
                return Err(LexiconError::EmptyCategory(category.id));
            }
            if category.values.iter().any(|v| v.trim().is_empty()) {
                return Err(LexiconError::BlankValue(category.id));
            }
            let id = category.id;
            if map.insert(id, category).is_some() {
                return Err(LexiconError::DuplicateCategory(id));
            }
        }

        if let Some(missing) = CategoryId::ALL.iter().find(|id| !map.contains_key(id)) {
            return Err(LexiconError::MissingCategory(*missing));
        }

        Ok(Self { categories: map })
    }

    pub fn from_json(raw: &str) -> Result<Self, LexiconError> {
        let file: LexiconFile = serde_json::from_str(raw)?;
        let mut categories = Vec::with_capacity(file.categories.len());
        for record in file.categories {
            let id: CategoryId = record.label.parse()?;
            let task: FeatureTask =
                record
                    .task
                    .parse()
                    .map_err(|_| LexiconError::UnknownTask {
                        category: record.label.clone(),
                        task: record.task.clone(),
                    })?;
            categories.push(Category {
                id,
                values: record.values,
                task,
            });
        }
        Self::from_categories(categories)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, LexiconError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn to_json(&self) -> Result<String, LexiconError> {
        let file = LexiconFile {
            categories: self
                .categories
                .values()
                .map(|c| CategoryRecord {
                    label: c.id.as_str().to_string(),
                    task: c.task.as_str().to_string(),
                    values: c.values.clone(),
                })
                .collect(),
        };
        Ok(serde_json::to_string_pretty(&file)?)
    }

    pub fn category(&self, id: CategoryId) -> &Category {
        // Completeness is checked in `from_categories`.
        &self.categories[&id]
    }

    pub fn values(&self, id: CategoryId) -> &[String] {
        &self.category(id).values
    }

    pub fn categories(&self) -> impl Iterator<Item = &Category> {
        self.categories.values()
    }
}

fn category(id: CategoryId, values: &[&str]) -> Category {
    Category {
        id,
        values: values.iter().map(|v| v.to_string()).collect(),
        task: id.task(),
    }
}

fn builtin_categories() -> Vec<Category> {
    vec![
        category(
            CategoryId::UrbanLocation,
            &[
                "laboratory",
                "theatre",
                "museum",
                "courtroom",
                "apartment building",
                "restaurant",
                "house",
                "film studio",
                "hotel lobby",
                "grocery store",
            ],
        ),
        category(
            CategoryId::NaturalLocation,
            &[
                "river", "pond", "woodlands", "cave", "canyon", "prairie", "jungle", "marsh",
                "lagoon", "meadow",
            ],
        ),
        category(
            CategoryId::HumanSubject,
            &[
                "student",
                "reporter",
                "hiker",
                "researcher",
                "firefighter",
                "fugitive",
                "critic",
                "photographer",
                "director",
                "surveyor",
            ],
        ),
        category(
            CategoryId::AnimalSubject,
            &[
                "boar",
                "worm",
                "hawk",
                "hound",
                "butterfly",
                "snake",
                "duck",
                "bear",
                "mountain lion",
                "horse",
            ],
        ),
        category(
            CategoryId::ReligiousLeader,
            &[
                "pope",
                "reverend",
                "bishop",
                "Dalai Lama",
                "rabbi",
                "cardinal",
                "pastor",
                "deacon",
                "imam",
                "ayatollah",
            ],
        ),
        category(
            CategoryId::SecularLeader,
            &[
                "president",
                "CEO",
                "principal",
                "sheriff",
                "judge",
                "ambassador",
                "officer",
                "prime minister",
                "colonel",
                "professor",
            ],
        ),
        category(CategoryId::MalePronoun, &["He"]),
        category(CategoryId::FemalePronoun, &["She"]),
        category(
            CategoryId::ProperNoun,
            &[
                "Lebron James",
                "Bernie Sanders",
                "Christopher Nolan",
                "Paul Atreides",
                "Noam Chomsky",
                "Serena Williams",
                "Margot Robbie",
                "Alexandria Ocasio-Cortez",
                "Hermione Granger",
                "Jane Goodall",
            ],
        ),
        category(
            CategoryId::PositiveCopula,
            &["is", "was", "has been", "may be", "could be"],
        ),
        category(
            CategoryId::NegatedCopula,
            &["is not", "was not", "has not been", "may not be", "could not be"],
        ),
    ]
}
