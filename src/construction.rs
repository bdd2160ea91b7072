//! Construction families, feature tasks, and rendering formats.
//!
//! Each construction family confounds two binary features: "task A" and
//! "task B". Task names (`subject`, `location`, ...) identify a single feature
//! and always resolve to exactly one family.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::config::ConfigError;

// =============================================================================
// Axis
// =============================================================================

/// Which of the two confounded features of a family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    TaskA,
    TaskB,
}

impl Axis {
    pub fn as_str(self) -> &'static str {
        match self {
            Axis::TaskA => "task_a",
            Axis::TaskB => "task_b",
        }
    }
}

// =============================================================================
// Construction type
// =============================================================================

/// The three construction families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConstructionType {
    /// "The {subject} is in the {location}."
    SubjectLocation,
    /// "{Pronoun} is in the {urban_location} with the {leader}."
    ReligiousPronoun,
    /// "{Proper noun | The common noun} {copula} in the {urban_location}."
    PropnNegation,
}

impl ConstructionType {
    pub const ALL: [ConstructionType; 3] = [
        ConstructionType::SubjectLocation,
        ConstructionType::ReligiousPronoun,
        ConstructionType::PropnNegation,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ConstructionType::SubjectLocation => "subject_location",
            ConstructionType::ReligiousPronoun => "religious_pronoun",
            ConstructionType::PropnNegation => "propn_negation",
        }
    }

    /// The task carried by the given axis of this family.
    pub fn task(self, axis: Axis) -> FeatureTask {
        match (self, axis) {
            (ConstructionType::SubjectLocation, Axis::TaskA) => FeatureTask::Subject,
            (ConstructionType::SubjectLocation, Axis::TaskB) => FeatureTask::Location,
            (ConstructionType::ReligiousPronoun, Axis::TaskA) => FeatureTask::Religious,
            (ConstructionType::ReligiousPronoun, Axis::TaskB) => FeatureTask::Pronoun,
            (ConstructionType::PropnNegation, Axis::TaskA) => FeatureTask::Propn,
            (ConstructionType::PropnNegation, Axis::TaskB) => FeatureTask::Negation,
        }
    }
}

impl fmt::Display for ConstructionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepts family names and single-task names; a task resolves to its family.
impl FromStr for ConstructionType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "subject_location" => Ok(ConstructionType::SubjectLocation),
            "religious_pronoun" => Ok(ConstructionType::ReligiousPronoun),
            "propn_negation" => Ok(ConstructionType::PropnNegation),
            other => other
                .parse::<FeatureTask>()
                .map(FeatureTask::construction_type)
                .map_err(|_| ConfigError::UnknownConstructionType(other.to_string())),
        }
    }
}

impl Serialize for ConstructionType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ConstructionType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Feature task
// =============================================================================

/// A single feature: one axis of one family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FeatureTask {
    Subject,
    Location,
    Religious,
    Pronoun,
    Propn,
    Negation,
}

impl FeatureTask {
    pub const ALL: [FeatureTask; 6] = [
        FeatureTask::Subject,
        FeatureTask::Location,
        FeatureTask::Religious,
        FeatureTask::Pronoun,
        FeatureTask::Propn,
        FeatureTask::Negation,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FeatureTask::Subject => "subject",
            FeatureTask::Location => "location",
            FeatureTask::Religious => "religious",
            FeatureTask::Pronoun => "pronoun",
            FeatureTask::Propn => "propn",
            FeatureTask::Negation => "negation",
        }
    }

    pub fn axis(self) -> Axis {
        match self {
            FeatureTask::Subject | FeatureTask::Religious | FeatureTask::Propn => Axis::TaskA,
            FeatureTask::Location | FeatureTask::Pronoun | FeatureTask::Negation => Axis::TaskB,
        }
    }

    pub fn construction_type(self) -> ConstructionType {
        match self {
            FeatureTask::Subject | FeatureTask::Location => ConstructionType::SubjectLocation,
            FeatureTask::Religious | FeatureTask::Pronoun => ConstructionType::ReligiousPronoun,
            FeatureTask::Propn | FeatureTask::Negation => ConstructionType::PropnNegation,
        }
    }
}

impl fmt::Display for FeatureTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown feature task: {0:?}")]
pub struct UnknownTask(pub String);

impl FromStr for FeatureTask {
    type Err = UnknownTask;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FeatureTask::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownTask(s.to_string()))
    }
}

impl Serialize for FeatureTask {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for FeatureTask {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Format type
// =============================================================================

/// Rendering stencil for a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FormatType {
    /// `Sentence\n>Label`
    Arrow,
    /// `Q: Sentence\nA: Label`
    Qa,
}

impl FormatType {
    pub const ALL: [FormatType; 2] = [FormatType::Arrow, FormatType::Qa];

    pub fn as_str(self) -> &'static str {
        match self {
            FormatType::Arrow => "arrow",
            FormatType::Qa => "qa",
        }
    }
}

impl fmt::Display for FormatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FormatType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "arrow" => Ok(FormatType::Arrow),
            "qa" => Ok(FormatType::Qa),
            other => Err(ConfigError::UnknownFormat(other.to_string())),
        }
    }
}

impl Serialize for FormatType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for FormatType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
