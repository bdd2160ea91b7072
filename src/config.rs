//! Run configuration and its validation.
//!
//! Every enumerated value is checked before any example is generated, so a bad
//! format or construction type fails fast instead of part-way through a batch.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::construction::{ConstructionType, FormatType};

/// Configuration errors. Raised before assembly begins.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid format type: {0:?} (expected 'arrow' or 'qa')")]
    UnknownFormat(String),
    #[error("undefined mapping to generator for construction type: {0:?}")]
    UnknownConstructionType(String),
    #[error("shots must be >= 1, got {0}")]
    InvalidShots(usize),
    #[error("queries must be >= 1, got {0}")]
    InvalidQueries(usize),
    #[error("prob_of_ambiguous is a percentage in 0..=100, got {0}")]
    InvalidProbability(u32),
    #[error("fine-tuning runs never query a model, but mode is {0:?}")]
    FinetuningMode(RunMode),
    #[error("failed to read config: {0}")]
    Read(String),
}

/// How a pipeline run disposes of each assembled prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Query the model and score the echoed logprobs.
    #[default]
    Live,
    /// Emit prompt/completion pairs without querying.
    Finetuning,
    /// Emit cumulative offline-inference requests plus a solutions table.
    BatchExport,
}

/// Everything needed to assemble and dispose of a batch of prompts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub construction_type: ConstructionType,
    pub format: FormatType,
    #[serde(default = "default_shots")]
    pub shots: usize,
    #[serde(default = "default_queries")]
    pub queries: usize,
    /// Percentage (0..=100) of ambiguous examples in distribution mode.
    #[serde(default = "default_prob_of_ambiguous")]
    pub prob_of_ambiguous: u32,
    #[serde(default)]
    pub needs_instruction: bool,
    #[serde(default)]
    pub needs_informative: bool,
    #[serde(default)]
    pub include_ambiguous_examples: bool,
    /// Lead every rendered prompt with the clarifying-question preamble.
    #[serde(default)]
    pub clarifying_assertion: bool,
    #[serde(default)]
    pub for_finetuning: bool,
    #[serde(default)]
    pub finetuning_control: bool,
    /// When set, prompts are built in distribution mode around this task.
    #[serde(default)]
    pub salient_task: Option<String>,
    #[serde(default)]
    pub mode: RunMode,
    #[serde(default = "default_model")]
    pub model: String,
    /// Pause between live model calls, applied by the pipeline.
    #[serde(default, with = "duration_ms")]
    pub inter_call_delay: Duration,
    #[serde(default)]
    pub rng_seed: Option<u64>,
}

fn default_shots() -> usize {
    1
}

fn default_queries() -> usize {
    1
}

fn default_prob_of_ambiguous() -> u32 {
    50
}

pub fn default_model() -> String {
    "text-davinci-003".to_string()
}

impl RunConfig {
    pub fn new(construction_type: ConstructionType, format: FormatType) -> Self {
        Self {
            construction_type,
            format,
            shots: default_shots(),
            queries: default_queries(),
            prob_of_ambiguous: default_prob_of_ambiguous(),
            needs_instruction: false,
            needs_informative: false,
            include_ambiguous_examples: false,
            clarifying_assertion: false,
            for_finetuning: false,
            finetuning_control: false,
            salient_task: None,
            mode: RunMode::default(),
            model: default_model(),
            inter_call_delay: Duration::ZERO,
            rng_seed: None,
        }
    }

    pub fn shots(mut self, shots: usize) -> Self {
        self.shots = shots;
        self
    }

    pub fn queries(mut self, queries: usize) -> Self {
        self.queries = queries;
        self
    }

    pub fn prob_of_ambiguous(mut self, percent: u32) -> Self {
        self.prob_of_ambiguous = percent;
        self
    }

    pub fn instruction(mut self, informative: bool) -> Self {
        self.needs_instruction = true;
        self.needs_informative = informative;
        self
    }

    pub fn ambiguous_examples(mut self, include: bool) -> Self {
        self.include_ambiguous_examples = include;
        self
    }

    pub fn clarifying_assertion(mut self, enabled: bool) -> Self {
        self.clarifying_assertion = enabled;
        self
    }

    /// Emit prompt/completion pairs instead of querying. Switches the run to
    /// [`RunMode::Finetuning`].
    pub fn finetuning(mut self, control: bool) -> Self {
        self.for_finetuning = true;
        self.mode = RunMode::Finetuning;
        self.finetuning_control = control;
        self
    }

    pub fn salient_task(mut self, task: impl Into<String>) -> Self {
        self.salient_task = Some(task.into());
        self
    }

    pub fn mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn inter_call_delay(mut self, delay: Duration) -> Self {
        self.inter_call_delay = delay;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Check numeric domains. Enumerated fields are already typed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.shots < 1 {
            return Err(ConfigError::InvalidShots(self.shots));
        }
        if self.queries < 1 {
            return Err(ConfigError::InvalidQueries(self.queries));
        }
        if self.prob_of_ambiguous > 100 {
            return Err(ConfigError::InvalidProbability(self.prob_of_ambiguous));
        }
        if self.for_finetuning && self.mode != RunMode::Finetuning {
            return Err(ConfigError::FinetuningMode(self.mode));
        }
        Ok(())
    }

    /// Parse and validate a JSON config. Without an explicit `mode`,
    /// `for_finetuning` selects [`RunMode::Finetuning`].
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| ConfigError::Read(e.to_string()))?;
        let mode_given = value.get("mode").is_some();
        let mut config: Self =
            serde_json::from_value(value).map_err(|e| ConfigError::Read(e.to_string()))?;
        if config.for_finetuning && !mode_given {
            config.mode = RunMode::Finetuning;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Read(e.to_string()))?;
        Self::from_json_str(&raw)
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
