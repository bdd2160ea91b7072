//! Standalone prompt/completion datasets for fine-tuning or offline evaluation.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::RunConfig;
use crate::construction::{FeatureTask, FormatType};
use crate::draws::DrawSource;
use crate::format::{finetuning_pair, PromptCompletion};
use crate::lexicon::Lexicon;
use crate::prompt::{Prompt, PromptError};

#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error(transparent)]
    Prompt(#[from] PromptError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

fn default_n_shots() -> usize {
    1
}

fn default_n_queries() -> usize {
    10
}

fn default_prob_of_ambiguous() -> u32 {
    50
}

fn default_tasks() -> Vec<String> {
    vec![FeatureTask::Location.as_str().to_string()]
}

/// What to generate. Task names are kept as given so unknown ones can be reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetConfig {
    #[serde(default = "default_format")]
    pub construction_format: FormatType,
    #[serde(default = "default_n_shots")]
    pub n_shots: usize,
    #[serde(default = "default_n_queries")]
    pub n_queries: usize,
    #[serde(default = "default_prob_of_ambiguous")]
    pub prob_of_ambiguous: u32,
    #[serde(default)]
    pub needs_instruction: bool,
    #[serde(default)]
    pub needs_informative: bool,
    #[serde(default)]
    pub include_ambiguous_examples: bool,
    #[serde(default = "default_tasks")]
    pub construction_types: Vec<String>,
}

fn default_format() -> FormatType {
    FormatType::Qa
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            construction_format: default_format(),
            n_shots: default_n_shots(),
            n_queries: default_n_queries(),
            prob_of_ambiguous: default_prob_of_ambiguous(),
            needs_instruction: false,
            needs_informative: false,
            include_ambiguous_examples: false,
            construction_types: default_tasks(),
        }
    }
}

impl DatasetConfig {
    /// Distribution-mode run config for one task, exported for fine-tuning.
    fn run_config(&self, task: FeatureTask) -> RunConfig {
        let mut config = RunConfig::new(task.construction_type(), self.construction_format)
            .shots(self.n_shots)
            .queries(self.n_queries)
            .prob_of_ambiguous(self.prob_of_ambiguous)
            .salient_task(task.as_str())
            .ambiguous_examples(self.include_ambiguous_examples)
            .finetuning(false);
        if self.needs_instruction {
            config = config.instruction(self.needs_informative);
        }
        config
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    /// `YYYYMMDD_HH-MM` at generation time.
    pub date: String,
    pub config: DatasetConfig,
    #[serde(default)]
    pub examples: Vec<PromptCompletion>,
}

impl Dataset {
    pub fn new(config: DatasetConfig, now: DateTime<Local>) -> Self {
        Self {
            id: Uuid::new_v4(),
            date: now.format("%Y%m%d_%H-%M").to_string(),
            config,
            examples: Vec::new(),
        }
    }

    /// Generate `n_queries` pairs per known task. Unknown tasks are skipped.
    pub fn generate<D: DrawSource + ?Sized>(
        &mut self,
        lexicon: &Lexicon,
        draws: &mut D,
    ) -> Result<(), DatasetError> {
        let tasks = self.config.construction_types.clone();
        for raw in &tasks {
            let Ok(task) = raw.parse::<FeatureTask>() else {
                warn!(task = %raw, "no construction type for salient task, skipping");
                continue;
            };

            let run = self.config.run_config(task);
            for _ in 0..self.config.n_queries {
                let prompt = Prompt::assemble_with_lexicon(&run, lexicon, draws)?;
                let mut pair = finetuning_pair(&prompt, run.needs_instruction);
                pair.salient_task = prompt.salient_task();
                self.examples.push(pair);
            }
        }
        info!(
            id = %self.id,
            examples = self.examples.len(),
            "generated dataset"
        );
        Ok(())
    }

    pub fn file_name(&self) -> String {
        format!("{}_ambibench_examples.json", self.date)
    }

    /// Write pretty-printed JSON into `dir`, creating it if needed.
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<PathBuf, DatasetError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let path = dir.join(self.file_name());
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)?;
        Ok(path)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, DatasetError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}
