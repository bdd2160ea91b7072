//! Predefined test matrices over formats, tasks and construction types.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::Local;
use tracing::info;

use crate::config::{RunConfig, RunMode};
use crate::construction::{ConstructionType, FeatureTask, FormatType};
use crate::draws::DrawSource;
use crate::gateway::LogprobGateway;
use crate::persist::{results_csv_path, timestamped_path};
use crate::pipeline::{OutputPaths, PipelineError, PipelineOutput, QueryPipeline};
use crate::scoring::ScoreAccumulator;

const SUITE_FORMATS: [FormatType; 2] = [FormatType::Qa, FormatType::Arrow];

const TWO_FEATURE_TASKS: [FeatureTask; 6] = [
    FeatureTask::Subject,
    FeatureTask::Location,
    FeatureTask::Religious,
    FeatureTask::Negation,
    FeatureTask::Propn,
    FeatureTask::Pronoun,
];

const BASELINE_TASKS: [FeatureTask; 4] = [
    FeatureTask::Religious,
    FeatureTask::Pronoun,
    FeatureTask::Propn,
    FeatureTask::Negation,
];

const FINETUNED_TASKS: [FeatureTask; 2] = [FeatureTask::Propn, FeatureTask::Negation];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suite {
    /// Every task in both formats, distribution mode, 3 batches of 20 queries.
    TwoFeature,
    /// Every construction type in both formats, two-set mode, exported for fine-tuning.
    TwoSet,
    /// Four tasks at every shot count from 3 to 19, one query each, exported for fine-tuning.
    FinetuningBaseline,
    /// Proper-noun and negation at 20 shots with an uninformative instruction.
    FinetunedSet,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown suite: {0:?}")]
pub struct UnknownSuite(pub String);

impl Suite {
    pub const ALL: [Suite; 4] = [
        Suite::TwoFeature,
        Suite::TwoSet,
        Suite::FinetuningBaseline,
        Suite::FinetunedSet,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Suite::TwoFeature => "two_feature",
            Suite::TwoSet => "two_set",
            Suite::FinetuningBaseline => "finetuning_baseline",
            Suite::FinetunedSet => "finetuned_set",
        }
    }

    /// Expand the suite into one config per batch, in execution order.
    ///
    /// `base` supplies the model, shots and instruction flags that the suite
    /// does not pin itself.
    pub fn plan(self, base: &RunConfig) -> Vec<SuiteRun> {
        let mut runs = Vec::new();
        match self {
            Suite::TwoFeature => {
                for format in SUITE_FORMATS {
                    for task in TWO_FEATURE_TASKS {
                        for repetition in 0..3 {
                            let config = with_task(base, format, task).queries(20);
                            runs.push(SuiteRun { config, repetition });
                        }
                    }
                }
            }
            Suite::TwoSet => {
                for format in SUITE_FORMATS {
                    for ct in ConstructionType::ALL {
                        for repetition in 0..3 {
                            let mut config = base.clone();
                            config.construction_type = ct;
                            config.format = format;
                            config.salient_task = None;
                            let config = config.queries(20).finetuning(false);
                            runs.push(SuiteRun {
                                config: exported(config),
                                repetition,
                            });
                        }
                    }
                }
            }
            Suite::FinetuningBaseline => {
                for format in SUITE_FORMATS {
                    for task in BASELINE_TASKS {
                        for repetition in 0..2 {
                            for shots in 3..20 {
                                let config = with_task(base, format, task)
                                    .shots(shots)
                                    .queries(1)
                                    .finetuning(base.finetuning_control);
                                runs.push(SuiteRun {
                                    config: exported(config),
                                    repetition,
                                });
                            }
                        }
                    }
                }
            }
            Suite::FinetunedSet => {
                for format in SUITE_FORMATS {
                    for task in FINETUNED_TASKS {
                        for repetition in 0..3 {
                            let config = with_task(base, format, task)
                                .shots(20)
                                .queries(20)
                                .instruction(false)
                                .ambiguous_examples(true);
                            runs.push(SuiteRun { config, repetition });
                        }
                    }
                }
            }
        }
        runs
    }
}

impl FromStr for Suite {
    type Err = UnknownSuite;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Suite::ALL
            .iter()
            .copied()
            .find(|suite| suite.as_str() == s)
            .ok_or_else(|| UnknownSuite(s.to_string()))
    }
}

impl std::fmt::Display for Suite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn with_task(base: &RunConfig, format: FormatType, task: FeatureTask) -> RunConfig {
    let mut config = base.clone();
    config.construction_type = task.construction_type();
    config.format = format;
    config.salient_task = Some(task.as_str().to_string());
    config.for_finetuning = false;
    config.finetuning_control = false;
    config
}

/// Fine-tuning runs never query a model.
fn exported(config: RunConfig) -> RunConfig {
    config.mode(RunMode::Finetuning)
}

/// One batch of a suite.
#[derive(Debug, Clone)]
pub struct SuiteRun {
    pub config: RunConfig,
    pub repetition: usize,
}

impl SuiteRun {
    /// Output files for this batch under `root`.
    pub fn output_paths(&self, root: &Path) -> OutputPaths {
        let c = &self.config;
        match c.mode {
            RunMode::Live => OutputPaths {
                results_csv: Some(results_csv_path(
                    root,
                    &c.model,
                    c.construction_type,
                    c.format,
                    c.shots,
                    self.repetition,
                )),
                ..OutputPaths::default()
            },
            RunMode::Finetuning => OutputPaths {
                finetuning_jsonl: Some(timestamped_path(
                    root.join("for_finetuning"),
                    Local::now(),
                    "test.jsonl",
                )),
                ..OutputPaths::default()
            },
            RunMode::BatchExport => OutputPaths {
                batch_requests_jsonl: Some(root.join("batch").join("requests.jsonl")),
                batch_solutions_csv: Some(root.join("batch").join("solutions.csv")),
                ..OutputPaths::default()
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct SuiteOptions {
    /// Pause between live batches to stay under provider rate limits.
    pub pause_between_batches: Duration,
    /// Root for output files; nothing is written when unset.
    pub output_root: Option<PathBuf>,
}

impl Default for SuiteOptions {
    fn default() -> Self {
        Self {
            pause_between_batches: Duration::from_secs(60),
            output_root: None,
        }
    }
}

/// Run every batch of `suite` and concatenate the outputs.
pub async fn run_suite<D: DrawSource + ?Sized>(
    suite: Suite,
    base: &RunConfig,
    options: &SuiteOptions,
    draws: &mut D,
    gateway: Option<&dyn LogprobGateway>,
    accumulator: &mut ScoreAccumulator,
) -> Result<PipelineOutput, PipelineError> {
    let runs = suite.plan(base);
    info!(suite = %suite, batches = runs.len(), "starting suite");

    let mut combined = PipelineOutput::default();
    for (i, run) in runs.iter().enumerate() {
        if i > 0 && run.config.mode == RunMode::Live && !options.pause_between_batches.is_zero() {
            tokio::time::sleep(options.pause_between_batches).await;
        }

        let mut pipeline = QueryPipeline::new(run.config.clone());
        if let Some(root) = &options.output_root {
            pipeline = pipeline.outputs(run.output_paths(root));
        }
        let out = pipeline.run(draws, gateway, accumulator).await?;

        combined.prompts.extend(out.prompts);
        combined.finetuning_pairs.extend(out.finetuning_pairs);
        combined.batch_requests.extend(out.batch_requests);
        combined.solutions.extend(out.solutions);
        combined.rows.extend(out.rows);
    }
    Ok(combined)
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    fn base() -> RunConfig {
        RunConfig::new(ConstructionType::SubjectLocation, FormatType::Arrow).shots(2)
    }

    #[test]
    fn two_feature_matrix() {
        let runs = Suite::TwoFeature.plan(&base());
        assert_eq!(runs.len(), 2 * 6 * 3);
        assert_eq!(runs[0].config.format, FormatType::Qa);
        assert_eq!(runs[0].config.salient_task.as_deref(), Some("subject"));
        for run in &runs {
            let task: FeatureTask = run.config.salient_task.as_deref().unwrap().parse().unwrap();
            assert_eq!(task.construction_type(), run.config.construction_type);
            assert_eq!(run.config.queries, 20);
            assert_eq!(run.config.mode, RunMode::Live);
            assert!(run.config.validate().is_ok());
        }
    }

    #[test]
    fn two_set_is_exported_without_task() {
        let runs = Suite::TwoSet.plan(&base());
        assert_eq!(runs.len(), 2 * 3 * 3);
        assert!(runs.iter().all(|r| r.config.salient_task.is_none()
            && r.config.for_finetuning
            && r.config.mode == RunMode::Finetuning));
    }

    #[test]
    fn baseline_sweeps_shots() {
        let runs = Suite::FinetuningBaseline.plan(&base());
        assert_eq!(runs.len(), 2 * 4 * 2 * 17);
        let shots: Vec<usize> = runs.iter().take(17).map(|r| r.config.shots).collect();
        assert_eq!(shots, (3..20).collect::<Vec<_>>());
        assert!(runs.iter().all(|r| r.config.queries == 1));
    }

    #[test]
    fn finetuned_set_uses_uninformative_instruction() {
        let runs = Suite::FinetunedSet.plan(&base());
        assert_eq!(runs.len(), 2 * 2 * 3);
        for run in &runs {
            assert!(run.config.needs_instruction);
            assert!(!run.config.needs_informative);
            assert_eq!(run.config.shots, 20);
        }
    }

    #[test]
    fn suite_names_round_trip() {
        for suite in Suite::ALL {
            assert_eq!(suite.as_str().parse::<Suite>().unwrap(), suite);
        }
        assert!("everything".parse::<Suite>().is_err());
    }

    #[tokio::test]
    async fn exported_suite_runs_offline() {
        let dir = tempfile::tempdir().unwrap();
        let options = SuiteOptions {
            pause_between_batches: Duration::ZERO,
            output_root: Some(dir.path().to_path_buf()),
        };
        let mut rng = StdRng::seed_from_u64(9);
        let mut acc = ScoreAccumulator::new();
        let out = run_suite(Suite::TwoSet, &base(), &options, &mut rng, None, &mut acc)
            .await
            .unwrap();
        assert_eq!(out.finetuning_pairs.len(), 18 * 20);
        assert!(dir.path().join("for_finetuning").is_dir());
    }
}
