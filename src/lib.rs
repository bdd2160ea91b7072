#![forbid(unsafe_code)]

//! # ambibench
//!
//! Few-shot prompts whose examples confound two binary features, so a model's
//! answer on the query reveals which feature it took to be the task.
//!
//! Each example sentence carries two features (say, a human or animal subject
//! and an indoor or outdoor location). In two-set mode the two seed examples
//! agree on both features and the query splits them; the feature the labels
//! track is inferred and written back onto every example. In distribution mode
//! the task is named up front and a configurable share of examples is
//! ambiguous. Prompts are formatted as arrow or Q/A text, scored through
//! echoed logprobs, and summarised per task and format.

pub mod config;
pub mod construction;
pub mod dataset;
pub mod draws;
pub mod example;
pub mod format;
pub mod gateway;
pub mod generator;
pub mod instruction;
pub mod lexicon;
pub mod persist;
pub mod pipeline;
pub mod prompt;
pub mod report;
pub mod salience;
pub mod scoring;
pub mod suite;

pub use config::{ConfigError, RunConfig, RunMode};
pub use construction::{Axis, ConstructionType, FeatureTask, FormatType};
pub use dataset::{Dataset, DatasetConfig, DatasetError};
pub use draws::DrawSource;
pub use example::Example;
pub use format::{cumulative_batch, finetuning_pair, format_prompt, PromptCompletion};
pub use gateway::{CompletionsAdapter, LogprobGateway, ProviderError};
pub use generator::ExampleGenerator;
pub use instruction::Instruction;
pub use lexicon::{Lexicon, LexiconError};
pub use persist::{append_csv_rows, JsonlWriter, PersistError};
pub use pipeline::{OutputPaths, PipelineError, PipelineOutput, QueryPipeline};
pub use prompt::{Prompt, PromptError};
pub use report::{build_report, render_report_markdown, Report};
pub use salience::{create_salient_task_key, obtain_salient_task_key, SalientTaskKey};
pub use scoring::{join_results, label_rows, ResultRow, ScoreAccumulator};
pub use suite::{run_suite, Suite, SuiteOptions};
