//! Few-shot prompt assembly.
//!
//! Two mutually exclusive modes, picked by whether a salient task is named:
//!
//! - **Two-set** (no task): two ambiguous seed examples whose features agree,
//!   then a query whose features disagree. The salient task is inferred from
//!   the observed labels and back-filled onto the examples.
//! - **Distribution** (task named): every example is labelled by the named
//!   task, with a configured percentage of ambiguous examples in the mix.

use serde::Serialize;
use tracing::debug;

use crate::config::{ConfigError, RunConfig};
use crate::construction::{Axis, ConstructionType, FeatureTask, FormatType};
use crate::draws::DrawSource;
use crate::example::Example;
use crate::generator::ExampleGenerator;
use crate::instruction::{assign_salient_task, Instruction};
use crate::lexicon::Lexicon;
use crate::salience::{create_salient_task_key, obtain_salient_task_key, SalienceError};

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    #[error("invalid salient task: {0:?}")]
    InvalidSalientTask(String),
    #[error("salient task {task} belongs to {expected}, not {found}")]
    TaskFamilyMismatch {
        task: FeatureTask,
        expected: ConstructionType,
        found: ConstructionType,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Salience(#[from] SalienceError),
}

/// Whether an example's two features agree (ambiguous) or disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExampleKind {
    Ambiguous,
    Disambiguating,
}

/// How a prompt was assembled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum AssemblyMode {
    TwoSet {
        include_ambiguous_examples: bool,
    },
    Distribution {
        task: FeatureTask,
        /// Kind drawn for each example, in order.
        kinds: Vec<ExampleKind>,
        randomize_sticky: bool,
    },
}

/// An ordered example sequence (last = query) plus an optional instruction.
#[derive(Debug, Clone, Serialize)]
pub struct Prompt {
    pub construction_type: ConstructionType,
    pub format_type: FormatType,
    pub shots: usize,
    pub examples: Vec<Example>,
    pub instruction: Option<Instruction>,
    pub mode: AssemblyMode,
}

impl Prompt {
    /// Assemble a prompt from the built-in lexicon.
    pub fn assemble<D: DrawSource + ?Sized>(
        config: &RunConfig,
        draws: &mut D,
    ) -> Result<Self, PromptError> {
        Self::assemble_with_lexicon(config, Lexicon::builtin(), draws)
    }

    pub fn assemble_with_lexicon<D: DrawSource + ?Sized>(
        config: &RunConfig,
        lexicon: &Lexicon,
        draws: &mut D,
    ) -> Result<Self, PromptError> {
        config.validate()?;
        let generator =
            ExampleGenerator::with_lexicon(config.construction_type, config.format, lexicon);

        let prompt = match config.salient_task.as_deref() {
            Some(raw) => {
                let task = resolve_salient_task(raw, config.construction_type)?;
                assemble_distribution(config, &generator, task, draws)?
            }
            None => assemble_two_set(config, &generator, draws)?,
        };

        debug!(
            construction_type = %prompt.construction_type,
            format = %prompt.format_type,
            examples = prompt.examples.len(),
            salient_task = ?prompt.salient_task(),
            "assembled prompt"
        );
        Ok(prompt)
    }

    pub fn query(&self) -> Option<&Example> {
        self.examples.last()
    }

    /// Instruction text, or the empty string when none was requested.
    pub fn instruction_text(&self) -> &str {
        self.instruction.as_ref().map_or("", |i| i.text.as_str())
    }

    /// The salient task shared by the examples, if assigned.
    pub fn salient_task(&self) -> Option<FeatureTask> {
        self.examples.first().and_then(|e| e.salient_task)
    }

    /// Human-readable dump of the prompt, one example per block.
    pub fn render_preview(&self) -> String {
        let mut out = String::new();
        if !self.instruction_text().is_empty() {
            out.push_str(self.instruction_text());
            out.push('\n');
        }
        for example in &self.examples {
            out.push_str(&example.construction);
            out.push_str("\n>");
            out.push_str(example.answer());
            out.push('\n');
        }
        out.push_str("###");
        out
    }
}

/// Map a named task onto its axis. Only the six single-feature names qualify.
fn resolve_salient_task(
    raw: &str,
    construction_type: ConstructionType,
) -> Result<FeatureTask, PromptError> {
    let task: FeatureTask = raw
        .parse()
        .map_err(|_| PromptError::InvalidSalientTask(raw.to_string()))?;
    if task.construction_type() != construction_type {
        return Err(PromptError::TaskFamilyMismatch {
            task,
            expected: task.construction_type(),
            found: construction_type,
        });
    }
    Ok(task)
}

// =============================================================================
// Two-set mode
// =============================================================================

fn assemble_two_set<D: DrawSource + ?Sized>(
    config: &RunConfig,
    generator: &ExampleGenerator<'_>,
    draws: &mut D,
) -> Result<Prompt, PromptError> {
    let mut examples: Vec<Example> = Vec::with_capacity(config.shots + 2);

    // Which seed gets X, and which seed gets the (true, true) features.
    let label_randomizer = draws.coin();
    let mut order_randomizer = draws.coin();

    if config.include_ambiguous_examples {
        for i in 0..2 {
            let label = if i % 2 == 0 {
                label_randomizer
            } else {
                !label_randomizer
            };
            let features = order_randomizer;
            examples.push(generator.generate_example(draws, features, features, label, None));
            order_randomizer = !order_randomizer;
        }
    }

    // The query always splits the features: task B is the negation of task A.
    let query_randomizer = draws.coin();
    let query_label_randomizer = draws.coin();
    examples.push(generator.generate_example(
        draws,
        query_randomizer,
        !query_randomizer,
        query_label_randomizer,
        None,
    ));

    let key = if config.include_ambiguous_examples {
        obtain_salient_task_key(&examples)?
    } else {
        // No seeds to infer from: key on the query's task B.
        create_salient_task_key(&examples, Axis::TaskB)?
    };

    let instruction = config.needs_instruction.then(|| {
        if config.needs_informative {
            Instruction::informative(config.construction_type, key)
        } else {
            Instruction::uninformative()
        }
    });

    assign_salient_task(config.construction_type, key, &mut examples);

    for _ in 1..config.shots {
        let next = match examples.last() {
            Some(last) => generator.generate_example_given_salient(draws, last),
            None => break,
        };
        examples.push(next);
    }

    Ok(Prompt {
        construction_type: config.construction_type,
        format_type: config.format,
        shots: config.shots,
        examples,
        instruction,
        mode: AssemblyMode::TwoSet {
            include_ambiguous_examples: config.include_ambiguous_examples,
        },
    })
}

// =============================================================================
// Distribution mode
// =============================================================================

/// Labels for one distribution-mode example.
///
/// `s` is the prompt-wide salient feature value and `y` the prompt-wide
/// observable label. The task-A and task-B disambiguating rows are not mirror
/// images of each other; keep them as written.
pub fn distribution_labels(
    kind: ExampleKind,
    randomize: bool,
    axis: Axis,
    s: bool,
    y: bool,
) -> (bool, bool, bool) {
    use Axis::{TaskA, TaskB};
    use ExampleKind::{Ambiguous, Disambiguating};

    match (kind, randomize, axis) {
        (Disambiguating, true, TaskA) => (s, !s, y),
        (Disambiguating, false, TaskA) => (!s, s, !y),
        (Disambiguating, true, TaskB) => (!s, s, y),
        (Disambiguating, false, TaskB) => (s, !s, !y),
        (Ambiguous, true, _) => (s, s, y),
        (Ambiguous, false, _) => (!s, !s, !y),
    }
}

/// A 100-slot pool: `percent_ambiguous` ambiguous slots, the rest disambiguating.
pub fn example_pool(percent_ambiguous: u32) -> Vec<ExampleKind> {
    let ambiguous = percent_ambiguous.min(100) as usize;
    let mut pool = vec![ExampleKind::Ambiguous; ambiguous];
    pool.resize(100, ExampleKind::Disambiguating);
    pool
}

fn assemble_distribution<D: DrawSource + ?Sized>(
    config: &RunConfig,
    generator: &ExampleGenerator<'_>,
    task: FeatureTask,
    draws: &mut D,
) -> Result<Prompt, PromptError> {
    let pool = example_pool(config.prob_of_ambiguous);
    let axis = task.axis();

    let salient_task_label = draws.coin();
    let active_task_label = draws.coin();

    // Held for the whole prompt only for fine-tuning control sets.
    let randomize_sticky = config.for_finetuning && config.finetuning_control;
    let sticky_randomize = if randomize_sticky {
        Some(draws.coin())
    } else {
        None
    };

    let mut examples = Vec::with_capacity(config.shots);
    let mut kinds = Vec::with_capacity(config.shots);
    for _ in 0..config.shots {
        let randomize = match sticky_randomize {
            Some(r) => r,
            None => draws.coin(),
        };
        let kind = pool[draws.index(pool.len())];

        let (a, b, active) =
            distribution_labels(kind, randomize, axis, salient_task_label, active_task_label);
        examples.push(generator.generate_example(draws, a, b, active, Some(task)));
        kinds.push(kind);
    }

    let instruction = if config.needs_instruction {
        Some(if config.needs_informative {
            let key = create_salient_task_key(&examples, axis)?;
            Instruction::informative(config.construction_type, key)
        } else {
            Instruction::uninformative()
        })
    } else {
        None
    };

    Ok(Prompt {
        construction_type: config.construction_type,
        format_type: config.format,
        shots: config.shots,
        examples,
        instruction,
        mode: AssemblyMode::Distribution {
            task,
            kinds,
            randomize_sticky,
        },
    })
}
