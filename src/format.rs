//! Rendering prompts into the literal strings sent to a model.

use serde::{Deserialize, Serialize};

use crate::construction::{FeatureTask, FormatType};
use crate::example::Example;
use crate::instruction::CLARIFYING_ASSERTION;
use crate::prompt::Prompt;

/// Affixes wrapped around each `construction` / label pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stencil {
    pub prefix: &'static str,
    pub infix: &'static str,
    pub suffix: &'static str,
}

impl Stencil {
    pub const ARROW: Stencil = Stencil {
        prefix: "",
        infix: "\n>",
        suffix: "",
    };

    pub const QA: Stencil = Stencil {
        prefix: "Q: ",
        infix: "\nA: ",
        suffix: "",
    };

    pub fn for_format(format: FormatType) -> Self {
        match format {
            FormatType::Arrow => Self::ARROW,
            FormatType::Qa => Self::QA,
        }
    }

    pub fn render(&self, example: &Example) -> String {
        format!(
            "{}{}{}{}{}",
            self.prefix,
            example.construction,
            self.infix,
            example.answer(),
            self.suffix
        )
    }
}

/// Characters at the end of a rendered prompt that form the answer.
///
/// Arrow answers are the bare label; QA answers keep the space after `A:`.
pub fn completion_len(format: FormatType) -> usize {
    match format {
        FormatType::Arrow => 1,
        FormatType::Qa => 2,
    }
}

/// A prompt split into model input and expected completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptCompletion {
    pub prompt: String,
    pub completion: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salient_task: Option<FeatureTask>,
}

/// Prompts and expected answers for cumulative offline inference.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CumulativeBatch {
    pub prompts: Vec<String>,
    pub solutions: Vec<String>,
}

fn rendered_examples(prompt: &Prompt) -> Vec<String> {
    let stencil = Stencil::for_format(prompt.format_type);
    prompt.examples.iter().map(|e| stencil.render(e)).collect()
}

/// Single string: optional instruction line, then one rendered example per line.
pub fn format_prompt(prompt: &Prompt, needs_instruction: bool) -> String {
    let body = rendered_examples(prompt).join("\n");
    if needs_instruction {
        format!("{}\n{}", prompt.instruction_text(), body)
    } else {
        body
    }
}

/// Prefix rendered model input with [`CLARIFYING_ASSERTION`] when enabled.
///
/// The preamble names no label, so label-row extraction is unaffected.
pub fn with_clarifying_assertion(text: String, enabled: bool) -> String {
    if enabled {
        format!("{CLARIFYING_ASSERTION}{text}")
    } else {
        text
    }
}

/// Split `text` before its last `n` characters.
fn split_tail(text: &str, n: usize) -> (&str, &str) {
    let cut = text
        .char_indices()
        .rev()
        .nth(n.saturating_sub(1))
        .map_or(0, |(i, _)| i);
    text.split_at(cut)
}

/// Fine-tuning pair: everything up to the query's answer, then the answer.
pub fn finetuning_pair(prompt: &Prompt, needs_instruction: bool) -> PromptCompletion {
    let full = format_prompt(prompt, needs_instruction);
    let (head, tail) = split_tail(&full, completion_len(prompt.format_type));
    PromptCompletion {
        prompt: head.to_string(),
        completion: tail.to_string(),
        salient_task: None,
    }
}

/// One prompt per prefix of the example list, each with its answer cut off.
///
/// Entry `i` holds examples `0..=i`; the instruction, when present, leads
/// every entry because it is attached to the first example.
pub fn cumulative_batch(prompt: &Prompt, needs_instruction: bool) -> CumulativeBatch {
    let n = completion_len(prompt.format_type);
    let mut batch = CumulativeBatch::default();
    let mut running = String::new();

    for (i, rendered) in rendered_examples(prompt).into_iter().enumerate() {
        if i == 0 {
            if needs_instruction {
                running.push_str(prompt.instruction_text());
                running.push('\n');
            }
        } else {
            running.push('\n');
        }
        running.push_str(&rendered);

        let (head, tail) = split_tail(&running, n);
        batch.prompts.push(head.to_string());
        batch.solutions.push(tail.to_string());
    }
    batch
}
