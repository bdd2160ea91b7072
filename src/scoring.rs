//! Scoring: echoed token logprobs to per-example label probabilities.
//!
//! Only the `X`/`Y` label tokens matter. Each one is turned into a
//! percentage, checked for accuracy against the arg-max of its top-k
//! alternatives, and joined back to the example it labels.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::construction::{ConstructionType, FeatureTask, FormatType};
use crate::example::Example;
use crate::gateway::TokenLogprob;

const LABELS: [&str; 2] = ["X", "Y"];

/// Rows of label tokens that belong to the instruction line, which names both labels.
const INSTRUCTION_LABEL_ROWS: usize = 2;

// =============================================================================
// Rows
// =============================================================================

/// One label token from a scored prompt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredRow {
    /// Token text as echoed by the provider (may carry a leading space).
    pub token: String,
    /// Probability of the token, in percent.
    pub percent: f64,
    /// Top alternatives in percent, with spaced label variants folded in.
    pub top_k: BTreeMap<String, f64>,
    pub accurate: bool,
    /// 1-based position among the prompt's label rows.
    pub example_number: usize,
}

/// Strip spaces, then single quotes, from both ends.
fn normalize_token(token: &str) -> &str {
    token.trim_matches(' ').trim_matches('\'')
}

pub fn is_label_token(token: &str) -> bool {
    LABELS.contains(&normalize_token(token))
}

pub fn logprob_to_percent(logprob: f64) -> f64 {
    100.0 * logprob.exp()
}

/// Fold spaced label variants (`" X"`, `"X "`) into the bare labels.
///
/// Keys other than the bare labels are de-spaced; if that yields a bare label,
/// its value is added onto the bare entry. `" X"` and `" Y"` are then dropped.
/// Input order is kept, with a newly created bare label appended at the end.
pub fn combine_keys(top_k: &[(String, f64)]) -> Vec<(String, f64)> {
    let mut spaced: BTreeMap<String, f64> = BTreeMap::new();
    for (key, value) in top_k {
        if LABELS.contains(&key.as_str()) {
            continue;
        }
        spaced.insert(key.replace(' ', ""), *value);
    }

    let mut folded: Vec<(String, f64)> = top_k.to_vec();
    for label in LABELS {
        let Some(extra) = spaced.get(label) else {
            continue;
        };
        match folded.iter_mut().find(|(k, _)| k == label) {
            Some((_, v)) => *v += extra,
            None => folded.push((label.to_string(), *extra)),
        }
    }
    folded.retain(|(k, _)| k != " X" && k != " Y");
    folded
}

/// First key with the highest value.
fn arg_max(entries: &[(String, f64)]) -> Option<&str> {
    let mut best: Option<&(String, f64)> = None;
    for entry in entries {
        if best.map_or(true, |b| entry.1 > b.1) {
            best = Some(entry);
        }
    }
    best.map(|(k, _)| k.as_str())
}

// =============================================================================
// Accumulator
// =============================================================================

/// Per-run scoring history. Owned by the caller and only ever appended to.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScoreAccumulator {
    accuracies: Vec<u8>,
    top_k_history: Vec<BTreeMap<String, f64>>,
}

impl ScoreAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 1 for each accurate row, 0 otherwise, in scoring order.
    pub fn accuracies(&self) -> &[u8] {
        &self.accuracies
    }

    pub fn top_k_history(&self) -> &[BTreeMap<String, f64>] {
        &self.top_k_history
    }

    pub fn len(&self) -> usize {
        self.accuracies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accuracies.is_empty()
    }

    pub fn mean_accuracy(&self) -> Option<f64> {
        if self.accuracies.is_empty() {
            return None;
        }
        let hits: u64 = self.accuracies.iter().map(|&a| a as u64).sum();
        Some(hits as f64 / self.accuracies.len() as f64)
    }

    fn record(&mut self, row: &ScoredRow) {
        self.accuracies.push(row.accurate as u8);
        self.top_k_history.push(row.top_k.clone());
    }
}

/// Extract and score the label rows of one echoed prompt.
///
/// With an instruction in the prompt, the first two label rows come from the
/// instruction text and are dropped.
pub fn label_rows(
    tokens: &[TokenLogprob],
    instruction_included: bool,
    accumulator: &mut ScoreAccumulator,
) -> Vec<ScoredRow> {
    let skip = if instruction_included {
        INSTRUCTION_LABEL_ROWS
    } else {
        0
    };

    tokens
        .iter()
        .filter(|t| is_label_token(&t.token))
        .skip(skip)
        .enumerate()
        .map(|(i, t)| {
            let top_k: Vec<(String, f64)> = t
                .top_alternatives
                .iter()
                .map(|alt| (alt.token.clone(), logprob_to_percent(alt.logprob)))
                .collect();
            let folded = combine_keys(&top_k);

            let label = t.token.trim();
            let accurate = arg_max(&folded) == Some(label);
            let percent = folded
                .iter()
                .find(|(k, _)| k == label)
                .map_or_else(|| logprob_to_percent(t.logprob), |(_, v)| *v);

            let row = ScoredRow {
                token: t.token.clone(),
                percent,
                top_k: folded.into_iter().collect(),
                accurate,
                example_number: i + 1,
            };
            accumulator.record(&row);
            row
        })
        .collect()
}

// =============================================================================
// Join
// =============================================================================

/// An example together with the score of its label token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub construction_type: ConstructionType,
    pub salient_task: Option<FeatureTask>,
    pub format_type: FormatType,
    pub construction: String,
    pub task_a_label: bool,
    pub task_b_label: bool,
    pub active_task_label: bool,
    pub token: String,
    pub percent: f64,
    pub top_k: BTreeMap<String, f64>,
    pub accurate: bool,
    pub example_number: usize,
}

/// Inner join by position; surplus on either side is dropped.
pub fn join_results(examples: &[Example], scored: &[ScoredRow]) -> Vec<ResultRow> {
    examples
        .iter()
        .zip(scored)
        .map(|(e, s)| ResultRow {
            construction_type: e.construction_type,
            salient_task: e.salient_task,
            format_type: e.format_type,
            construction: e.construction.clone(),
            task_a_label: e.task_a_label,
            task_b_label: e.task_b_label,
            active_task_label: e.active_task_label,
            token: s.token.clone(),
            percent: s.percent,
            top_k: s.top_k.clone(),
            accurate: s.accurate,
            example_number: s.example_number,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::TokenAlternative;

    fn tok(token: &str, logprob: f64, alts: &[(&str, f64)]) -> TokenLogprob {
        TokenLogprob {
            token: token.to_string(),
            logprob,
            top_alternatives: alts
                .iter()
                .map(|(t, l)| TokenAlternative {
                    token: t.to_string(),
                    logprob: *l,
                })
                .collect(),
        }
    }

    fn pairs(entries: &[(&str, f64)]) -> Vec<(String, f64)> {
        entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn label_tokens_are_trimmed_of_spaces_and_quotes() {
        assert!(is_label_token("X"));
        assert!(is_label_token(" Y"));
        assert!(is_label_token("'X'"));
        assert!(is_label_token(" 'Y"));
        assert!(!is_label_token("XY"));
        assert!(!is_label_token(">"));
    }

    #[test]
    fn combine_keys_folds_spaced_variants() {
        let folded = combine_keys(&pairs(&[("X", 40.0), (" X", 10.0), ("Y", 30.0), (" Y", 5.0)]));
        assert_eq!(folded, pairs(&[("X", 50.0), ("Y", 35.0)]));
    }

    #[test]
    fn combine_keys_creates_missing_bare_label() {
        let folded = combine_keys(&pairs(&[(" X", 60.0), ("Y", 30.0)]));
        assert_eq!(folded, pairs(&[("Y", 30.0), ("X", 60.0)]));
    }

    #[test]
    fn combine_keys_leaves_unrelated_keys() {
        let folded = combine_keys(&pairs(&[("Z", 70.0), ("X", 20.0)]));
        assert_eq!(folded, pairs(&[("Z", 70.0), ("X", 20.0)]));
    }

    #[test]
    fn instruction_rows_are_dropped() {
        let tokens = vec![
            tok("Output", -1.0, &[]),
            tok(" 'X'", -3.0, &[]),
            tok(" 'Y'", -3.0, &[]),
            tok(" critic", -2.0, &[]),
            tok("X", -0.2, &[("X", -0.2), ("Y", -2.0)]),
        ];
        let mut acc = ScoreAccumulator::new();
        let rows = label_rows(&tokens, true, &mut acc);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].example_number, 1);
        assert!(rows[0].accurate);
        assert_eq!(acc.accuracies(), &[1]);

        let mut acc = ScoreAccumulator::new();
        assert_eq!(label_rows(&tokens, false, &mut acc).len(), 3);
    }

    #[test]
    fn accuracy_uses_folded_arg_max() {
        // Bare Y leads, but X plus " X" overtakes it.
        let tokens = vec![tok(
            " X",
            -1.5,
            &[("Y", (0.40f64).ln()), ("X", (0.25f64).ln()), (" X", (0.20f64).ln())],
        )];
        let mut acc = ScoreAccumulator::new();
        let rows = label_rows(&tokens, false, &mut acc);
        assert!(rows[0].accurate);
        assert!((rows[0].percent - 45.0).abs() < 1e-9);
        assert!(!rows[0].top_k.contains_key(" X"));
    }

    #[test]
    fn ties_go_to_the_first_listed_alternative() {
        let mut acc = ScoreAccumulator::new();
        let y_first = vec![tok("Y", -0.7, &[("Y", -0.7), ("X", -0.7)])];
        assert!(label_rows(&y_first, false, &mut acc)[0].accurate);

        let x_first = vec![tok("Y", -0.7, &[("X", -0.7), ("Y", -0.7)])];
        assert!(!label_rows(&x_first, false, &mut acc)[0].accurate);
    }

    #[test]
    fn percent_falls_back_to_token_logprob() {
        let tokens = vec![tok("Y", (0.3f64).ln(), &[("Z", (0.5f64).ln())])];
        let mut acc = ScoreAccumulator::new();
        let rows = label_rows(&tokens, false, &mut acc);
        assert!((rows[0].percent - 30.0).abs() < 1e-9);
        assert!(!rows[0].accurate);
        assert_eq!(acc.mean_accuracy(), Some(0.0));
    }

    #[test]
    fn neg_infinity_logprob_is_zero_percent() {
        assert_eq!(logprob_to_percent(f64::NEG_INFINITY), 0.0);
    }

    #[test]
    fn accumulator_grows_across_prompts() {
        let tokens = vec![
            tok("X", -0.1, &[("X", -0.1)]),
            tok("Y", -0.1, &[("X", -0.1)]),
        ];
        let mut acc = ScoreAccumulator::new();
        label_rows(&tokens, false, &mut acc);
        label_rows(&tokens, false, &mut acc);
        assert_eq!(acc.accuracies(), &[1, 0, 1, 0]);
        assert_eq!(acc.top_k_history().len(), 4);
        assert_eq!(acc.mean_accuracy(), Some(0.5));
    }

    #[test]
    fn join_is_positional_inner() {
        let example = Example {
            construction_type: ConstructionType::PropnNegation,
            salient_task: Some(FeatureTask::Negation),
            format_type: FormatType::Arrow,
            construction: "Noam Chomsky was not in the theatre.".into(),
            task_a_label: true,
            task_b_label: false,
            active_task_label: true,
        };
        let examples = vec![example.clone(), example];
        let mut acc = ScoreAccumulator::new();
        let scored = label_rows(&[tok("X", -0.1, &[("X", -0.1)])], false, &mut acc);

        let joined = join_results(&examples, &scored);
        assert_eq!(joined.len(), 1);
        assert_eq!(joined[0].salient_task, Some(FeatureTask::Negation));
        assert_eq!(joined[0].example_number, 1);
    }
}
