//! Salience inference: which feature decided the query's label.
//!
//! Given two context examples and a query, the only evidence is which example
//! shares the query's observable label and whether it also shares the query's
//! task-A value. The rules are a fixed decision table; they are kept as a
//! literal `match` so each row can be checked against the table in the tests.

use serde::{Deserialize, Serialize};

use crate::construction::Axis;
use crate::example::Example;

/// `(axis, polarity)`: the feature that determines the label, and which value
/// of it maps to `X`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SalientTaskKey {
    pub axis: Axis,
    pub polarity: bool,
}

impl SalientTaskKey {
    pub fn new(axis: Axis, polarity: bool) -> Self {
        Self { axis, polarity }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SalienceError {
    #[error("salience inference needs two examples and a query, got {0} examples")]
    TooFewExamples(usize),
    #[error("no query example to key on")]
    NoQuery,
}

/// Infer the salient key from `[first, second, query, ..]`.
///
/// Only the first three examples are consulted, matching the two-set layout
/// where the query sits at index 2.
pub fn obtain_salient_task_key(examples: &[Example]) -> Result<SalientTaskKey, SalienceError> {
    let [first, second, query, ..] = examples else {
        return Err(SalienceError::TooFewExamples(examples.len()));
    };
    Ok(infer(first, second, query))
}

/// Decision table over `(query.active, same_task_a, query.task_a, query.task_b)`.
///
/// `same_task_a` compares the query with the "salient example": the first
/// example when it shares the query's observable label (first wins ties),
/// otherwise the second.
pub fn infer(first: &Example, second: &Example, query: &Example) -> SalientTaskKey {
    let salient_example = if query.active_task_label == first.active_task_label {
        first
    } else {
        second
    };
    let same_task_a = query.task_a_label == salient_example.task_a_label;

    let (axis, polarity) = match (
        query.active_task_label,
        same_task_a,
        query.task_a_label,
        query.task_b_label,
    ) {
        (true, true, true, _) => (Axis::TaskA, true),
        (true, true, false, _) => (Axis::TaskA, false),
        (true, false, _, true) => (Axis::TaskB, true),
        (true, false, _, false) => (Axis::TaskB, false),
        (false, true, true, _) => (Axis::TaskA, false),
        (false, true, false, _) => (Axis::TaskA, true),
        (false, false, _, true) => (Axis::TaskB, false),
        (false, false, _, false) => (Axis::TaskB, true),
    };
    SalientTaskKey::new(axis, polarity)
}

/// Key for an explicitly named axis: the query's label on that axis, negated
/// when the query's observable label is false.
pub fn create_salient_task_key(
    examples: &[Example],
    axis: Axis,
) -> Result<SalientTaskKey, SalienceError> {
    let query = examples.last().ok_or(SalienceError::NoQuery)?;
    let label = match axis {
        Axis::TaskA => query.task_a_label,
        Axis::TaskB => query.task_b_label,
    };
    let polarity = if query.active_task_label { label } else { !label };
    Ok(SalientTaskKey::new(axis, polarity))
}
