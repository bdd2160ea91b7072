//! Natural-language instructions derived from a salient key.

use serde::Serialize;

use crate::construction::{Axis, ConstructionType, FeatureTask};
use crate::example::Example;
use crate::salience::SalientTaskKey;

pub const UNINFORMATIVE_INSTRUCTION: &str =
    "Output 'X' if the sentence contains a [category withheld] and 'Y' otherwise.";

pub const CLARIFYING_ASSERTION: &str =
    "Ask a clarifying question if you are unsure what to output in the following task.\nTask:\n";

/// A rendered instruction and the key it was rendered from.
///
/// `key` is `None` for the uninformative instruction, which withholds the
/// feature entirely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Instruction {
    pub text: String,
    pub key: Option<SalientTaskKey>,
}

impl Instruction {
    pub fn informative(construction_type: ConstructionType, key: SalientTaskKey) -> Self {
        Self {
            text: render(construction_type, key),
            key: Some(key),
        }
    }

    pub fn uninformative() -> Self {
        Self {
            text: UNINFORMATIVE_INSTRUCTION.to_string(),
            key: None,
        }
    }
}

/// Feature description for each `(family, axis, polarity)`.
fn describe(construction_type: ConstructionType, key: SalientTaskKey) -> &'static str {
    use Axis::{TaskA, TaskB};
    use ConstructionType::*;

    match (construction_type, key.axis, key.polarity) {
        (SubjectLocation, TaskA, true) => "a human",
        (SubjectLocation, TaskA, false) => "an animal",
        (SubjectLocation, TaskB, true) => "an indoor setting",
        (SubjectLocation, TaskB, false) => "an outdoor setting",
        (ReligiousPronoun, TaskA, true) => "contains a reference to a religious leader",
        (ReligiousPronoun, TaskA, false) => "does not contain a reference to a religious leader",
        (ReligiousPronoun, TaskB, true) => "contains a male pronoun",
        (ReligiousPronoun, TaskB, false) => "contains a female pronoun",
        (PropnNegation, TaskA, true) => "contains a proper noun",
        (PropnNegation, TaskA, false) => "does not contain a proper noun",
        (PropnNegation, TaskB, true) => "does not contain a negation",
        (PropnNegation, TaskB, false) => "contains a negation",
    }
}

pub fn render(construction_type: ConstructionType, key: SalientTaskKey) -> String {
    let feature = describe(construction_type, key);
    match construction_type {
        ConstructionType::SubjectLocation => format!(
            "Output 'X' if the sentence contains a reference to {feature} and 'Y' otherwise."
        ),
        ConstructionType::ReligiousPronoun | ConstructionType::PropnNegation => {
            format!("Output 'X' if the sentence {feature} and 'Y' otherwise.")
        }
    }
}

/// Write the task named by `key.axis` onto every example; returns that task.
pub fn assign_salient_task(
    construction_type: ConstructionType,
    key: SalientTaskKey,
    examples: &mut [Example],
) -> FeatureTask {
    let task = construction_type.task(key.axis);
    for example in examples.iter_mut() {
        example.salient_task = Some(task);
    }
    task
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::construction::FormatType;

    #[test]
    fn subject_location_wording() {
        let text = render(
            ConstructionType::SubjectLocation,
            SalientTaskKey::new(Axis::TaskB, false),
        );
        assert_eq!(
            text,
            "Output 'X' if the sentence contains a reference to an outdoor setting and 'Y' otherwise."
        );
    }

    #[test]
    fn embedded_families_use_bare_template() {
        assert_eq!(
            render(
                ConstructionType::PropnNegation,
                SalientTaskKey::new(Axis::TaskB, true)
            ),
            "Output 'X' if the sentence does not contain a negation and 'Y' otherwise."
        );
        assert_eq!(
            render(
                ConstructionType::ReligiousPronoun,
                SalientTaskKey::new(Axis::TaskA, false)
            ),
            "Output 'X' if the sentence does not contain a reference to a religious leader and 'Y' otherwise."
        );
    }

    #[test]
    fn uninformative_ignores_key() {
        let ins = Instruction::uninformative();
        assert_eq!(ins.text, UNINFORMATIVE_INSTRUCTION);
        assert!(ins.key.is_none());
    }

    #[test]
    fn assignment_writes_every_example() {
        let mut examples = vec![
            Example {
                construction_type: ConstructionType::ReligiousPronoun,
                salient_task: None,
                format_type: FormatType::Qa,
                construction: "He is in the museum with the pope.".into(),
                task_a_label: true,
                task_b_label: true,
                active_task_label: true,
            };
            3
        ];
        let task = assign_salient_task(
            ConstructionType::ReligiousPronoun,
            SalientTaskKey::new(Axis::TaskB, true),
            &mut examples,
        );
        assert_eq!(task, FeatureTask::Pronoun);
        assert!(examples
            .iter()
            .all(|e| e.salient_task == Some(FeatureTask::Pronoun)));
    }
}
