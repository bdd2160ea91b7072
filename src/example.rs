//! A single generated construction plus its feature labels.

use serde::{Deserialize, Serialize};

use crate::construction::{ConstructionType, FeatureTask, FormatType};

/// One sentence with the ground truth for both confounded features.
///
/// `active_task_label` is the label the model actually sees (rendered as
/// `X`/`Y`). `salient_task` is unset at creation and back-filled once per
/// prompt so every example in a prompt carries the same value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Example {
    pub construction_type: ConstructionType,
    pub salient_task: Option<FeatureTask>,
    pub format_type: FormatType,
    pub construction: String,
    pub task_a_label: bool,
    pub task_b_label: bool,
    pub active_task_label: bool,
}

impl Example {
    /// The boolean triple `(task_a, task_b, active)`.
    pub fn labels(&self) -> (bool, bool, bool) {
        (self.task_a_label, self.task_b_label, self.active_task_label)
    }

    /// The observable label as shown to the model.
    pub fn answer(&self) -> &'static str {
        if self.active_task_label {
            "X"
        } else {
            "Y"
        }
    }
}
