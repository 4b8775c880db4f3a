//! Units of background work and their results.

use std::fmt;

use crate::pipeline::{BatchOutcome, FileOutcome};

/// One schedulable unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    /// Process a single file record.
    Single { file_record_id: String },
    /// Process every record still pending for the owner and group,
    /// captured when the worker picks the task up.
    Batch {
        owner: String,
        logical_group: String,
    },
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::Single { file_record_id } => write!(f, "single({})", file_record_id),
            Task::Batch {
                owner,
                logical_group,
            } => write!(f, "batch({}/{})", owner, logical_group),
        }
    }
}

/// Terminal report for one executed task.
#[derive(Debug)]
pub struct TaskResult {
    pub task: Task,
    pub success: bool,
    pub detail: String,
}

impl TaskResult {
    pub fn from_file_outcome(task: Task, outcome: &FileOutcome) -> Self {
        let (success, detail) = match outcome {
            FileOutcome::Completed { output_record_id } => {
                (true, format!("completed, output {}", output_record_id))
            }
            FileOutcome::AlreadyDone => (true, "already done".to_string()),
            FileOutcome::Skipped => (true, "skipped".to_string()),
            FileOutcome::Failed { detail } => (false, detail.clone()),
            FileOutcome::Stalled => (false, "stalled awaiting storage".to_string()),
        };
        Self {
            task,
            success,
            detail,
        }
    }

    pub fn from_batch_outcome(task: Task, outcome: &BatchOutcome) -> Self {
        Self {
            task,
            success: true,
            detail: outcome.summary(),
        }
    }

    pub fn failure(task: Task, detail: String) -> Self {
        Self {
            task,
            success: false,
            detail,
        }
    }
}
