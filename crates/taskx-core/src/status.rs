//! Task kind and status enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a task, as declared by its implementation.
///
/// The dispatch core treats every kind identically; the kind only tells
/// hooks and external schedulers how the task is meant to be triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    /// Triggered by a cron expression.
    Schedule,
    /// Re-run on a fixed interval.
    Continuous,
    /// Run once at an absolute time.
    Once,
}

/// Status of one task execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Queued, not yet picked up.
    #[default]
    Pending,
    /// Currently executing.
    Running,
    /// Execution finished without error.
    Completed,
    /// Lease, execution, deadline or panic failure.
    Failed,
    /// Reserved for deadline failures. Execution reports deadlines as
    /// `Failed` with a `TaskError::Timeout` error.
    Timeout,
}

impl TaskStatus {
    /// Returns true if the status is final for an execution attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Timeout)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Timeout => "TIMEOUT",
        };
        f.write_str(name)
    }
}
