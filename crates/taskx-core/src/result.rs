//! Per-execution result record.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use crate::{TaskError, TaskId, TaskStatus};

/// Outcome of one execution attempt.
///
/// Created when the attempt starts, owned by the executing worker, handed to
/// lifecycle hooks by reference and then dropped. The core never stores it.
#[derive(Debug, Clone, Serialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub start_time: DateTime<Utc>,
    /// Set when the attempt is finalized.
    pub end_time: Option<DateTime<Utc>>,
    pub duration: Duration,
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<TaskError>,
    /// Payload of a panic raised by the task.
    pub panic_info: Option<String>,
    /// Backtrace captured when a panic was recovered.
    pub stack_trace: Option<String>,
}

impl TaskResult {
    /// Start a new attempt record at the current time.
    pub fn begin(task_id: TaskId) -> Self {
        Self {
            task_id,
            status: TaskStatus::Pending,
            start_time: Utc::now(),
            end_time: None,
            duration: Duration::ZERO,
            error: None,
            panic_info: None,
            stack_trace: None,
        }
    }

    /// Mark the attempt as completed.
    pub fn complete(&mut self) {
        self.status = TaskStatus::Completed;
        self.error = None;
    }

    /// Mark the attempt as failed with `error`.
    pub fn fail(&mut self, error: TaskError) {
        self.status = TaskStatus::Failed;
        self.error = Some(error);
    }

    /// Mark the attempt as failed by a panic.
    pub fn record_panic(&mut self, panic_info: String, stack_trace: String) {
        self.status = TaskStatus::Failed;
        self.panic_info = Some(panic_info);
        self.stack_trace = Some(stack_trace);
    }

    /// Stamp the end time and duration.
    pub fn finish(&mut self) {
        let end = Utc::now();
        self.duration = (end - self.start_time).to_std().unwrap_or_default();
        self.end_time = Some(end);
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Completed
    }

    pub fn is_panic(&self) -> bool {
        self.panic_info.is_some()
    }
}

fn serialize_error<S>(error: &Option<TaskError>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match error {
        Some(err) => serializer.serialize_some(&err.to_string()),
        None => serializer.serialize_none(),
    }
}
