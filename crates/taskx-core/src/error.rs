//! Core domain errors.

use std::time::Duration;

use thiserror::Error;

use crate::TaskId;

/// Errors raised by task configuration, dispatch and execution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// Task not found in the registry.
    #[error("Task not found: {0}")]
    NotFound(TaskId),

    /// The cluster-wide lease for the task could not be acquired.
    #[error("Failed to acquire task lock: {0}")]
    LockFailed(TaskId),

    /// Execution exceeded the configured timeout.
    #[error("Task execution timeout after {0:?}")]
    Timeout(Duration),

    /// Task configuration failed validation.
    #[error("Invalid task configuration: {0}")]
    InvalidConfig(String),

    /// Worker has been stopped.
    #[error("Worker has been stopped")]
    WorkerStopped,

    /// Coordinator has been stopped.
    #[error("Coordinator has been stopped")]
    CoordinatorStopped,

    /// Error returned by a task's own business logic.
    #[error("Task execution failed: {0}")]
    Execution(String),

    /// Error reported by the shared store.
    #[error("Store error: {0}")]
    Store(String),
}

impl TaskError {
    /// Shorthand for task implementations reporting a failure.
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(message.into())
    }

    /// Returns true if this error came from a deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}
