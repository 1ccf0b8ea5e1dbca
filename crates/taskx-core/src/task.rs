//! The task capability.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{TaskConfig, TaskError, TaskId, TaskType, WorkerId};

/// A unit of business logic the dispatch core can execute.
///
/// Tasks are registered in memory on every coordinator instance; only their
/// ids travel through the shared queue.
#[async_trait]
pub trait Task: Send + Sync {
    /// Run the task once.
    async fn execute(&self, ctx: ExecutionContext) -> Result<(), TaskError>;

    /// Registry key and queue value of this task.
    fn id(&self) -> &TaskId;

    fn kind(&self) -> TaskType;

    fn config(&self) -> &dyn TaskConfig;
}

/// Per-execution context handed to [`Task::execute`].
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    task_id: TaskId,
    worker_id: WorkerId,
    timeout: Option<Duration>,
    shutdown: CancellationToken,
}

impl ExecutionContext {
    pub fn new(
        task_id: TaskId,
        worker_id: WorkerId,
        timeout: Option<Duration>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            task_id,
            worker_id,
            timeout,
            shutdown,
        }
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// Worker executing this attempt.
    pub fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    /// Deadline the worker enforces on this execution.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Fires when the owning coordinator or worker shuts down.
    ///
    /// Shutdown never interrupts an execution on its own; long-running tasks
    /// can select on this token to wind down early.
    pub fn shutdown(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Returns true once shutdown has been requested.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
