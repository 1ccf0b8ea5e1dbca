//! Lifecycle hooks.
//!
//! Hooks observe task executions. They are invoked sequentially, in
//! registration order, for each lifecycle event:
//!
//! ```text
//! lease acquired ──► on_task_start ──► execute ─┬─► on_task_complete
//!                                               ├─► on_task_fail
//!                                               └─► on_task_panic
//! ```
//!
//! ## Rules
//! - A failing hook never prevents the next hook from running
//! - Each hook call runs in its own panic-isolated scope
//! - Every failure of one event is collected into a [`HookReport`] and handed
//!   to the configured [`HookErrorSink`]
//!
//! **Warning**: `AssertUnwindSafe` is used, so a hook that panics while
//! holding a lock on shared state can leave that state inconsistent.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use thiserror::Error;
use tracing::warn;

use taskx_core::{Task, TaskId, TaskResult};

use crate::panic::panic_message;

/// Errors returned by hook implementations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HookError {
    /// The hook reported a failure.
    #[error("{0}")]
    Failed(String),

    /// The hook panicked.
    #[error("hook panicked: {0}")]
    Panicked(String),
}

impl HookError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Observer of task lifecycle events. Every method defaults to a no-op.
#[async_trait]
pub trait TaskHook: Send + Sync {
    /// Name used in hook failure reports.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// The task acquired its lease and is about to execute.
    async fn on_task_start(&self, _task: &dyn Task) -> Result<(), HookError> {
        Ok(())
    }

    async fn on_task_complete(
        &self,
        _task: &dyn Task,
        _result: &TaskResult,
    ) -> Result<(), HookError> {
        Ok(())
    }

    /// Execution returned an error or hit its deadline.
    async fn on_task_fail(&self, _task: &dyn Task, _result: &TaskResult) -> Result<(), HookError> {
        Ok(())
    }

    /// Execution panicked. Replaces the complete/fail notification.
    async fn on_task_panic(
        &self,
        _task: &dyn Task,
        _result: &TaskResult,
    ) -> Result<(), HookError> {
        Ok(())
    }
}

/// Hook that does nothing. The default hook list holds one.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHook;

#[async_trait]
impl TaskHook for NoopHook {
    fn name(&self) -> &str {
        "noop"
    }
}

/// Lifecycle event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    Start,
    Complete,
    Fail,
    Panic,
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Start => "on_task_start",
            Self::Complete => "on_task_complete",
            Self::Fail => "on_task_fail",
            Self::Panic => "on_task_panic",
        };
        f.write_str(name)
    }
}

/// One hook's failure for one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookFailure {
    pub hook: String,
    pub error: HookError,
}

/// Aggregated outcome of fanning one event out to every hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookReport {
    pub event: HookEvent,
    pub task_id: TaskId,
    pub invoked: usize,
    pub failures: Vec<HookFailure>,
}

impl HookReport {
    /// Returns true if every hook succeeded.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Receives reports that contain at least one hook failure.
pub trait HookErrorSink: Send + Sync {
    fn report(&self, report: &HookReport);
}

impl<F> HookErrorSink for F
where
    F: Fn(&HookReport) + Send + Sync,
{
    fn report(&self, report: &HookReport) {
        self(report)
    }
}

/// Default sink: one `warn!` line per failure.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl HookErrorSink for TracingSink {
    fn report(&self, report: &HookReport) {
        for failure in &report.failures {
            warn!(
                task_id = %report.task_id,
                event = %report.event,
                hook = %failure.hook,
                error = %failure.error,
                "Lifecycle hook failed"
            );
        }
    }
}

enum Notification<'a> {
    Start,
    Complete(&'a TaskResult),
    Fail(&'a TaskResult),
    Panic(&'a TaskResult),
}

impl Notification<'_> {
    fn event(&self) -> HookEvent {
        match self {
            Self::Start => HookEvent::Start,
            Self::Complete(_) => HookEvent::Complete,
            Self::Fail(_) => HookEvent::Fail,
            Self::Panic(_) => HookEvent::Panic,
        }
    }
}

/// Ordered hook list plus the sink its failures go to.
#[derive(Clone)]
pub struct HookSet {
    hooks: Vec<Arc<dyn TaskHook>>,
    sink: Arc<dyn HookErrorSink>,
}

impl HookSet {
    pub fn new(hooks: Vec<Arc<dyn TaskHook>>, sink: Arc<dyn HookErrorSink>) -> Self {
        Self { hooks, sink }
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Names of the hooks, in invocation order.
    pub fn names(&self) -> Vec<String> {
        self.hooks.iter().map(|h| h.name().to_string()).collect()
    }

    pub async fn task_started(&self, task: &dyn Task) -> HookReport {
        self.notify(task, Notification::Start).await
    }

    pub async fn task_completed(&self, task: &dyn Task, result: &TaskResult) -> HookReport {
        self.notify(task, Notification::Complete(result)).await
    }

    pub async fn task_failed(&self, task: &dyn Task, result: &TaskResult) -> HookReport {
        self.notify(task, Notification::Fail(result)).await
    }

    pub async fn task_panicked(&self, task: &dyn Task, result: &TaskResult) -> HookReport {
        self.notify(task, Notification::Panic(result)).await
    }

    async fn notify(&self, task: &dyn Task, notification: Notification<'_>) -> HookReport {
        let mut failures = Vec::new();

        for hook in &self.hooks {
            let call = match &notification {
                Notification::Start => hook.on_task_start(task),
                Notification::Complete(result) => hook.on_task_complete(task, result),
                Notification::Fail(result) => hook.on_task_fail(task, result),
                Notification::Panic(result) => hook.on_task_panic(task, result),
            };

            let error = match AssertUnwindSafe(call).catch_unwind().await {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err,
                Err(payload) => HookError::Panicked(panic_message(&*payload)),
            };
            failures.push(HookFailure {
                hook: hook.name().to_string(),
                error,
            });
        }

        let report = HookReport {
            event: notification.event(),
            task_id: task.id().clone(),
            invoked: self.hooks.len(),
            failures,
        };
        if !report.is_clean() {
            self.sink.report(&report);
        }
        report
    }
}

impl Default for HookSet {
    fn default() -> Self {
        Self::new(vec![Arc::new(NoopHook)], Arc::new(TracingSink))
    }
}

impl fmt::Debug for HookSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookSet")
            .field("hooks", &self.names())
            .finish()
    }
}
