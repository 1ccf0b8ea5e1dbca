//! Demo tasks exercising every execution outcome.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::info;

use taskx_core::{
    BaseTaskConfig, ExecutionContext, OnceTaskConfig, Task, TaskConfig, TaskError, TaskId,
    TaskResult, TaskType,
};
use taskx_dispatch::{HookError, TaskHook};

/// What a demo task does when run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemoBehavior {
    /// Sleep, then succeed. Returns early on shutdown.
    Work(Duration),
    Fail,
    Panic,
    /// Never finishes on its own; only the timeout ends it.
    Hang,
}

impl DemoBehavior {
    /// Behavior for the `n`th generated task.
    pub fn for_index(n: usize, work: Duration) -> Self {
        match n % 4 {
            0 | 1 => DemoBehavior::Work(work),
            2 => DemoBehavior::Fail,
            _ if n % 8 == 3 => DemoBehavior::Panic,
            _ => DemoBehavior::Hang,
        }
    }

    fn label(self) -> &'static str {
        match self {
            DemoBehavior::Work(_) => "work",
            DemoBehavior::Fail => "fail",
            DemoBehavior::Panic => "panic",
            DemoBehavior::Hang => "hang",
        }
    }
}

pub struct DemoTask {
    config: OnceTaskConfig,
    behavior: DemoBehavior,
}

impl DemoTask {
    pub fn new(n: usize, behavior: DemoBehavior, timeout: Duration) -> Self {
        let base = BaseTaskConfig::new(format!("demo-{}-{}", behavior.label(), n))
            .with_description(format!("demo task #{n}"))
            .with_timeout(timeout)
            .with_tag("demo")
            .with_tag(behavior.label());
        Self {
            config: OnceTaskConfig::new(base, chrono::Utc::now()),
            behavior,
        }
    }
}

#[async_trait]
impl Task for DemoTask {
    async fn execute(&self, ctx: ExecutionContext) -> Result<(), TaskError> {
        match self.behavior {
            DemoBehavior::Work(duration) => {
                tokio::select! {
                    _ = tokio::time::sleep(duration) => Ok(()),
                    _ = ctx.shutdown().cancelled() => {
                        Err(TaskError::execution("interrupted by shutdown"))
                    }
                }
            }
            DemoBehavior::Fail => Err(TaskError::execution(format!(
                "{} refused to run on {}",
                ctx.task_id(),
                ctx.worker_id()
            ))),
            DemoBehavior::Panic => panic!("{} blew up", ctx.task_id()),
            DemoBehavior::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }

    fn id(&self) -> &TaskId {
        &self.config.base().id
    }

    fn kind(&self) -> TaskType {
        TaskType::Once
    }

    fn config(&self) -> &dyn TaskConfig {
        &self.config
    }
}

/// Outcome counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub completed: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub panicked: usize,
}

impl Summary {
    pub fn finished(&self) -> usize {
        self.completed + self.failed + self.panicked
    }
}

/// Hook counting outcomes and waking waiters on each one.
#[derive(Default)]
pub struct SummaryHook {
    completed: AtomicUsize,
    failed: AtomicUsize,
    timed_out: AtomicUsize,
    panicked: AtomicUsize,
    changed: Notify,
}

impl SummaryHook {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn summary(&self) -> Summary {
        Summary {
            completed: self.completed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            timed_out: self.timed_out.load(Ordering::SeqCst),
            panicked: self.panicked.load(Ordering::SeqCst),
        }
    }

    /// Wait until at least `count` tasks have finished.
    pub async fn wait_for(&self, count: usize) {
        loop {
            let notified = self.changed.notified();
            if self.summary().finished() >= count {
                return;
            }
            notified.await;
        }
    }

    fn bump(&self, counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::SeqCst);
        self.changed.notify_waiters();
    }
}

#[async_trait]
impl TaskHook for SummaryHook {
    fn name(&self) -> &str {
        "summary"
    }

    async fn on_task_complete(
        &self,
        task: &dyn Task,
        result: &TaskResult,
    ) -> Result<(), HookError> {
        info!(task_id = %task.id(), duration_ms = result.duration.as_millis() as u64, "Completed");
        self.bump(&self.completed);
        Ok(())
    }

    async fn on_task_fail(&self, _task: &dyn Task, result: &TaskResult) -> Result<(), HookError> {
        if result.error.as_ref().is_some_and(TaskError::is_timeout) {
            self.timed_out.fetch_add(1, Ordering::SeqCst);
        }
        self.bump(&self.failed);
        Ok(())
    }

    async fn on_task_panic(&self, _task: &dyn Task, _result: &TaskResult) -> Result<(), HookError> {
        self.bump(&self.panicked);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_behavior_mix() {
        let work = Duration::from_millis(10);
        let mix: Vec<_> = (0..8).map(|n| DemoBehavior::for_index(n, work)).collect();
        assert_eq!(
            mix,
            vec![
                DemoBehavior::Work(work),
                DemoBehavior::Work(work),
                DemoBehavior::Fail,
                DemoBehavior::Panic,
                DemoBehavior::Work(work),
                DemoBehavior::Work(work),
                DemoBehavior::Fail,
                DemoBehavior::Hang,
            ]
        );
    }

    #[test]
    fn test_task_ids_are_unique_per_index() {
        let a = DemoTask::new(3, DemoBehavior::Panic, Duration::ZERO);
        let b = DemoTask::new(11, DemoBehavior::Panic, Duration::ZERO);
        assert_eq!(a.id().as_str(), "demo-panic-3");
        assert_ne!(a.id(), b.id());
        assert!(a.config().validate().is_ok());
        assert_eq!(a.config().base().tags, vec!["demo", "panic"]);
    }

    #[tokio::test]
    async fn test_summary_counts_outcomes() {
        let hook = SummaryHook::new();
        let task = DemoTask::new(0, DemoBehavior::Fail, Duration::ZERO);

        let mut ok = TaskResult::begin(task.id().clone());
        ok.complete();
        hook.on_task_complete(&task, &ok).await.unwrap();

        let mut timed_out = TaskResult::begin(task.id().clone());
        timed_out.fail(TaskError::Timeout(Duration::from_millis(5)));
        hook.on_task_fail(&task, &timed_out).await.unwrap();

        hook.wait_for(2).await;
        assert_eq!(
            hook.summary(),
            Summary {
                completed: 1,
                failed: 1,
                timed_out: 1,
                panicked: 0,
            }
        );
    }
}
