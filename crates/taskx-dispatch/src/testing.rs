//! Test doubles shared by the unit tests of this crate.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use taskx_core::{
    BaseTaskConfig, ExecutionContext, Task, TaskConfig, TaskError, TaskId, TaskResult, TaskType,
};

use crate::hooks::{HookError, HookEvent, TaskHook};

/// What a [`TestTask`] does when executed.
#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed,
    Fail(String),
    Sleep(Duration),
    Panic(String),
}

pub struct TestTask {
    config: BaseTaskConfig,
    behavior: Behavior,
    runs: AtomicUsize,
}

impl TestTask {
    pub fn new(config: BaseTaskConfig, behavior: Behavior) -> Self {
        Self {
            config,
            behavior,
            runs: AtomicUsize::new(0),
        }
    }

    pub fn ok(id: &str) -> Self {
        Self::new(BaseTaskConfig::new(id), Behavior::Succeed)
    }

    pub fn failing(id: &str, message: &str) -> Self {
        Self::new(BaseTaskConfig::new(id), Behavior::Fail(message.to_string()))
    }

    pub fn sleeping(id: &str, duration: Duration) -> Self {
        Self::new(BaseTaskConfig::new(id), Behavior::Sleep(duration))
    }

    pub fn panicking(id: &str, message: &str) -> Self {
        Self::new(BaseTaskConfig::new(id), Behavior::Panic(message.to_string()))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Number of times `execute` was entered.
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Task for TestTask {
    async fn execute(&self, _ctx: ExecutionContext) -> Result<(), TaskError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Behavior::Succeed => Ok(()),
            Behavior::Fail(message) => Err(TaskError::execution(message.clone())),
            Behavior::Sleep(duration) => {
                tokio::time::sleep(*duration).await;
                Ok(())
            }
            Behavior::Panic(message) => panic!("{}", message),
        }
    }

    fn id(&self) -> &TaskId {
        &self.config.id
    }

    fn kind(&self) -> TaskType {
        TaskType::Once
    }

    fn config(&self) -> &dyn TaskConfig {
        &self.config
    }
}

pub type Recorded = (HookEvent, TaskId, Option<TaskResult>);

/// Hook forwarding every event to a channel.
pub struct RecordingHook {
    tx: mpsc::UnboundedSender<Recorded>,
}

impl RecordingHook {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Recorded>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn record(&self, event: HookEvent, task: &dyn Task, result: Option<&TaskResult>) {
        let _ = self.tx.send((event, task.id().clone(), result.cloned()));
    }
}

#[async_trait]
impl TaskHook for RecordingHook {
    fn name(&self) -> &str {
        "recording"
    }

    async fn on_task_start(&self, task: &dyn Task) -> Result<(), HookError> {
        self.record(HookEvent::Start, task, None);
        Ok(())
    }

    async fn on_task_complete(
        &self,
        task: &dyn Task,
        result: &TaskResult,
    ) -> Result<(), HookError> {
        self.record(HookEvent::Complete, task, Some(result));
        Ok(())
    }

    async fn on_task_fail(&self, task: &dyn Task, result: &TaskResult) -> Result<(), HookError> {
        self.record(HookEvent::Fail, task, Some(result));
        Ok(())
    }

    async fn on_task_panic(&self, task: &dyn Task, result: &TaskResult) -> Result<(), HookError> {
        self.record(HookEvent::Panic, task, Some(result));
        Ok(())
    }
}

/// Wait for the next recorded event, failing the test after a few seconds.
pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<Recorded>) -> Recorded {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for hook event")
        .expect("hook channel closed")
}
