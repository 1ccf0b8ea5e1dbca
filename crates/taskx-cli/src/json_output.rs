//! JSON-lines output of task lifecycle events.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::Serialize;

use taskx_core::{Task, TaskResult};
use taskx_dispatch::{HookError, TaskHook};

static JSON_MODE_ENABLED: AtomicBool = AtomicBool::new(false);

pub fn enable_json_mode() {
    JSON_MODE_ENABLED.store(true, Ordering::SeqCst);
}

pub fn is_json_mode() -> bool {
    JSON_MODE_ENABLED.load(Ordering::SeqCst)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JsonEventType {
    CoordinatorStarted,
    TaskStarted,
    TaskCompleted,
    TaskFailed,
    TaskPanicked,
    CoordinatorStopped,
}

/// One line on stdout.
#[derive(Debug, Clone, Serialize)]
pub struct JsonEvent {
    pub event: JsonEventType,
    pub timestamp: String,
    pub data: serde_json::Value,
}

impl JsonEvent {
    pub fn new(event: JsonEventType, data: serde_json::Value) -> Self {
        Self {
            event,
            timestamp: chrono::Utc::now().to_rfc3339(),
            data,
        }
    }

    /// Write this event as a JSON line to stdout, if JSON mode is on.
    pub fn emit(&self) {
        if !is_json_mode() {
            return;
        }
        if let Ok(json) = serde_json::to_string(self) {
            let mut stdout = io::stdout().lock();
            let _ = writeln!(stdout, "{}", json);
            let _ = stdout.flush();
        }
    }
}

fn result_event(event: JsonEventType, task: &dyn Task, result: &TaskResult) -> JsonEvent {
    JsonEvent::new(
        event,
        serde_json::json!({
            "task_id": task.id(),
            "kind": task.kind(),
            "result": result,
        }),
    )
}

/// Hook that mirrors every lifecycle event to stdout.
pub struct JsonHook;

#[async_trait]
impl TaskHook for JsonHook {
    fn name(&self) -> &str {
        "json"
    }

    async fn on_task_start(&self, task: &dyn Task) -> Result<(), HookError> {
        JsonEvent::new(
            JsonEventType::TaskStarted,
            serde_json::json!({ "task_id": task.id(), "kind": task.kind() }),
        )
        .emit();
        Ok(())
    }

    async fn on_task_complete(
        &self,
        task: &dyn Task,
        result: &TaskResult,
    ) -> Result<(), HookError> {
        result_event(JsonEventType::TaskCompleted, task, result).emit();
        Ok(())
    }

    async fn on_task_fail(&self, task: &dyn Task, result: &TaskResult) -> Result<(), HookError> {
        result_event(JsonEventType::TaskFailed, task, result).emit();
        Ok(())
    }

    async fn on_task_panic(&self, task: &dyn Task, result: &TaskResult) -> Result<(), HookError> {
        result_event(JsonEventType::TaskPanicked, task, result).emit();
        Ok(())
    }
}
