//! Task configuration variants.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{TaskError, TaskId};

/// Configuration capability every task exposes.
///
/// Variants embed a [`BaseTaskConfig`]; the defaults read everything the
/// core needs from it, so a new variant only has to implement `base`.
pub trait TaskConfig: Send + Sync {
    /// Fields shared by every variant.
    fn base(&self) -> &BaseTaskConfig;

    /// Check the configuration before registration.
    fn validate(&self) -> Result<(), TaskError> {
        self.base().validate()
    }

    /// Deadline applied to one execution, `None` for no deadline.
    fn execution_timeout(&self) -> Option<Duration> {
        let timeout = self.base().timeout;
        (!timeout.is_zero()).then_some(timeout)
    }
}

/// Fields common to all task configurations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseTaskConfig {
    /// Task identifier (required).
    pub id: TaskId,

    /// Free-form description.
    #[serde(default)]
    pub description: String,

    /// Execution timeout. Zero disables the deadline.
    #[serde(default)]
    pub timeout: Duration,

    /// Declared retry budget. Not consulted by the dispatch core.
    #[serde(default)]
    pub retry_count: u32,

    /// Task tags.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl BaseTaskConfig {
    /// Create a configuration for `id` with no deadline.
    pub fn new(id: impl Into<TaskId>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Builder method to set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Builder method to set the execution timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Builder method to set the retry count.
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// Builder method to add a tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Only the id is checked.
    pub fn validate(&self) -> Result<(), TaskError> {
        if self.id.is_empty() {
            return Err(TaskError::InvalidConfig("task id is empty".to_string()));
        }
        Ok(())
    }
}

impl TaskConfig for BaseTaskConfig {
    fn base(&self) -> &BaseTaskConfig {
        self
    }
}

/// Configuration of a cron-triggered task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleTaskConfig {
    #[serde(flatten)]
    pub base: BaseTaskConfig,
    pub cron: String,
}

impl ScheduleTaskConfig {
    pub fn new(base: BaseTaskConfig, cron: impl Into<String>) -> Self {
        Self {
            base,
            cron: cron.into(),
        }
    }
}

impl TaskConfig for ScheduleTaskConfig {
    fn base(&self) -> &BaseTaskConfig {
        &self.base
    }
}

/// Configuration of a task re-run on a fixed interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinuousTaskConfig {
    #[serde(flatten)]
    pub base: BaseTaskConfig,
    pub interval: Duration,
}

impl ContinuousTaskConfig {
    pub fn new(base: BaseTaskConfig, interval: Duration) -> Self {
        Self { base, interval }
    }
}

impl TaskConfig for ContinuousTaskConfig {
    fn base(&self) -> &BaseTaskConfig {
        &self.base
    }
}

/// Configuration of a task run once at an absolute time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnceTaskConfig {
    #[serde(flatten)]
    pub base: BaseTaskConfig,
    pub execute_at: DateTime<Utc>,
}

impl OnceTaskConfig {
    pub fn new(base: BaseTaskConfig, execute_at: DateTime<Utc>) -> Self {
        Self { base, execute_at }
    }
}

impl TaskConfig for OnceTaskConfig {
    fn base(&self) -> &BaseTaskConfig {
        &self.base
    }
}
