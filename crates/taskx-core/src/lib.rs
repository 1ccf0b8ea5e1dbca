//! taskx Core Domain Types
//!
//! This crate contains the passive domain types shared by the dispatch
//! runtime and by task implementations:
//! - Identifiers and the store key layout
//! - Task kinds, statuses and configuration variants
//! - The `Task` capability and its per-execution `TaskResult`
//!
//! Nothing here talks to a store or spawns work.

pub mod config;
pub mod error;
pub mod ids;
pub mod keys;
pub mod result;
pub mod status;
pub mod task;

// Re-export commonly used types
pub use config::{
    BaseTaskConfig, ContinuousTaskConfig, OnceTaskConfig, ScheduleTaskConfig, TaskConfig,
};
pub use error::TaskError;
pub use ids::{TaskId, WorkerId};
pub use keys::{KeyScheme, DEFAULT_NAMESPACE, KEY_SEPARATOR};
pub use result::TaskResult;
pub use status::{TaskStatus, TaskType};
pub use task::{ExecutionContext, Task};
