//! taskx Dispatch Runtime
//!
//! This crate runs tasks registered with a [`Coordinator`] across a fleet of
//! in-process [`Worker`]s:
//! - a shared queue of task ids in a [`Store`], drained by the dispatch loop
//! - per-task leases so each queued id executes at most once at a time
//! - worker heartbeats that gate dispatch
//! - lifecycle hooks with timeout and panic isolation

pub mod config;
pub mod coordinator;
pub mod hooks;
mod panic;
pub mod runtime;
pub mod store;
pub mod worker;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use config::Config;
pub use coordinator::{Coordinator, DispatchReport};
pub use hooks::{
    HookError, HookErrorSink, HookEvent, HookFailure, HookReport, HookSet, NoopHook, TaskHook,
    TracingSink,
};
pub use runtime::{StoreRuntime, WorkerRuntime};
pub use store::{MemoryStore, Store, StoreError};
#[cfg(feature = "redis")]
pub use store::RedisStore;
pub use worker::{DeliveryError, Worker};
