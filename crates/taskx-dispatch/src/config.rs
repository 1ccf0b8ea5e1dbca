//! Dispatch configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use taskx_core::DEFAULT_NAMESPACE;

use crate::hooks::{HookErrorSink, HookSet, NoopHook, TaskHook, TracingSink};

/// Number of workers a coordinator runs by default.
pub const DEFAULT_WORKER_SIZE: usize = 4;
/// Concurrent executions per worker by default.
pub const DEFAULT_POOL_SIZE: usize = 10;
/// Upper bound for pool size and inbox capacity. Fits in a `u32` and
/// below `Semaphore::MAX_PERMITS` on every target.
pub const MAX_POOL_SIZE: usize = 1 << 20;
pub const DEFAULT_HEARTBEAT_TTL: Duration = Duration::from_secs(60);
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(300);
pub const DEFAULT_DISPATCH_INTERVAL: Duration = Duration::from_secs(1);
/// Declared for callers building retries on top; not consulted here.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(100);
/// Declared for callers building retries on top; not consulted here.
pub const DEFAULT_RETRY_COUNT: u32 = 3;

/// Coordinator and worker configuration.
#[derive(Clone)]
pub struct Config {
    /// Prefix of every store key.
    pub namespace: String,

    /// Number of workers started by the coordinator.
    pub worker_size: usize,

    /// Maximum concurrent executions per worker.
    pub pool_size: usize,

    /// Inbox capacity per worker. Defaults to the pool size.
    pub inbox_capacity: Option<usize>,

    /// Lifecycle hooks, invoked in order.
    pub hooks: Vec<Arc<dyn TaskHook>>,

    /// Receives aggregated hook failures.
    pub hook_sink: Arc<dyn HookErrorSink>,

    /// A worker whose heartbeat is older than this is not dispatched to.
    pub heartbeat_ttl: Duration,

    /// Interval between heartbeat writes.
    pub heartbeat_interval: Duration,

    /// Expiry of a task lease.
    pub lease_ttl: Duration,

    /// Interval between dispatch ticks.
    pub dispatch_interval: Duration,

    pub retry_delay: Duration,
    pub retry_count: u32,
}

impl Config {
    /// Builder method to set the namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Builder method to set the number of workers.
    pub fn with_worker_size(mut self, worker_size: usize) -> Self {
        self.worker_size = worker_size;
        self
    }

    /// Builder method to set the per-worker pool size.
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_inbox_capacity(mut self, capacity: usize) -> Self {
        self.inbox_capacity = Some(capacity);
        self
    }

    /// Builder method replacing the hook list.
    pub fn with_hooks(mut self, hooks: Vec<Arc<dyn TaskHook>>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_hook_sink(mut self, sink: Arc<dyn HookErrorSink>) -> Self {
        self.hook_sink = sink;
        self
    }

    pub fn with_heartbeat_ttl(mut self, ttl: Duration) -> Self {
        self.heartbeat_ttl = ttl;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    pub fn with_dispatch_interval(mut self, interval: Duration) -> Self {
        self.dispatch_interval = interval;
        self
    }

    /// Effective inbox capacity, clamped to `1..=MAX_POOL_SIZE`.
    pub fn inbox_capacity(&self) -> usize {
        self.inbox_capacity
            .unwrap_or(self.pool_size)
            .clamp(1, MAX_POOL_SIZE)
    }

    /// Effective pool size, clamped to `1..=MAX_POOL_SIZE`.
    pub fn effective_pool_size(&self) -> usize {
        self.pool_size.clamp(1, MAX_POOL_SIZE)
    }

    /// Hook set built from the configured hooks and sink.
    pub fn hook_set(&self) -> HookSet {
        HookSet::new(self.hooks.clone(), self.hook_sink.clone())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            worker_size: DEFAULT_WORKER_SIZE,
            pool_size: DEFAULT_POOL_SIZE,
            inbox_capacity: None,
            hooks: vec![Arc::new(NoopHook)],
            hook_sink: Arc::new(TracingSink),
            heartbeat_ttl: DEFAULT_HEARTBEAT_TTL,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            lease_ttl: DEFAULT_LEASE_TTL,
            dispatch_interval: DEFAULT_DISPATCH_INTERVAL,
            retry_delay: DEFAULT_RETRY_DELAY,
            retry_count: DEFAULT_RETRY_COUNT,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("namespace", &self.namespace)
            .field("worker_size", &self.worker_size)
            .field("pool_size", &self.pool_size)
            .field("inbox_capacity", &self.inbox_capacity())
            .field("hooks", &self.hook_set().names())
            .field("heartbeat_ttl", &self.heartbeat_ttl)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("lease_ttl", &self.lease_ttl)
            .field("dispatch_interval", &self.dispatch_interval)
            .finish()
    }
}
