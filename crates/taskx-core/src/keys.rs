//! Store key layout.
//!
//! Every key the dispatch core touches is `{namespace}:{part}:{part}...`.
//! The namespace isolates coordinators sharing one store.

use crate::{TaskId, WorkerId};

/// Namespace used when none is configured.
pub const DEFAULT_NAMESPACE: &str = "taskx";

/// Separator between key segments.
pub const KEY_SEPARATOR: &str = ":";

/// Builds namespaced store keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyScheme {
    namespace: String,
}

impl KeyScheme {
    /// Create a scheme for `namespace`; an empty namespace falls back to
    /// [`DEFAULT_NAMESPACE`].
    pub fn new(namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        let namespace = if namespace.is_empty() {
            DEFAULT_NAMESPACE.to_string()
        } else {
            namespace
        };
        Self { namespace }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Join the namespace and `parts` with [`KEY_SEPARATOR`].
    pub fn build_key(&self, parts: &[&str]) -> String {
        let mut key = self.namespace.clone();
        for part in parts {
            key.push_str(KEY_SEPARATOR);
            key.push_str(part);
        }
        key
    }

    /// Lease key guarding execution of one task.
    pub fn task_lock_key(&self, task_id: &TaskId) -> String {
        self.build_key(&["locks", "tasks", task_id.as_str()])
    }

    /// Liveness key renewed by a worker's heartbeat loop.
    pub fn worker_heartbeat_key(&self, worker_id: &WorkerId) -> String {
        self.build_key(&["workers", "heartbeat", worker_id.as_str()])
    }

    /// The shared queue of task ids.
    pub fn task_queue_key(&self) -> String {
        self.build_key(&["queues", "tasks"])
    }

    /// Status key for external producers and consumers; the dispatch core
    /// never reads or writes it.
    pub fn task_status_key(&self, task_id: &TaskId) -> String {
        self.build_key(&["status", "tasks", task_id.as_str()])
    }
}

impl Default for KeyScheme {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}
