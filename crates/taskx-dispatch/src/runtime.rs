//! Capabilities a worker needs from its host.
//!
//! Workers never hold a reference to the coordinator. Everything they need
//! (leases, heartbeats, hooks) is reached through [`WorkerRuntime`], which the
//! coordinator implements on top of a [`Store`] with [`StoreRuntime`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use taskx_core::{KeyScheme, TaskId, WorkerId};

use crate::config::Config;
use crate::hooks::HookSet;
use crate::store::{Store, StoreError};

#[async_trait]
pub trait WorkerRuntime: Send + Sync {
    /// Try to take the exclusive lease on a task. Returns `false` when
    /// another holder already owns it.
    async fn acquire_lease(&self, task_id: &TaskId, token: &str) -> Result<bool, StoreError>;

    /// Release a lease, but only if `token` still owns it.
    async fn release_lease(&self, task_id: &TaskId, token: &str) -> Result<bool, StoreError>;

    /// Record that the worker is alive.
    async fn heartbeat(&self, worker_id: &WorkerId) -> Result<(), StoreError>;

    /// Remove the worker's liveness record.
    async fn clear_heartbeat(&self, worker_id: &WorkerId) -> Result<(), StoreError>;

    fn hooks(&self) -> &HookSet;

    fn heartbeat_interval(&self) -> Duration;
}

/// [`WorkerRuntime`] backed by the shared store.
pub struct StoreRuntime {
    store: Arc<dyn Store>,
    keys: KeyScheme,
    hooks: HookSet,
    lease_ttl: Duration,
    heartbeat_ttl: Duration,
    heartbeat_interval: Duration,
}

impl StoreRuntime {
    pub fn new(store: Arc<dyn Store>, config: &Config) -> Self {
        Self {
            store,
            keys: KeyScheme::new(config.namespace.clone()),
            hooks: config.hook_set(),
            lease_ttl: config.lease_ttl,
            heartbeat_ttl: config.heartbeat_ttl,
            heartbeat_interval: config.heartbeat_interval,
        }
    }

    pub fn keys(&self) -> &KeyScheme {
        &self.keys
    }

    /// Unix timestamp (seconds) of the worker's last heartbeat, if any.
    /// Unparseable values are treated as missing.
    pub async fn last_heartbeat(&self, worker_id: &WorkerId) -> Result<Option<i64>, StoreError> {
        let key = self.keys.worker_heartbeat_key(worker_id);
        let value = self.store.get(&key).await?;
        Ok(value.and_then(|v| v.trim().parse::<i64>().ok()))
    }
}

#[async_trait]
impl WorkerRuntime for StoreRuntime {
    async fn acquire_lease(&self, task_id: &TaskId, token: &str) -> Result<bool, StoreError> {
        let key = self.keys.task_lock_key(task_id);
        self.store.set_nx(&key, token, self.lease_ttl).await
    }

    async fn release_lease(&self, task_id: &TaskId, token: &str) -> Result<bool, StoreError> {
        let key = self.keys.task_lock_key(task_id);
        self.store.compare_and_delete(&key, token).await
    }

    async fn heartbeat(&self, worker_id: &WorkerId) -> Result<(), StoreError> {
        let key = self.keys.worker_heartbeat_key(worker_id);
        let now = Utc::now().timestamp().to_string();
        self.store.set_ex(&key, &now, self.heartbeat_ttl).await
    }

    async fn clear_heartbeat(&self, worker_id: &WorkerId) -> Result<(), StoreError> {
        let key = self.keys.worker_heartbeat_key(worker_id);
        self.store.delete(&key).await.map(|_| ())
    }

    fn hooks(&self) -> &HookSet {
        &self.hooks
    }

    fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }
}
