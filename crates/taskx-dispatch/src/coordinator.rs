//! Coordinator: task registry, worker fleet and dispatch loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use taskx_core::{Task, TaskError, TaskId, WorkerId};

use crate::config::Config;
use crate::runtime::StoreRuntime;
use crate::store::{Store, StoreError};
use crate::worker::Worker;

/// Counters for one dispatch tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Workers with a fresh heartbeat.
    pub active_workers: usize,
    /// Ids read from the head of the queue.
    pub inspected: usize,
    /// Ids handed to a worker and removed from the queue.
    pub delivered: usize,
    /// Ids with no registered task; left queued.
    pub unknown: usize,
    /// Ids whose target inbox was full or closed; left queued.
    pub rejected: usize,
}

/// Owns the task registry and the workers, and moves queued task ids to
/// live workers.
pub struct Coordinator {
    config: Config,
    store: Arc<dyn Store>,
    runtime: Arc<StoreRuntime>,
    tasks: RwLock<HashMap<TaskId, Arc<dyn Task>>>,
    workers: Vec<Arc<Worker>>,
    shutdown: CancellationToken,
    started: AtomicBool,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Coordinator {
    /// Create a coordinator with `config.worker_size` workers.
    pub fn new(store: Arc<dyn Store>, config: Config) -> Arc<Self> {
        let runtime = Arc::new(StoreRuntime::new(Arc::clone(&store), &config));
        let workers = (0..config.worker_size)
            .map(|slot| {
                Arc::new(Worker::new(
                    WorkerId::for_slot(slot),
                    config.effective_pool_size(),
                    config.inbox_capacity(),
                    runtime.clone(),
                ))
            })
            .collect();

        Arc::new(Self {
            config,
            store,
            runtime,
            tasks: RwLock::new(HashMap::new()),
            workers,
            shutdown: CancellationToken::new(),
            started: AtomicBool::new(false),
            handles: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Register a task, replacing any task with the same id.
    pub async fn register_task(&self, task: Arc<dyn Task>) -> Result<(), TaskError> {
        task.config().validate()?;
        let id = task.id().clone();
        let replaced = self.tasks.write().await.insert(id.clone(), task).is_some();
        debug!(task_id = %id, replaced, "Task registered");
        Ok(())
    }

    pub async fn task(&self, id: &TaskId) -> Option<Arc<dyn Task>> {
        self.tasks.read().await.get(id).cloned()
    }

    pub async fn task_count(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub fn worker_ids(&self) -> Vec<WorkerId> {
        self.workers.iter().map(|w| w.id().clone()).collect()
    }

    /// Append a task id to the shared queue. Returns the new queue length.
    pub async fn push_task(&self, id: &TaskId) -> Result<usize, StoreError> {
        let key = self.runtime.keys().task_queue_key();
        self.store.push_back(&key, id.as_str()).await
    }

    /// Ids currently waiting in the shared queue, head first.
    pub async fn queued_ids(&self) -> Result<Vec<TaskId>, StoreError> {
        let key = self.runtime.keys().task_queue_key();
        let ids = self.store.range(&key, 0, -1).await?;
        Ok(ids.into_iter().map(TaskId::new).collect())
    }

    /// Start every worker, then the dispatch loop.
    pub fn start(self: &Arc<Self>) -> Result<(), TaskError> {
        if self.shutdown.is_cancelled() {
            return Err(TaskError::CoordinatorStopped);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("Coordinator already started");
            return Ok(());
        }

        let mut handles = match self.handles.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for worker in &self.workers {
            handles.push(worker.start(self.shutdown.child_token())?);
        }

        let coordinator = Arc::clone(self);
        handles.push(tokio::spawn(async move { coordinator.dispatch_loop().await }));

        info!(
            namespace = %self.runtime.keys().namespace(),
            workers = self.workers.len(),
            pool_size = self.config.effective_pool_size(),
            "Coordinator started"
        );
        Ok(())
    }

    /// Signal every loop to stop. Does not wait; see [`Coordinator::join`].
    pub fn stop(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        info!("Coordinator stopping");
        self.shutdown.cancel();
        for worker in &self.workers {
            worker.stop();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Wait for the dispatch loop and every worker to finish.
    pub async fn join(&self) {
        let handles = match self.handles.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Coordinator loop failed");
            }
        }
    }

    /// Ids of workers whose heartbeat is fresh. A worker whose heartbeat
    /// cannot be read is left out.
    pub async fn active_workers(&self) -> Vec<WorkerId> {
        self.live_workers()
            .await
            .iter()
            .map(|w| w.id().clone())
            .collect()
    }

    async fn live_workers(&self) -> Vec<Arc<Worker>> {
        let ttl = self.config.heartbeat_ttl.as_secs() as i64;
        let now = Utc::now().timestamp();

        let mut live = Vec::with_capacity(self.workers.len());
        for worker in &self.workers {
            if worker.is_stopped() {
                continue;
            }
            match self.runtime.last_heartbeat(worker.id()).await {
                Ok(Some(ts)) if now - ts < ttl => live.push(Arc::clone(worker)),
                Ok(_) => {}
                Err(e) => {
                    warn!(worker_id = %worker.id(), error = %e, "Failed to read heartbeat");
                }
            }
        }
        live
    }

    /// Run one dispatch tick.
    pub async fn dispatch_once(&self) -> Result<DispatchReport, StoreError> {
        let active = self.live_workers().await;
        let mut report = DispatchReport {
            active_workers: active.len(),
            ..DispatchReport::default()
        };
        if active.is_empty() {
            debug!("No active workers, skipping dispatch");
            return Ok(report);
        }

        let queue_key = self.runtime.keys().task_queue_key();
        let ids = self
            .store
            .range(&queue_key, 0, active.len() as isize - 1)
            .await?;
        report.inspected = ids.len();

        for (position, raw) in ids.into_iter().enumerate() {
            let id = TaskId::new(raw);
            let Some(task) = self.task(&id).await else {
                debug!(task_id = %id, "Queued id has no registered task");
                report.unknown += 1;
                continue;
            };

            let worker = &active[position % active.len()];
            match worker.try_deliver(task) {
                Ok(()) => {
                    report.delivered += 1;
                    debug!(task_id = %id, worker_id = %worker.id(), "Task delivered");
                    if let Err(e) = self.store.remove(&queue_key, 1, id.as_str()).await {
                        warn!(
                            task_id = %id,
                            error = %e,
                            "Failed to remove delivered id from queue"
                        );
                    }
                }
                Err(e) => {
                    report.rejected += 1;
                    debug!(task_id = %id, error = %e, "Delivery rejected, leaving id queued");
                }
            }
        }

        Ok(report)
    }

    async fn dispatch_loop(self: Arc<Self>) {
        let period = self.config.dispatch_interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => match self.dispatch_once().await {
                    Ok(report) if report.delivered > 0 || report.rejected > 0 => {
                        debug!(
                            active_workers = report.active_workers,
                            delivered = report.delivered,
                            rejected = report.rejected,
                            unknown = report.unknown,
                            "Dispatch tick"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Dispatch tick failed"),
                },
            }
        }
        debug!("Dispatch loop stopped");
    }
}
