//! Worker: bounded inbox, bounded execution pool, heartbeat loop.

use std::backtrace::Backtrace;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::FutureExt;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use taskx_core::{ExecutionContext, Task, TaskError, TaskId, TaskResult, WorkerId};

use crate::config::MAX_POOL_SIZE;
use crate::panic::{install_backtrace_hook, panic_message, take_backtrace};
use crate::runtime::WorkerRuntime;

/// Why a task could not be handed to a worker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("Inbox of worker {0} is full")]
    Full(WorkerId),

    #[error("Worker {0} is stopped")]
    Closed(WorkerId),
}

/// Executes tasks delivered to its inbox, at most `pool_size` at a time.
pub struct Worker {
    id: WorkerId,
    pool_size: usize,
    inbox_tx: mpsc::Sender<Arc<dyn Task>>,
    /// Taken by [`Worker::start`].
    inbox_rx: Mutex<Option<mpsc::Receiver<Arc<dyn Task>>>>,
    runtime: Arc<dyn WorkerRuntime>,
    stop: CancellationToken,
}

impl Worker {
    /// Create a new worker. Pool size and inbox capacity are clamped to
    /// `1..=MAX_POOL_SIZE`.
    pub fn new(
        id: WorkerId,
        pool_size: usize,
        inbox_capacity: usize,
        runtime: Arc<dyn WorkerRuntime>,
    ) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::channel(inbox_capacity.clamp(1, MAX_POOL_SIZE));
        Self {
            id,
            pool_size: pool_size.clamp(1, MAX_POOL_SIZE),
            inbox_tx,
            inbox_rx: Mutex::new(Some(inbox_rx)),
            runtime,
            stop: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &WorkerId {
        &self.id
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Number of tasks waiting in the inbox.
    pub fn inbox_len(&self) -> usize {
        self.inbox_tx.max_capacity() - self.inbox_tx.capacity()
    }

    /// Start the heartbeat and receive loops.
    ///
    /// The returned handle resolves once the worker has stopped, its
    /// in-flight executions have finished and its heartbeat is cleared.
    pub fn start(
        self: &Arc<Self>,
        shutdown: CancellationToken,
    ) -> Result<JoinHandle<()>, TaskError> {
        if self.is_stopped() {
            return Err(TaskError::WorkerStopped);
        }
        let inbox = match self.inbox_rx.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(inbox) = inbox else {
            warn!(worker_id = %self.id, "Worker already started");
            return Err(TaskError::WorkerStopped);
        };

        info!(worker_id = %self.id, pool_size = self.pool_size, "Worker starting");
        let worker = Arc::clone(self);
        Ok(tokio::spawn(async move { worker.run(inbox, shutdown).await }))
    }

    /// Ask the worker to stop. Tasks still in the inbox are discarded;
    /// running executions are allowed to finish.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Non-blocking delivery into the inbox.
    pub fn try_deliver(&self, task: Arc<dyn Task>) -> Result<(), DeliveryError> {
        if self.is_stopped() {
            return Err(DeliveryError::Closed(self.id.clone()));
        }
        self.inbox_tx.try_send(task).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Full(self.id.clone()),
            TrySendError::Closed(_) => DeliveryError::Closed(self.id.clone()),
        })
    }

    async fn run(
        self: Arc<Self>,
        mut inbox: mpsc::Receiver<Arc<dyn Task>>,
        shutdown: CancellationToken,
    ) {
        let heartbeat = tokio::spawn(heartbeat_loop(
            Arc::clone(&self.runtime),
            self.id.clone(),
            shutdown.clone(),
            self.stop.clone(),
        ));

        let pool = Arc::new(Semaphore::new(self.pool_size));

        loop {
            let task = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = self.stop.cancelled() => break,
                next = inbox.recv() => match next {
                    Some(task) => task,
                    None => break,
                },
            };

            let permit = match Arc::clone(&pool).try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    warn!(
                        worker_id = %self.id,
                        task_id = %task.id(),
                        pool_size = self.pool_size,
                        "Execution pool full, dropping task"
                    );
                    continue;
                }
            };

            let runtime = Arc::clone(&self.runtime);
            let worker_id = self.id.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                execute_task(runtime.as_ref(), &worker_id, task, shutdown).await;
                drop(permit);
            });
        }

        self.stop.cancel();
        inbox.close();
        let mut discarded = 0usize;
        while inbox.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            debug!(worker_id = %self.id, discarded, "Discarded undelivered tasks");
        }

        // Every permit back means every execution has finished.
        // pool_size <= MAX_POOL_SIZE, which fits in u32.
        let _ = pool.acquire_many(self.pool_size as u32).await;

        if let Err(e) = heartbeat.await {
            error!(worker_id = %self.id, error = %e, "Heartbeat loop failed");
        }
        info!(worker_id = %self.id, "Worker stopped");
    }
}

/// Run one task under lease, timeout and panic isolation, notifying hooks.
///
/// Never panics and never returns an error: every outcome is recorded in
/// the returned [`TaskResult`].
pub(crate) async fn execute_task(
    runtime: &dyn WorkerRuntime,
    worker_id: &WorkerId,
    task: Arc<dyn Task>,
    shutdown: CancellationToken,
) -> TaskResult {
    let task_id = task.id().clone();
    let mut result = TaskResult::begin(task_id.clone());
    let token = format!("{}:{}", worker_id, Uuid::new_v4());

    let leased = match runtime.acquire_lease(&task_id, &token).await {
        Ok(acquired) => acquired,
        Err(e) => {
            warn!(
                task_id = %task_id,
                worker_id = %worker_id,
                error = %e,
                "Failed to acquire task lease"
            );
            false
        }
    };
    if !leased {
        debug!(
            task_id = %task_id,
            worker_id = %worker_id,
            "Task lease held elsewhere, skipping"
        );
        result.fail(TaskError::LockFailed(task_id));
        result.finish();
        return result;
    }

    let hooks = runtime.hooks();
    hooks.task_started(task.as_ref()).await;

    let timeout = task.config().execution_timeout();
    let ctx = ExecutionContext::new(task_id.clone(), worker_id.clone(), timeout, shutdown);
    debug!(task_id = %task_id, worker_id = %worker_id, ?timeout, "Executing task");

    install_backtrace_hook();
    // The backtrace must be read on the thread that panicked, before the
    // next await point.
    let outcome = AssertUnwindSafe(run_bounded(task.as_ref(), ctx, timeout))
        .catch_unwind()
        .await
        .map_err(|payload| {
            let trace = take_backtrace().unwrap_or_else(|| Backtrace::force_capture().to_string());
            (panic_message(payload.as_ref()), trace)
        });

    match runtime.release_lease(&task_id, &token).await {
        Ok(true) => {}
        Ok(false) => debug!(task_id = %task_id, "Task lease already expired"),
        Err(e) => warn!(task_id = %task_id, error = %e, "Failed to release task lease"),
    }

    match outcome {
        Ok(Ok(())) => {
            result.complete();
            result.finish();
            info!(
                task_id = %task_id,
                worker_id = %worker_id,
                duration_ms = result.duration.as_millis() as u64,
                "Task completed"
            );
            hooks.task_completed(task.as_ref(), &result).await;
        }
        Ok(Err(err)) => {
            warn!(task_id = %task_id, worker_id = %worker_id, error = %err, "Task failed");
            result.fail(err);
            result.finish();
            hooks.task_failed(task.as_ref(), &result).await;
        }
        Err((message, trace)) => {
            error!(task_id = %task_id, worker_id = %worker_id, panic = %message, "Task panicked");
            result.record_panic(message, trace);
            result.finish();
            hooks.task_panicked(task.as_ref(), &result).await;
        }
    }

    result
}

async fn run_bounded(
    task: &dyn Task,
    ctx: ExecutionContext,
    timeout: Option<Duration>,
) -> Result<(), TaskError> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, task.execute(ctx))
            .await
            .unwrap_or(Err(TaskError::Timeout(limit))),
        None => task.execute(ctx).await,
    }
}

async fn heartbeat_loop(
    runtime: Arc<dyn WorkerRuntime>,
    worker_id: WorkerId,
    shutdown: CancellationToken,
    stop: CancellationToken,
) {
    let period = runtime.heartbeat_interval().max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = runtime.heartbeat(&worker_id).await {
                    warn!(worker_id = %worker_id, error = %e, "Failed to write heartbeat");
                }
            }
        }
    }

    if let Err(e) = runtime.clear_heartbeat(&worker_id).await {
        warn!(worker_id = %worker_id, error = %e, "Failed to clear heartbeat");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::hooks::{HookEvent, TaskHook};
    use crate::runtime::StoreRuntime;
    use crate::store::{MemoryStore, Store};
    use crate::testing::{next_event, RecordingHook, Recorded, TestTask};
    use taskx_core::TaskStatus;

    struct Fixture {
        store: Arc<MemoryStore>,
        runtime: Arc<StoreRuntime>,
        events: mpsc::UnboundedReceiver<Recorded>,
    }

    fn fixture() -> Fixture {
        let (hook, events) = RecordingHook::new();
        let config = Config::default()
            .with_namespace("test")
            .with_heartbeat_interval(Duration::from_millis(10))
            .with_hooks(vec![Arc::new(hook) as Arc<dyn TaskHook>]);
        let store = Arc::new(MemoryStore::new());
        let runtime = Arc::new(StoreRuntime::new(store.clone(), &config));
        Fixture {
            store,
            runtime,
            events,
        }
    }

    async fn run_on(fx: &Fixture, worker: &str, task: Arc<dyn Task>) -> TaskResult {
        let worker_id = WorkerId::new(worker);
        execute_task(fx.runtime.as_ref(), &worker_id, task, CancellationToken::new()).await
    }

    fn worker(fx: &Fixture, pool_size: usize, inbox: usize) -> Arc<Worker> {
        Arc::new(Worker::new(
            WorkerId::new("w1"),
            pool_size,
            inbox,
            fx.runtime.clone(),
        ))
    }

    #[tokio::test]
    async fn test_successful_execution() {
        let mut fx = fixture();
        let task: Arc<dyn Task> = Arc::new(TestTask::ok("t1"));

        let result = run_on(&fx, "w1", task).await;

        assert_eq!(result.status, TaskStatus::Completed);
        assert!(result.error.is_none());
        assert!(result.end_time.is_some());

        let (event, id, _) = next_event(&mut fx.events).await;
        assert_eq!((event, id.as_str()), (HookEvent::Start, "t1"));
        let (event, _, recorded) = next_event(&mut fx.events).await;
        assert_eq!(event, HookEvent::Complete);
        assert_eq!(recorded.unwrap().status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_error_fires_fail_hook() {
        let mut fx = fixture();
        let task: Arc<dyn Task> = Arc::new(TestTask::failing("t1", "boom"));

        let result = run_on(&fx, "w1", task).await;

        assert_eq!(result.status, TaskStatus::Failed);
        assert_eq!(result.error, Some(TaskError::execution("boom")));
        assert!(!result.is_panic());

        assert_eq!(next_event(&mut fx.events).await.0, HookEvent::Start);
        assert_eq!(next_event(&mut fx.events).await.0, HookEvent::Fail);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_marks_failed() {
        let mut fx = fixture();
        let limit = Duration::from_millis(50);
        let task = Arc::new(TestTask::sleeping("slow", Duration::from_secs(5)).with_timeout(limit));
        let started = tokio::time::Instant::now();

        let result = run_on(&fx, "w1", task).await;

        assert_eq!(result.status, TaskStatus::Failed);
        assert_eq!(result.error, Some(TaskError::Timeout(limit)));
        assert!(result.error.as_ref().is_some_and(TaskError::is_timeout));
        // The sleep was cut at the deadline on the paused clock.
        let elapsed = started.elapsed();
        assert!(elapsed >= limit && elapsed < Duration::from_secs(1), "{elapsed:?}");

        assert_eq!(next_event(&mut fx.events).await.0, HookEvent::Start);
        assert_eq!(next_event(&mut fx.events).await.0, HookEvent::Fail);
    }

    #[tokio::test]
    async fn test_panic_is_isolated() {
        let mut fx = fixture();
        let task = Arc::new(TestTask::panicking("bad", "kaboom"));

        let result = run_on(&fx, "w1", task).await;

        assert_eq!(result.status, TaskStatus::Failed);
        assert_eq!(result.panic_info.as_deref(), Some("kaboom"));
        // The trace is captured at the panic site, not after unwinding.
        let trace = result.stack_trace.unwrap();
        assert!(trace.contains("TestTask"), "{trace}");

        assert_eq!(next_event(&mut fx.events).await.0, HookEvent::Start);
        let (event, _, recorded) = next_event(&mut fx.events).await;
        assert_eq!(event, HookEvent::Panic);
        assert!(recorded.unwrap().is_panic());

        // The lease was released despite the panic.
        assert_eq!(fx.store.get("test:locks:tasks:bad").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_lease_race_runs_once() {
        let fx = fixture();
        let task = Arc::new(TestTask::sleeping("shared", Duration::from_millis(100)));

        let (a, b) = tokio::join!(
            run_on(&fx, "w1", task.clone()),
            run_on(&fx, "w2", task.clone()),
        );

        let mut statuses = [a.status, b.status];
        statuses.sort_by_key(|s| s.to_string());
        assert_eq!(statuses, [TaskStatus::Completed, TaskStatus::Failed]);
        let loser = if a.is_success() { b } else { a };
        assert_eq!(loser.error, Some(TaskError::LockFailed(TaskId::new("shared"))));
        assert_eq!(task.runs(), 1);
    }

    #[tokio::test]
    async fn test_lease_released_after_run() {
        let fx = fixture();
        let task = Arc::new(TestTask::ok("t1"));

        let first = run_on(&fx, "w1", task.clone()).await;
        let second = run_on(&fx, "w1", task.clone()).await;

        assert!(first.is_success());
        assert!(second.is_success());
        assert_eq!(task.runs(), 2);
    }

    #[tokio::test]
    async fn test_lock_failure_skips_hooks() {
        let mut fx = fixture();
        fx.store
            .set_nx("test:locks:tasks:t1", "someone-else", Duration::from_secs(60))
            .await
            .unwrap();
        let task = Arc::new(TestTask::ok("t1"));

        let result = run_on(&fx, "w1", task.clone()).await;

        assert_eq!(result.error, Some(TaskError::LockFailed(TaskId::new("t1"))));
        assert_eq!(task.runs(), 0);
        assert!(fx.events.try_recv().is_err());
        // The foreign lease is untouched.
        assert_eq!(
            fx.store.get("test:locks:tasks:t1").await.unwrap().as_deref(),
            Some("someone-else")
        );
    }

    #[tokio::test]
    async fn test_worker_survives_panic() {
        let mut fx = fixture();
        let worker = worker(&fx, 1, 4);
        let handle = worker.start(CancellationToken::new()).unwrap();

        worker.try_deliver(Arc::new(TestTask::panicking("bad", "kaboom"))).unwrap();
        assert_eq!(next_event(&mut fx.events).await.0, HookEvent::Start);
        assert_eq!(next_event(&mut fx.events).await.0, HookEvent::Panic);

        worker.try_deliver(Arc::new(TestTask::ok("good"))).unwrap();
        assert_eq!(next_event(&mut fx.events).await.0, HookEvent::Start);
        let (event, id, _) = next_event(&mut fx.events).await;
        assert_eq!((event, id.as_str()), (HookEvent::Complete, "good"));

        worker.stop();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_full_pool_drops_task() {
        let mut fx = fixture();
        let worker = worker(&fx, 1, 4);
        let handle = worker.start(CancellationToken::new()).unwrap();

        let slow = Arc::new(TestTask::sleeping("slow", Duration::from_millis(200)));
        let dropped = Arc::new(TestTask::ok("dropped"));
        worker.try_deliver(slow.clone()).unwrap();
        worker.try_deliver(dropped.clone()).unwrap();

        assert_eq!(next_event(&mut fx.events).await.0, HookEvent::Start);
        let (event, id, _) = next_event(&mut fx.events).await;
        assert_eq!((event, id.as_str()), (HookEvent::Complete, "slow"));

        worker.stop();
        handle.await.unwrap();
        assert_eq!(slow.runs(), 1);
        assert_eq!(dropped.runs(), 0);
    }

    #[tokio::test]
    async fn test_oversized_pool_is_clamped() {
        let fx = fixture();
        let worker = worker(&fx, usize::MAX, usize::MAX);
        assert_eq!(worker.pool_size(), MAX_POOL_SIZE);

        let handle = worker.start(CancellationToken::new()).unwrap();
        worker.stop();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_full_inbox_rejects_delivery() {
        let fx = fixture();
        let worker = worker(&fx, 1, 1);

        // Not started: nothing drains the inbox.
        worker.try_deliver(Arc::new(TestTask::ok("a"))).unwrap();
        assert_eq!(worker.inbox_len(), 1);
        assert_eq!(
            worker.try_deliver(Arc::new(TestTask::ok("b"))),
            Err(DeliveryError::Full(WorkerId::new("w1")))
        );

        worker.stop();
        assert_eq!(
            worker.try_deliver(Arc::new(TestTask::ok("c"))),
            Err(DeliveryError::Closed(WorkerId::new("w1")))
        );
    }

    #[tokio::test]
    async fn test_start_twice_or_after_stop() {
        let fx = fixture();
        let worker = worker(&fx, 1, 1);

        let handle = worker.start(CancellationToken::new()).unwrap();
        assert_eq!(worker.start(CancellationToken::new()).unwrap_err(), TaskError::WorkerStopped);

        worker.stop();
        handle.await.unwrap();
        assert_eq!(worker.start(CancellationToken::new()).unwrap_err(), TaskError::WorkerStopped);
    }

    #[tokio::test]
    async fn test_graceful_stop_clears_heartbeat() {
        let fx = fixture();
        let worker = worker(&fx, 1, 1);
        let key = "test:workers:heartbeat:w1";
        let handle = worker.start(CancellationToken::new()).unwrap();

        let mut beat = None;
        for _ in 0..100 {
            beat = fx.store.get(key).await.unwrap();
            if beat.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(beat.is_some(), "heartbeat never written");

        worker.stop();
        handle.await.unwrap();
        assert_eq!(fx.store.get(key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_shutdown_token_stops_worker() {
        let fx = fixture();
        let worker = worker(&fx, 1, 1);
        let shutdown = CancellationToken::new();
        let handle = worker.start(shutdown.clone()).unwrap();

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("worker did not stop")
            .unwrap();
        assert!(worker.is_stopped());
    }
}
