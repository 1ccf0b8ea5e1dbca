//! taskx - run a coordinator and a batch of demo tasks.
//!
//! Uses an in-memory store unless built with the `redis` feature and given
//! `--redis-url`.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use taskx_core::Task;
use taskx_dispatch::{Config, Coordinator, MemoryStore, Store, TaskHook};

mod demo;
mod json_output;

use demo::{DemoBehavior, DemoTask, SummaryHook};
use json_output::{JsonEvent, JsonEventType, JsonHook};

/// taskx demo runner
#[derive(Parser, Debug)]
#[command(name = "taskx")]
#[command(about = "Dispatch demo tasks across in-process workers", long_about = None)]
struct Cli {
    /// Key namespace
    #[arg(short, long, default_value = "taskx")]
    namespace: String,

    /// Number of workers
    #[arg(short, long, default_value = "4")]
    workers: usize,

    /// Concurrent executions per worker
    #[arg(short, long, default_value = "10")]
    pool_size: usize,

    /// Inbox capacity per worker (defaults to the pool size)
    #[arg(long)]
    inbox: Option<usize>,

    /// Number of demo tasks to queue
    #[arg(short, long, default_value = "12")]
    tasks: usize,

    /// How long a "work" task sleeps, in milliseconds
    #[arg(long, default_value = "250")]
    work_ms: u64,

    /// Per-task timeout in milliseconds
    #[arg(long, default_value = "1000")]
    timeout_ms: u64,

    /// Dispatch interval in milliseconds
    #[arg(long, default_value = "1000")]
    dispatch_ms: u64,

    /// Heartbeat interval in milliseconds
    #[arg(long, default_value = "5000")]
    heartbeat_ms: u64,

    /// Stop after this many seconds even if tasks are still queued (0 = no limit)
    #[arg(long, default_value = "30")]
    max_secs: u64,

    /// Emit lifecycle events as JSON lines on stdout
    #[arg(long)]
    json: bool,

    /// Redis server to use as the shared store
    #[cfg(feature = "redis")]
    #[arg(long, env = "TASKX_REDIS_URL")]
    redis_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays clean for JSON lines.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();

    if cli.json {
        json_output::enable_json_mode();
    }

    let summary = SummaryHook::new();
    let hooks: Vec<Arc<dyn TaskHook>> =
        vec![summary.clone() as Arc<dyn TaskHook>, Arc::new(JsonHook)];

    let mut config = Config::default()
        .with_namespace(cli.namespace.clone())
        .with_worker_size(cli.workers)
        .with_pool_size(cli.pool_size)
        .with_dispatch_interval(Duration::from_millis(cli.dispatch_ms))
        .with_heartbeat_interval(Duration::from_millis(cli.heartbeat_ms))
        .with_hooks(hooks);
    if let Some(inbox) = cli.inbox {
        config = config.with_inbox_capacity(inbox);
    }
    info!(?config, "Starting taskx");

    let store = open_store(&cli).await?;
    let coordinator = Coordinator::new(store, config);

    let work = Duration::from_millis(cli.work_ms);
    let timeout = Duration::from_millis(cli.timeout_ms.max(1));
    let mut ids = Vec::with_capacity(cli.tasks);
    for n in 0..cli.tasks {
        let task = Arc::new(DemoTask::new(n, DemoBehavior::for_index(n, work), timeout));
        ids.push(task.id().clone());
        coordinator.register_task(task).await?;
    }
    for id in &ids {
        coordinator.push_task(id).await?;
    }

    coordinator.start()?;
    JsonEvent::new(
        JsonEventType::CoordinatorStarted,
        serde_json::json!({
            "namespace": cli.namespace,
            "workers": coordinator.worker_ids(),
            "queued": ids.len(),
        }),
    )
    .emit();

    let deadline = async {
        if cli.max_secs == 0 {
            std::future::pending::<()>().await;
        } else {
            tokio::time::sleep(Duration::from_secs(cli.max_secs)).await;
        }
    };

    tokio::select! {
        _ = summary.wait_for(ids.len()) => info!("All tasks finished"),
        _ = deadline => warn!(max_secs = cli.max_secs, "Time limit reached"),
        _ = tokio::signal::ctrl_c() => info!("Received shutdown signal"),
    }

    coordinator.stop();
    coordinator.join().await;

    let totals = summary.summary();
    let pending = coordinator.queued_ids().await?;
    info!(
        completed = totals.completed,
        failed = totals.failed,
        timed_out = totals.timed_out,
        panicked = totals.panicked,
        pending = pending.len(),
        "taskx stopped"
    );
    JsonEvent::new(
        JsonEventType::CoordinatorStopped,
        serde_json::json!({
            "completed": totals.completed,
            "failed": totals.failed,
            "timed_out": totals.timed_out,
            "panicked": totals.panicked,
            "pending": pending,
        }),
    )
    .emit();

    Ok(())
}

#[cfg(feature = "redis")]
async fn open_store(cli: &Cli) -> Result<Arc<dyn Store>, Box<dyn std::error::Error>> {
    match &cli.redis_url {
        Some(url) => {
            info!(url = %url, "Using redis store");
            Ok(Arc::new(taskx_dispatch::RedisStore::connect(url).await?))
        }
        None => Ok(Arc::new(MemoryStore::new())),
    }
}

#[cfg(not(feature = "redis"))]
async fn open_store(_cli: &Cli) -> Result<Arc<dyn Store>, Box<dyn std::error::Error>> {
    Ok(Arc::new(MemoryStore::new()))
}
