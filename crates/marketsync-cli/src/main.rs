// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! Command-line entry points for the sync pipeline: `init`, `run`, `status`,
//! `worker`, and `scheduler`.

mod handlers;
mod listing;

use chrono::Utc;
use clap::{Parser, Subcommand};
use marketsync_config::MarketsyncConfig;
use marketsync_coordinator::SyncCoordinator;
use marketsync_extract::{default_rule_sets, Extractor};
use marketsync_fetch::Fetcher;
use marketsync_identity::{Identity, IdentityPool, RateLimitConfig};
use marketsync_queue::{DurableQueue, QueueName};
use marketsync_runtime::{HookRegistry, LoggingHook, RetryPolicy, TaskRegistry, Worker};
use marketsync_schedule::{ScheduleEntry, Scheduler, Trigger};
use marketsync_store::{InMemoryStore, PersistencePort};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Usage / argument error.
const EXIT_USAGE_ERROR: i32 = 2;
/// Configuration could not be loaded or failed validation.
const EXIT_CONFIG_ERROR: i32 = 3;
/// The command ran but failed.
const EXIT_RUNTIME_ERROR: i32 = 4;
/// Interrupted by SIGINT.
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Parser, Debug)]
#[command(name = "marketsync", version, about = "B2B marketplace crawl, dedup, and sync pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a config file (defaults to the environment-only pipeline).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the default config and data/image directories.
    Init,

    /// Run a one-shot product sync against a listing source.
    Run {
        /// Category filter passed through as part of the sync run's config snapshot.
        #[arg(long)]
        category: Option<String>,
        /// Stop after this many listing pages.
        #[arg(long)]
        limit: Option<u32>,
        /// Base URL of the listing endpoint to page through.
        #[arg(long)]
        source_url: String,
    },

    /// Print a supervision/dashboard summary and exit.
    Status,

    /// Run a worker loop leasing from the given queues until interrupted.
    Worker {
        /// Source URL workers use for sync.products/sync.suppliers tasks.
        #[arg(long)]
        source_url: Option<String>,
        /// Queues to lease from, in priority order.
        #[arg(long, value_delimiter = ',', default_value = "default,crawler,image,data_sync,batch")]
        queues: Vec<String>,
    },

    /// Run the cron/interval scheduler loop until interrupted.
    Scheduler,
}

fn load_config(path: Option<&PathBuf>) -> Result<MarketsyncConfig, i32> {
    let mut config = marketsync_config::load_config(path.map(PathBuf::as_path)).map_err(|err| {
        eprintln!("error: {err}");
        EXIT_CONFIG_ERROR
    })?;
    marketsync_config::apply_env_overrides(&mut config);
    match marketsync_config::validate_config(&config) {
        Ok(warnings) => {
            for warning in warnings {
                tracing::warn!(target: "marketsync.cli", ?warning, "configuration warning");
            }
        }
        Err(err) => {
            eprintln!("error: {err}");
            return Err(EXIT_CONFIG_ERROR);
        }
    }
    Ok(config)
}

fn default_identity_pool() -> Arc<IdentityPool> {
    Arc::new(IdentityPool::new(RateLimitConfig::default()))
}

fn queue_name_from_str(name: &str) -> Option<QueueName> {
    match name {
        "default" => Some(QueueName::Default),
        "crawler" => Some(QueueName::Crawler),
        "image" => Some(QueueName::Image),
        "data_sync" => Some(QueueName::DataSync),
        "batch" => Some(QueueName::Batch),
        _ => None,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    tracing_subscriber::fmt().with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))).init();

    let code = match cli.command {
        Commands::Init => cmd_init(cli.config.as_ref()).await,
        Commands::Run { category, limit, source_url } => cmd_run(cli.config.as_ref(), category, limit, source_url).await,
        Commands::Status => cmd_status(cli.config.as_ref()).await,
        Commands::Worker { source_url, queues } => cmd_worker(cli.config.as_ref(), source_url, queues).await,
        Commands::Scheduler => cmd_scheduler(cli.config.as_ref()).await,
    };

    if code != 0 {
        std::process::exit(code);
    }
}

async fn cmd_init(config_path: Option<&PathBuf>) -> i32 {
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };

    let data_dir = config.data_dir.as_deref().unwrap_or("./data");
    let image_dir = config.image_dir.as_deref().unwrap_or("./images");
    for dir in [data_dir, image_dir] {
        if let Err(err) = tokio::fs::create_dir_all(dir).await {
            eprintln!("error: could not create {dir}: {err}");
            return EXIT_RUNTIME_ERROR;
        }
    }

    println!("initialized marketsync data_dir={data_dir} image_dir={image_dir}");
    0
}

async fn cmd_run(config_path: Option<&PathBuf>, category: Option<String>, limit: Option<u32>, source_url: String) -> i32 {
    let _config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };

    let store: Arc<dyn PersistencePort> = Arc::new(InMemoryStore::new());
    let extractor = Arc::new(Extractor::new(default_rule_sets()));
    let coordinator = Arc::new(SyncCoordinator::new(store.clone(), extractor, None));

    let pool = default_identity_pool();
    pool.add(Identity { id: "cli-default".to_string(), user_agent: "marketsync-cli/0.1".to_string(), proxy: None }).await;
    let fetcher = Fetcher::new(pool, true);
    let mut source = listing::HttpListingSource::new(fetcher, source_url, limit);
    if let Some(category) = category {
        source = source.with_category(category);
    }

    let supplier_ref = Uuid::new_v4();
    let task_id = Uuid::new_v4();
    let ctx = marketsync_runtime::TaskContext::new(store.clone(), task_id);

    match coordinator.run_products(&ctx, supplier_ref, "marketsync-cli", &source).await {
        Ok(outcome) => {
            println!(
                "sync complete: processed={} accepted={} rejected={} cancelled={}",
                outcome.counters.processed, outcome.counters.success, outcome.rejected.len(), outcome.cancelled
            );
            0
        }
        Err(err) => {
            eprintln!("error: {err}");
            EXIT_RUNTIME_ERROR
        }
    }
}

async fn cmd_status(config_path: Option<&PathBuf>) -> i32 {
    let _config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };

    let store: Arc<dyn PersistencePort> = Arc::new(InMemoryStore::new());
    let stats = marketsync_supervise::dashboard_stats(store.as_ref(), Utc::now()).await;
    match serde_json::to_string_pretty(&stats) {
        Ok(json) => {
            println!("{json}");
            0
        }
        Err(err) => {
            eprintln!("error: {err}");
            EXIT_RUNTIME_ERROR
        }
    }
}

async fn cmd_worker(config_path: Option<&PathBuf>, source_url: Option<String>, queue_names: Vec<String>) -> i32 {
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };

    let queues: Vec<QueueName> = match queue_names.iter().map(|n| queue_name_from_str(n)).collect::<Option<Vec<_>>>() {
        Some(q) if !q.is_empty() => q,
        _ => {
            eprintln!("error: --queues must name at least one of default,crawler,image,data_sync,batch");
            return EXIT_USAGE_ERROR;
        }
    };

    let store: Arc<dyn PersistencePort> = Arc::new(InMemoryStore::new());
    let queue = Arc::new(Mutex::new(DurableQueue::new(10_000)));
    let extractor = Arc::new(Extractor::new(default_rule_sets()));
    let coordinator = Arc::new(SyncCoordinator::new(store.clone(), extractor, Some(queue.clone())));

    let pool = default_identity_pool();
    pool.add(Identity { id: "worker-default".to_string(), user_agent: "marketsync-worker/0.1".to_string(), proxy: None }).await;

    let mut registry = TaskRegistry::new();
    if let Some(base_url) = &source_url {
        let fetcher = Fetcher::new(pool.clone(), config.robots_respect);
        let source: Arc<dyn marketsync_coordinator::ListingSource> = Arc::new(listing::HttpListingSource::new(fetcher, base_url.clone(), None));
        registry.register("sync.products", handlers::SyncProductsHandler::new(coordinator.clone(), Uuid::new_v4(), source.clone()));
        registry.register("sync.suppliers", handlers::SyncSuppliersHandler::new(coordinator.clone(), source));
    }
    let image_dir = config.image_dir.clone().unwrap_or_else(|| "./images".to_string());
    let image_fetcher = Fetcher::new(pool, config.robots_respect);
    registry.register("image.download", handlers::ImageDownloadHandler::new(image_fetcher, PathBuf::from(image_dir), store.clone()));

    let mut hooks = HookRegistry::new();
    hooks.register(Box::new(LoggingHook));
    let worker = Worker::new(registry, hooks, store, RetryPolicy::default(), Duration::from_secs(60));

    tracing::info!(target: "marketsync.cli", ?queues, "worker loop starting");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(target: "marketsync.cli", "worker interrupted");
                return EXIT_INTERRUPTED;
            }
            () = async {
                let now = Utc::now();
                let mut idle = true;
                for queue_name in &queues {
                    let outcome = worker.process_next(&queue, *queue_name, now).await;
                    if outcome != marketsync_runtime::ProcessOutcome::Idle {
                        idle = false;
                    }
                }
                if idle {
                    tokio::time::sleep(Duration::from_millis(250)).await;
                }
            } => {}
        }
    }
}

async fn cmd_scheduler(config_path: Option<&PathBuf>) -> i32 {
    let _config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };

    let entries = vec![ScheduleEntry {
        name: "sync.products".to_string(),
        trigger: Trigger::Interval { period: chrono::Duration::minutes(15), jitter: chrono::Duration::minutes(1) },
    }];
    let mut scheduler = match Scheduler::new(entries) {
        Ok(s) => s,
        Err(err) => {
            eprintln!("error: {err}");
            return EXIT_CONFIG_ERROR;
        }
    };

    tracing::info!(target: "marketsync.cli", "scheduler loop starting");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(target: "marketsync.cli", "scheduler interrupted");
                return EXIT_INTERRUPTED;
            }
            () = async {
                let due = scheduler.tick(Utc::now(), 0);
                for name in due {
                    tracing::info!(target: "marketsync.cli", schedule_entry = %name, "due");
                }
                tokio::time::sleep(Duration::from_secs(5)).await;
            } => {}
        }
    }
}
