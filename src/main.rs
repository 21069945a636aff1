//! Ingest Worker CLI
//!
//! Queue administration (migrate, enqueue, stats, reap, requeue) and the
//! worker loop itself, all against the Postgres task store.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ingest_worker::db::{create_pool_from_env, run_migrations, PgTaskStore};
use ingest_worker::worker::{
    setup_signal_handler, HandlerRegistry, IngestProcessor, PollOutcome, StallReaper,
    WorkerConfig, WorkerRuntime,
};
use ingest_worker::{
    ClaimingStrategy, FsArtifactSink, IngestError, NewTask, ReportOutcome, TaskId, TaskStatus,
    TaskStore,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "ingest-worker")]
#[command(about = "Queue and process content ingestion tasks")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply database migrations
    Migrate,

    /// Add a task to the queue
    Enqueue {
        /// Task type (video, audio, text)
        #[arg(short = 't', long = "type")]
        task_type: String,

        /// Task id (generated if not provided)
        #[arg(long)]
        id: Option<String>,

        /// Priority, higher is more urgent
        #[arg(short, long, default_value = "0", allow_hyphen_values = true)]
        priority: i32,

        /// Task parameters as a JSON object
        #[arg(long, default_value = "{}")]
        params: String,
    },

    /// Run as worker, polling ingest_tasks for queued tasks
    Worker {
        /// Task types to claim, comma separated (default: all handled types)
        #[arg(long, value_delimiter = ',')]
        types: Vec<String>,

        /// Worker id (default: worker-<random>)
        #[arg(long)]
        id: Option<String>,

        /// Claiming strategy: fifo, lifo, priority, weighted
        #[arg(short, long, default_value = "priority")]
        strategy: ClaimingStrategy,

        /// Candidate window for the weighted strategy
        #[arg(long)]
        top_n: Option<usize>,

        /// Seed for the weighted strategy
        #[arg(long)]
        seed: Option<u64>,

        /// Poll interval in seconds (default: 5)
        #[arg(short, long, default_value = "5")]
        poll_interval: u64,

        /// Cap on the empty-poll backoff multiplier
        #[arg(long, default_value = "8")]
        max_backoff: u32,

        /// Stop after this many loop iterations
        #[arg(long)]
        max_iterations: Option<u64>,

        /// Task timeout in seconds (default: 300)
        #[arg(short, long, default_value = "300")]
        timeout: u64,

        /// Run once and exit (for testing)
        #[arg(long)]
        once: bool,

        /// Directory for artifact JSON files
        #[arg(short, long, default_value = "./artifacts")]
        output_dir: PathBuf,

        /// Also requeue tasks running longer than this many seconds
        #[arg(long)]
        reap_after: Option<u64>,
    },

    /// Show task counts per status
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Requeue Running tasks that stalled
    Reap {
        /// Tasks running longer than this many seconds are requeued
        #[arg(long, default_value = "600")]
        stalled_after: u64,

        /// Keep sweeping at this interval (seconds) until Ctrl+C
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Requeue a Failed task
    Requeue {
        /// Task id
        #[arg(long)]
        id: String,

        /// Refuse when the task already failed this many times
        #[arg(long, default_value = "3")]
        max_retries: u32,
    },
}

fn init_logging(verbose: bool) -> Result<()> {
    if verbose {
        let subscriber = FmtSubscriber::builder().with_max_level(Level::DEBUG).finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(())
}

async fn connect() -> Result<Arc<PgTaskStore>> {
    let pool = create_pool_from_env().await?;
    info!("Database connection established");
    Ok(Arc::new(PgTaskStore::new(pool)))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load .env file if present
    dotenvy::dotenv().ok();
    init_logging(cli.verbose)?;

    match cli.command {
        Commands::Migrate => {
            let pool = create_pool_from_env().await?;
            run_migrations(&pool).await?;
            println!("Migrations applied");
        }

        Commands::Enqueue {
            task_type,
            id,
            priority,
            params,
        } => {
            let parameters: serde_json::Value =
                serde_json::from_str(&params).context("--params must be valid JSON")?;
            if !parameters.is_object() {
                anyhow::bail!("--params must be a JSON object");
            }

            let mut task = NewTask::new(task_type)
                .parameters(parameters)
                .priority(priority);
            if let Some(id) = id {
                task = task.id(id);
            }

            let store = connect().await?;
            match store.add_task(task).await {
                Ok(id) => println!("{}", id),
                Err(IngestError::DuplicateTask(id)) => {
                    warn!("Task {} already exists, nothing enqueued", id);
                    println!("{} (already queued)", id);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Commands::Worker {
            types,
            id,
            strategy,
            top_n,
            seed,
            poll_interval,
            max_backoff,
            max_iterations,
            timeout,
            once,
            output_dir,
            reap_after,
        } => {
            info!("Initializing worker...");
            let store = connect().await?;

            let strategy = match strategy {
                ClaimingStrategy::WeightedRandom {
                    top_n: default_top_n,
                    seed: default_seed,
                } => ClaimingStrategy::WeightedRandom {
                    top_n: top_n.unwrap_or(default_top_n),
                    seed: seed.or(default_seed),
                },
                other => other,
            };

            // Build worker config
            let mut builder = WorkerConfig::builder()
                .allowed_task_types(types)
                .strategy(strategy)
                .poll_interval_secs(poll_interval)
                .max_backoff_multiplier(max_backoff)
                .max_iterations(max_iterations)
                .task_timeout(Duration::from_secs(timeout));
            if let Some(id) = id {
                builder = builder.worker_id(id);
            }
            let config = builder.build();

            let processor = Arc::new(IngestProcessor::from_env());
            let registry = HandlerRegistry::new()
                .with("video", processor.clone())
                .with("audio", processor.clone())
                .with("text", processor);
            let sink = Arc::new(FsArtifactSink::new(&output_dir));
            info!("Artifacts will be written to {}", output_dir.display());

            let runtime = WorkerRuntime::new(store.clone(), registry, sink, config);

            if once {
                match runtime.run_once().await? {
                    PollOutcome::Processed(ReportOutcome::Completed) => {
                        println!("Task processed successfully");
                    }
                    PollOutcome::Processed(ReportOutcome::Failed(reason)) => {
                        println!("Task failed: {}", reason);
                    }
                    PollOutcome::Empty => {
                        println!("No queued tasks found");
                    }
                }
                return Ok(());
            }

            // Setup graceful shutdown
            let shutdown = runtime.shutdown_handle();
            setup_signal_handler(shutdown.clone());

            let reaper = reap_after.map(|secs| {
                let reaper = Arc::new(StallReaper::new(
                    store.clone(),
                    Duration::from_secs(secs),
                    Duration::from_secs(secs.clamp(1, 60)),
                ));
                setup_signal_handler(reaper.shutdown_handle());
                let handle = reaper.shutdown_handle();
                let task = tokio::spawn({
                    let reaper = Arc::clone(&reaper);
                    async move { reaper.run().await }
                });
                (handle, task)
            });

            // Run continuous worker loop
            runtime.run().await?;

            if let Some((handle, task)) = reaper {
                handle.store(true, std::sync::atomic::Ordering::Relaxed);
                task.await?;
            }
        }

        Commands::Stats { json } => {
            let store = connect().await?;
            let stats = store.get_stats().await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("=== Task Stats ===\n");
                for status in TaskStatus::ALL {
                    println!("  {:<10} {}", status.as_str(), stats.get(status));
                }
                println!("  {:<10} {}", "total", stats.total());
            }
        }

        Commands::Reap {
            stalled_after,
            interval,
        } => {
            let store = connect().await?;
            let reaper = StallReaper::new(
                store,
                Duration::from_secs(stalled_after),
                Duration::from_secs(interval.unwrap_or(60)),
            );

            if interval.is_some() {
                setup_signal_handler(reaper.shutdown_handle());
                reaper.run().await;
            } else {
                let requeued = reaper.sweep().await?;
                println!("Requeued {} stalled task(s)", requeued.len());
                for id in requeued {
                    println!("  - {}", id);
                }
            }
        }

        Commands::Requeue { id, max_retries } => {
            let store = connect().await?;
            let task_id = TaskId::from(id);
            store.requeue_failed(&task_id, max_retries).await?;
            println!("Task {} requeued", task_id);
        }
    }

    Ok(())
}
