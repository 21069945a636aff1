//! Worker runtime - main polling loop

use crate::error::{IngestError, Result};
use crate::reporter::{ArtifactSink, ReportOutcome, ResultReporter};
use crate::store::TaskStore;
use crate::task::Task;
use crate::worker::backoff::BackoffState;
use crate::worker::handler::HandlerRegistry;
use crate::worker::{sleep_unless_stopped, WorkerConfig};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

/// Lifecycle of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Polling,
    Processing,
    Reporting,
    Stopping,
    Stopped,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkerState::Idle => "idle",
            WorkerState::Polling => "polling",
            WorkerState::Processing => "processing",
            WorkerState::Reporting => "reporting",
            WorkerState::Stopping => "stopping",
            WorkerState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Result of one poll-claim-process-report cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// A task was claimed and reported
    Processed(ReportOutcome),
    /// Nothing eligible was queued
    Empty,
}

/// Polls one store, one task at a time, until shutdown
pub struct WorkerRuntime {
    store: Arc<dyn TaskStore>,
    registry: HandlerRegistry,
    reporter: ResultReporter,
    config: WorkerConfig,
    allowed_types: Vec<String>,
    shutdown: Arc<AtomicBool>,
    state: Mutex<WorkerState>,
    backoff: Mutex<BackoffState>,
    store_backoff: Mutex<BackoffState>,
    iterations: AtomicU64,
}

impl WorkerRuntime {
    /// Create a new runtime. The worker only claims types it has a handler
    /// for: the configured types narrowed to the registry, or every
    /// registered type when the config names none. With no claimable type
    /// left the worker never claims.
    pub fn new(
        store: Arc<dyn TaskStore>,
        registry: HandlerRegistry,
        sink: Arc<dyn ArtifactSink>,
        config: WorkerConfig,
    ) -> Self {
        let allowed_types = if config.allowed_task_types.is_empty() {
            registry.task_types()
        } else {
            let (known, unknown): (Vec<String>, Vec<String>) = config
                .allowed_task_types
                .iter()
                .cloned()
                .partition(|task_type| registry.contains(task_type));
            if !unknown.is_empty() {
                warn!("No handler registered for task types {:?}, not claiming them", unknown);
            }
            known
        };
        if allowed_types.is_empty() {
            warn!("Worker {} has no claimable task types", config.worker_id);
        }

        Self {
            reporter: ResultReporter::new(Arc::clone(&store), sink),
            store,
            registry,
            backoff: Mutex::new(BackoffState::new(config.max_backoff_multiplier)),
            store_backoff: Mutex::new(BackoffState::new(config.max_backoff_multiplier)),
            config,
            allowed_types,
            shutdown: Arc::new(AtomicBool::new(false)),
            state: Mutex::new(WorkerState::Idle),
            iterations: AtomicU64::new(0),
        }
    }

    /// Get a handle to signal shutdown
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn worker_id(&self) -> &str {
        &self.config.worker_id
    }

    pub fn allowed_types(&self) -> &[String] {
        &self.allowed_types
    }

    pub fn state(&self) -> WorkerState {
        *lock(&self.state)
    }

    pub fn backoff(&self) -> BackoffState {
        *lock(&self.backoff)
    }

    /// Backoff applied after store errors, separate from the empty-poll one
    pub fn store_backoff(&self) -> BackoffState {
        *lock(&self.store_backoff)
    }

    /// Loop iterations completed so far
    pub fn iterations(&self) -> u64 {
        self.iterations.load(Ordering::Relaxed)
    }

    fn set_state(&self, state: WorkerState) {
        *lock(&self.state) = state;
    }

    fn stop_requested(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Main worker loop
    ///
    /// Polls for queued tasks and processes them until shutdown is signaled
    /// or `max_iterations` is reached. An in-flight task is always finished
    /// before the loop exits.
    pub async fn run(&self) -> Result<()> {
        info!("Starting ingest worker {}...", self.config.worker_id);
        info!("Task types: {:?}", self.allowed_types);
        info!("Strategy: {}", self.config.strategy);
        info!("Poll interval: {:?}", self.config.poll_interval);
        info!("Task timeout: {:?}", self.config.task_timeout);

        loop {
            // Check for shutdown signal
            if self.stop_requested() {
                info!("Shutdown signal received, stopping worker...");
                break;
            }
            if let Some(max) = self.config.max_iterations {
                if self.iterations() >= max {
                    info!("Reached {} iterations, stopping worker...", max);
                    break;
                }
            }

            match self.process_one_task().await {
                Ok(PollOutcome::Processed(_)) => {
                    debug!("Task reported, checking for next task...");
                }
                Ok(PollOutcome::Empty) => {
                    let delay = lock(&self.backoff).next_delay(self.config.poll_interval);
                    debug!("No queued tasks, sleeping for {:?}", delay);
                    sleep_unless_stopped(&self.shutdown, delay).await;
                }
                Err(e) => {
                    let delay = lock(&self.store_backoff).next_delay(self.config.error_backoff);
                    if e.is_transient() {
                        warn!("Store error, retrying in {:?}: {}", delay, e);
                    } else {
                        error!("Worker error, retrying in {:?}: {}", delay, e);
                    }
                    self.set_state(WorkerState::Idle);
                    sleep_unless_stopped(&self.shutdown, delay).await;
                }
            }
            self.iterations.fetch_add(1, Ordering::Relaxed);
        }

        self.set_state(WorkerState::Stopping);
        self.set_state(WorkerState::Stopped);
        info!("Worker stopped after {} iterations", self.iterations());
        Ok(())
    }

    /// Process a single task (used by `--once`)
    ///
    /// Returns `Err` only for store failures; handler failures and timeouts
    /// come back as `Processed(Failed(..))`.
    pub async fn process_one_task(&self) -> Result<PollOutcome> {
        if self.allowed_types.is_empty() {
            // An empty filter means "any type" to the store
            return Ok(PollOutcome::Empty);
        }
        self.set_state(WorkerState::Polling);
        let claimed = self
            .store
            .claim_task(&self.config.worker_id, &self.allowed_types, self.config.strategy)
            .await?;
        lock(&self.store_backoff).reset();
        let Some(task) = claimed else {
            self.set_state(WorkerState::Idle);
            return Ok(PollOutcome::Empty);
        };
        lock(&self.backoff).reset();
        info!("Claimed task {} ({})", task.id, task.task_type);

        self.set_state(WorkerState::Processing);
        let result = self.dispatch(&task).await;

        self.set_state(WorkerState::Reporting);
        let outcome = match result {
            Ok(artifact) => self.reporter.report_success(&task, &artifact).await,
            Err(e) => {
                error!("Task {} failed: {}", task.id, e);
                self.reporter.report_failure(&task, &e.to_string()).await
            }
        };

        self.set_state(WorkerState::Idle);
        Ok(PollOutcome::Processed(outcome?))
    }

    /// Run once and exit (for testing)
    pub async fn run_once(&self) -> Result<PollOutcome> {
        info!("Running worker in single-task mode...");
        let outcome = self.process_one_task().await;
        self.set_state(WorkerState::Stopped);
        outcome
    }

    /// Run the handler on its own tokio task under the hard timeout, so a
    /// panic or a hang becomes a task error instead of killing the loop.
    async fn dispatch(&self, task: &Task) -> Result<crate::funnel::ContentArtifact> {
        let handler = self.registry.get(&task.task_type)?;
        let owned = task.clone();
        let mut handle = tokio::spawn(async move { handler.process(&owned).await });

        match tokio::time::timeout(self.config.task_timeout, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(IngestError::Handler(format!("handler aborted: {join_err}"))),
            Err(_) => {
                handle.abort();
                error!("Task {} timed out after {:?}", task.id, self.config.task_timeout);
                Err(IngestError::TaskTimeout)
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Setup signal handlers for graceful shutdown
pub fn setup_signal_handler(shutdown: Arc<AtomicBool>) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, finishing in-flight task before shutdown...");
                shutdown.store(true, Ordering::Relaxed);
            }
            Err(e) => {
                error!("Failed to listen for Ctrl+C: {}", e);
            }
        }
    });
}
