//! Worker configuration

use crate::strategy::ClaimingStrategy;
use std::time::Duration;

/// Worker configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Identity stamped on every claimed task
    pub worker_id: String,

    /// Task types this worker claims, narrowed to registered handlers
    /// (empty = every registered type)
    pub allowed_task_types: Vec<String>,

    /// Base poll interval when no tasks are available
    pub poll_interval: Duration,

    /// Cap on the empty-poll and store-error backoff multipliers
    pub max_backoff_multiplier: u32,

    /// Stop after this many loop iterations
    pub max_iterations: Option<u64>,

    /// Hard timeout for one handler call
    pub task_timeout: Duration,

    /// Claiming strategy
    pub strategy: ClaimingStrategy,

    /// Base sleep after a store failure, doubled per consecutive failure
    pub error_backoff: Duration,
}

/// `worker-` followed by the first 8 hex digits of a random uuid
pub fn generate_worker_id() -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("worker-{}", &uuid[..8])
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: generate_worker_id(),
            allowed_task_types: Vec::new(),
            poll_interval: Duration::from_secs(5),
            max_backoff_multiplier: 8,
            max_iterations: None,
            task_timeout: Duration::from_secs(300), // 5 minutes
            strategy: ClaimingStrategy::default(),
            error_backoff: Duration::from_secs(10),
        }
    }
}

impl WorkerConfig {
    /// Create a new config builder
    pub fn builder() -> WorkerConfigBuilder {
        WorkerConfigBuilder::default()
    }
}

/// Builder for WorkerConfig
#[derive(Default)]
pub struct WorkerConfigBuilder {
    config: WorkerConfig,
}

impl WorkerConfigBuilder {
    /// Set worker id
    pub fn worker_id(mut self, id: impl Into<String>) -> Self {
        self.config.worker_id = id.into();
        self
    }

    /// Set the task types this worker may claim
    pub fn allowed_task_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.allowed_task_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Set poll interval
    pub fn poll_interval(mut self, duration: Duration) -> Self {
        self.config.poll_interval = duration;
        self
    }

    /// Set poll interval in seconds
    pub fn poll_interval_secs(mut self, secs: u64) -> Self {
        self.config.poll_interval = Duration::from_secs(secs);
        self
    }

    /// Set the backoff multiplier cap (at least 1)
    pub fn max_backoff_multiplier(mut self, cap: u32) -> Self {
        self.config.max_backoff_multiplier = cap.max(1);
        self
    }

    /// Stop after `n` loop iterations
    pub fn max_iterations(mut self, n: Option<u64>) -> Self {
        self.config.max_iterations = n;
        self
    }

    /// Set task timeout
    pub fn task_timeout(mut self, duration: Duration) -> Self {
        self.config.task_timeout = duration;
        self
    }

    /// Set claiming strategy
    pub fn strategy(mut self, strategy: ClaimingStrategy) -> Self {
        self.config.strategy = strategy;
        self
    }

    /// Set the sleep applied after a store failure
    pub fn error_backoff(mut self, duration: Duration) -> Self {
        self.config.error_backoff = duration;
        self
    }

    /// Build the config
    pub fn build(self) -> WorkerConfig {
        self.config
    }
}
