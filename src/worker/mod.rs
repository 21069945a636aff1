//! Worker module for polling and processing ingest tasks
//!
//! This module provides:
//! - WorkerRuntime: Main worker loop that claims, dispatches and reports
//! - HandlerRegistry / TaskHandler: per-type domain logic
//! - IngestProcessor: the funnel-backed handler for video, audio and text
//! - StallReaper: requeues tasks abandoned by hung or dead workers
//! - WorkerConfig: Configuration for the worker

pub mod backoff;
pub mod config;
pub mod handler;
pub mod processor;
pub mod reaper;
pub mod task_runner;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

pub use backoff::BackoffState;
pub use config::{WorkerConfig, WorkerConfigBuilder};
pub use handler::{HandlerRegistry, TaskHandler};
pub use processor::IngestProcessor;
pub use reaper::StallReaper;
pub use task_runner::{setup_signal_handler, PollOutcome, WorkerRuntime, WorkerState};

const SHUTDOWN_CHECK: Duration = Duration::from_millis(100);

/// Sleep for `delay`, returning early once `shutdown` is set
pub(crate) async fn sleep_unless_stopped(shutdown: &AtomicBool, delay: Duration) {
    let deadline = tokio::time::Instant::now() + delay;
    loop {
        if shutdown.load(Ordering::Relaxed) {
            return;
        }
        let now = tokio::time::Instant::now();
        if now >= deadline {
            return;
        }
        tokio::time::sleep((deadline - now).min(SHUTDOWN_CHECK)).await;
    }
}
