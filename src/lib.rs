//! Ingest Worker - a task queue and worker runtime for content ingestion
//!
//! Workers pull tasks from a shared queue, turn video, audio and text
//! sources into normalized text artifacts, and report the outcome back to
//! the queue. The moving parts:
//!
//! - [`TaskStore`] - durable queue with an atomic claim
//!   ([`MemoryTaskStore`] in-process, [`db::PgTaskStore`] on Postgres)
//! - [`ClaimingStrategy`] - FIFO, LIFO, Priority or weighted sampling
//! - [`worker::WorkerRuntime`] - poll, claim, dispatch, report
//! - [`ContentFunnel`] - subtitle first, transcription as fallback, with
//!   one provenance record per attempted stage
//! - [`ResultReporter`] - stores the artifact before marking a task done
//!
//! # Example
//! ```ignore
//! use ingest_worker::worker::{HandlerRegistry, IngestProcessor, WorkerConfig, WorkerRuntime};
//! use ingest_worker::{FsArtifactSink, MemoryTaskStore, NewTask, TaskStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> ingest_worker::Result<()> {
//!     let store = Arc::new(MemoryTaskStore::new());
//!     store
//!         .add_task(NewTask::new("text").parameters(serde_json::json!({"source": "hello"})))
//!         .await?;
//!
//!     let registry = HandlerRegistry::new().with("text", Arc::new(IngestProcessor::from_env()));
//!     let config = WorkerConfig::builder().max_iterations(Some(1)).build();
//!     let runtime = WorkerRuntime::new(store, registry, Arc::new(FsArtifactSink::new("./artifacts")), config);
//!     runtime.run().await
//! }
//! ```

pub mod db;
pub mod error;
pub mod funnel;
pub mod reporter;
pub mod store;
pub mod strategy;
pub mod task;
pub mod worker;

pub use error::{IngestError, Result};
pub use funnel::{
    ContentArtifact, ContentFunnel, FunnelOptions, SourceType, TransformationStage,
};
pub use reporter::{
    sanitize_file_name, ArtifactSink, FsArtifactSink, MemoryArtifactSink, ReportOutcome,
    ResultReporter,
};
pub use store::{MemoryTaskStore, TaskStore};
pub use strategy::{ClaimingStrategy, OrderingKey, WeightedSampler};
pub use task::{NewTask, Task, TaskId, TaskStats, TaskStatus};
