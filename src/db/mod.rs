//! Database module for ingest_worker
//!
//! Provides PostgreSQL operations for ingest_tasks and ingest_artifacts.

pub mod artifacts;
pub mod connection;
pub mod models;
pub mod store;
pub mod tasks;

pub use artifacts::PgArtifactSink;
pub use connection::{create_pool, create_pool_from_env, run_migrations, DbPool};
pub use models::*;
pub use store::PgTaskStore;
