//! Postgres task store tests
//!
//! Run with a scratch database:
//! `DATABASE_URL=postgres://... cargo test --test pg_store -- --ignored --test-threads=1`

use ingest_worker::db::{create_pool_from_env, run_migrations, DbPool, PgArtifactSink, PgTaskStore};
use ingest_worker::{
    ArtifactSink, ClaimingStrategy, ContentArtifact, IngestError, NewTask, SourceType, TaskId,
    TaskStatus, TaskStore,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

async fn setup() -> DbPool {
    dotenvy::dotenv().ok();
    let pool = create_pool_from_env().await.unwrap();
    run_migrations(&pool).await.unwrap();
    sqlx::query("TRUNCATE ingest_artifacts, ingest_tasks")
        .execute(&pool)
        .await
        .unwrap();
    pool
}

async fn claim_all(store: &PgTaskStore, strategy: ClaimingStrategy) -> Vec<String> {
    let mut order = Vec::new();
    while let Some(task) = store.claim_task("w1", &[], strategy).await.unwrap() {
        order.push(task.id.to_string());
    }
    order
}

#[tokio::test]
#[ignore] // Requires database
async fn test_pg_priority_order_and_duplicates() {
    let store = PgTaskStore::new(setup().await);
    store.add_task(NewTask::new("text").id("A").priority(5)).await.unwrap();
    store.add_task(NewTask::new("text").id("B").priority(5)).await.unwrap();
    store.add_task(NewTask::new("text").id("C").priority(9)).await.unwrap();

    let err = store.add_task(NewTask::new("text").id("A")).await.unwrap_err();
    assert!(matches!(err, IngestError::DuplicateTask(_)));

    assert_eq!(claim_all(&store, ClaimingStrategy::Priority).await, ["C", "A", "B"]);
}

#[tokio::test]
#[ignore] // Requires database
async fn test_pg_fifo_and_lifo() {
    let store = PgTaskStore::new(setup().await);
    for id in ["t1", "t2", "t3"] {
        store.add_task(NewTask::new("text").id(id)).await.unwrap();
    }
    assert_eq!(claim_all(&store, ClaimingStrategy::Lifo).await, ["t3", "t2", "t1"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore] // Requires database
async fn test_pg_no_double_claim() {
    let store = Arc::new(PgTaskStore::new(setup().await));
    for i in 0..5 {
        store
            .add_task(NewTask::new("video").id(format!("t{i}")))
            .await
            .unwrap();
    }

    let handles: Vec<_> = (0..12)
        .map(|w| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .claim_task(&format!("w{w}"), &[], ClaimingStrategy::Fifo)
                    .await
                    .unwrap()
            })
        })
        .collect();

    let mut claimed = HashSet::new();
    for handle in handles {
        if let Some(task) = handle.await.unwrap() {
            assert!(claimed.insert(task.id));
        }
    }
    assert_eq!(claimed.len(), 5);
}

#[tokio::test]
#[ignore] // Requires database
async fn test_pg_status_updates_and_requeue() {
    let store = PgTaskStore::new(setup().await);
    store.add_task(NewTask::new("audio").id("a1")).await.unwrap();
    let task = store
        .claim_task("w1", &["audio".to_string()], ClaimingStrategy::Priority)
        .await
        .unwrap()
        .unwrap();

    let err = store
        .update_status(&task.id, "w2", TaskStatus::Completed, None)
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::NotOwner { .. }));

    store
        .update_status(&task.id, "w1", TaskStatus::Failed, Some("boom"))
        .await
        .unwrap();
    let failed = store.get_task(&task.id).await.unwrap().unwrap();
    assert_eq!(failed.retry_count, 1);
    assert_eq!(failed.error_message.as_deref(), Some("boom"));

    let err = store.requeue_failed(&task.id, 1).await.unwrap_err();
    assert!(matches!(err, IngestError::RetriesExhausted { .. }));
    store.requeue_failed(&task.id, 3).await.unwrap();
    assert_eq!(
        store.get_task(&task.id).await.unwrap().unwrap().status,
        TaskStatus::Queued
    );

    let stats = store.get_stats().await.unwrap();
    assert_eq!(stats.queued, 1);
}

#[tokio::test]
#[ignore] // Requires database
async fn test_pg_requeue_stalled() {
    let store = PgTaskStore::new(setup().await);
    store.add_task(NewTask::new("video").id("v1")).await.unwrap();
    store
        .claim_task("w1", &[], ClaimingStrategy::Fifo)
        .await
        .unwrap()
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let requeued = store.requeue_stalled(Duration::from_millis(10)).await.unwrap();
    assert_eq!(requeued, vec![TaskId::from("v1")]);
}

#[tokio::test]
#[ignore] // Requires database
async fn test_pg_artifact_sink_upserts() {
    let pool = setup().await;
    let store = PgTaskStore::new(pool.clone());
    store.add_task(NewTask::new("text").id("t1")).await.unwrap();
    let task = store
        .claim_task("w1", &[], ClaimingStrategy::Fifo)
        .await
        .unwrap()
        .unwrap();

    let sink = PgArtifactSink::new(pool.clone());
    let mut artifact = ContentArtifact::new("t1", "Title", SourceType::Text, "v1");
    artifact.content = "v1".to_string();
    sink.persist(&task, &artifact).await.unwrap();
    artifact.content = "v2".to_string();
    sink.persist(&task, &artifact).await.unwrap();

    let row = ingest_worker::db::artifacts::get_artifact_by_id(&pool, "t1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.content, "v2");
    assert_eq!(row.source_type, "text");
}
