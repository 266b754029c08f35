use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use studyblock::db::repository;
use studyblock::models::CompletionStatus;
use studyblock::services::{Reconciler, SyncScheduler};
use studyblock::upstream::{StaticUpstreamClient, UnconfiguredUpstreamClient, UpstreamRecord};

async fn setup_test_db() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create database");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");
    pool
}

#[tokio::test]
async fn test_scheduler_run_once_with_no_students() {
    let pool = setup_test_db().await;
    let reconciler = Reconciler::new(pool, Arc::new(StaticUpstreamClient::new()));

    let scheduler = SyncScheduler::new(reconciler, 10);
    let outcomes = scheduler.run_once().await;
    assert!(outcomes.is_empty());
}

#[tokio::test]
async fn test_unconfigured_upstream_never_deletes() {
    let pool = setup_test_db().await;
    Reconciler::new(pool.clone(), Arc::new(StaticUpstreamClient::new()))
        .reconcile("s1", &[UpstreamRecord::new("1", "Reading log")])
        .await
        .expect("Failed to seed");

    let scheduler = SyncScheduler::new(
        Reconciler::new(pool.clone(), Arc::new(UnconfiguredUpstreamClient)),
        10,
    );
    let outcomes = scheduler.run_once().await;
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].error.is_some());

    let rows = repository::fetch_assignments(&pool, "s1", false).await.unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn test_scheduler_short_interval() {
    let pool = setup_test_db().await;
    let upstream = Arc::new(StaticUpstreamClient::new());
    let reconciler = Reconciler::new(pool.clone(), upstream.clone());

    reconciler
        .reconcile("s1", &[UpstreamRecord::new("1", "Reading log")])
        .await
        .expect("Failed to seed");
    upstream.set_snapshot("s1", vec![UpstreamRecord::new("1", "Reading log").graded(true)]);

    let scheduler = SyncScheduler::new(reconciler, 1);
    let scheduler_task = tokio::spawn(async move {
        scheduler.start().await;
    });

    tokio::time::sleep(Duration::from_millis(1500)).await;
    scheduler_task.abort();

    let row = repository::find_by_upstream_id(&pool, "s1", "1")
        .await
        .unwrap()
        .expect("assignment missing");
    assert_eq!(row.status, CompletionStatus::Completed);
}
