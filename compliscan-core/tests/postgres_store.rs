#![cfg(feature = "postgres-tests")]

mod support;

use std::sync::Arc;

use compliscan_core::{
    channel::InProcProgressChannel,
    executor::{ExecutionOutcome, ScanExecutor},
    store::{JobStore, JobUpdate, PostgresJobStore, ReportStore},
    types::{Grade, INITIATED_LOG_LINE, ScanStatus},
};
use sqlx::PgPool;
use support::{FindingRunner, short_plan, tenant};

#[sqlx::test(migrator = "compliscan_core::MIGRATOR")]
async fn claim_is_exclusive_and_tenant_scoped(pool: PgPool) {
    let store = PostgresJobStore::new(pool);
    let job = store.create(tenant(1), "example.com").await.unwrap();

    assert!(store.get(tenant(2), job.id).await.is_err());
    assert!(store.claim(tenant(2), job.id).await.is_err());

    let mut handles = Vec::new();
    for _ in 0..4 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store.claim(tenant(1), job.id).await
        }));
    }
    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);

    let running = store.get(tenant(1), job.id).await.unwrap();
    assert_eq!(running.status, ScanStatus::Running);
    assert_eq!(running.log.len(), 1);
    assert_eq!(running.log[0].message, INITIATED_LOG_LINE);
    assert!(running.lease_id.is_some());
    assert!(store.pending(10).await.unwrap().is_empty());
}

#[sqlx::test(migrator = "compliscan_core::MIGRATOR")]
async fn executor_persists_log_results_and_single_report(pool: PgPool) {
    let store = Arc::new(PostgresJobStore::new(pool));
    let executor = ScanExecutor::new(
        store.clone(),
        store.clone(),
        Arc::new(InProcProgressChannel::default()),
    )
    .with_runner(Arc::new(FindingRunner))
    .with_plan(short_plan());

    let job = store.create(tenant(1), "example.com").await.unwrap();
    let outcome = executor.execute(job.queued()).await;
    assert!(matches!(outcome, ExecutionOutcome::Completed { .. }));

    let stored = store.get(tenant(1), job.id).await.unwrap();
    assert_eq!(stored.status, ScanStatus::Complete);
    assert_eq!(stored.progress, 100);
    assert_eq!(stored.findings.len(), 3);
    let messages: Vec<&str> = stored.log.iter().map(|e| e.message.as_str()).collect();
    assert_eq!(messages[0], INITIATED_LOG_LINE);
    assert_eq!(messages[1], "[10%] Fetching domain info");
    assert_eq!(messages[4], "[100%] Finalizing results");
    assert!(messages[5].starts_with("[COMPLETE] Grade: C"));

    let first = store.report(tenant(1), job.id).await.unwrap();
    let again = store.ensure_report(&stored).await.unwrap();
    assert!(!again.created);
    assert_eq!(again.report.id, first.id);

    let mut rescored = stored.clone();
    if let Some(outcome) = rescored.outcome.as_mut() {
        outcome.grade = Grade::A;
        outcome.risk_score = 4.5;
    }
    let refreshed = store.ensure_report(&rescored).await.unwrap();
    assert!(!refreshed.created);
    assert_eq!(refreshed.report.id, first.id);
    assert_eq!(refreshed.report.created_at, first.created_at);
    assert_eq!(refreshed.report.grade, Grade::A);
    assert_eq!(
        store.report(tenant(1), job.id).await.unwrap().risk_score,
        4.5
    );

    let retried = store
        .update(tenant(1), job.id, JobUpdate::retry())
        .await
        .unwrap();
    assert!(retried.log.is_empty());
    assert!(retried.outcome.is_none());
    assert!(store.get(tenant(1), job.id).await.unwrap().lease_id.is_none());
    assert_eq!(store.pending(10).await.unwrap(), vec![job.queued()]);
    assert_eq!(store.list(tenant(1), 10).await.unwrap().len(), 1);
    assert_eq!(store.count(tenant(1)).await.unwrap(), 1);
}
