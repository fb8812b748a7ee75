mod support;

use std::sync::Arc;

use compliscan_core::{
    ScanError,
    channel::{ProgressEvent, ProgressPublisher, ProgressSubscriber},
    notify::NotificationGateway,
    store::JobStore,
    types::{Grade, ScanStatus},
};
use futures::StreamExt;
use serde_json::{Value, json};
use support::{FindingRunner, GatedRunner, Harness, drain_until_terminal, tenant};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn subscribers_only_see_their_own_job_while_both_run() {
    let harness = Harness::new();
    let x = harness.store.create(tenant(1), "x.example").await.unwrap();
    let y = harness.store.create(tenant(2), "y.example").await.unwrap();

    let mut watch_x = harness.channel.subscribe(x.id).await.unwrap();
    let mut watch_y = harness.channel.subscribe(y.id).await.unwrap();

    let runner_x = Arc::new(GatedRunner::new(20));
    let runner_y = Arc::new(GatedRunner::new(20));
    let executor_x = harness.executor(runner_x.clone());
    let executor_y = harness.executor(runner_y.clone());
    let (queued_x, queued_y) = (x.queued(), y.queued());
    let run_x = tokio::spawn(async move { executor_x.execute(queued_x).await });
    let run_y = tokio::spawn(async move { executor_y.execute(queued_y).await });

    // Both jobs are mid-run at the same time before either is let go.
    runner_x.entered.notified().await;
    runner_y.entered.notified().await;
    runner_y.release.notify_one();
    runner_x.release.notify_one();
    run_x.await.unwrap();
    run_y.await.unwrap();

    for (watch, job_id) in [(&mut watch_x, x.id), (&mut watch_y, y.id)] {
        let frames = drain_until_terminal(watch).await;
        assert_eq!(frames.len(), 5);
        assert!(frames.iter().all(|frame| frame.job_id == job_id));
        assert!(frames.windows(2).all(|w| w[0].sequence < w[1].sequence));
        assert!(frames.last().unwrap().event.is_terminal());
    }
    assert_eq!(harness.channel.topic_count(), 2);

    drop(watch_x);
    assert_eq!(harness.channel.topic_count(), 1);
    drop(watch_y);
    assert_eq!(harness.channel.topic_count(), 0);
}

#[tokio::test]
async fn feed_acknowledges_then_relays_until_terminal() {
    let harness = Harness::new();
    let gateway = NotificationGateway::new(harness.store.clone(), harness.channel.clone());
    let job = harness.store.create(tenant(1), "example.com").await.unwrap();

    let mut feed = gateway.connect(tenant(1), job.id).await.unwrap();

    let ack = serde_json::to_value(feed.next().await.unwrap()).unwrap();
    assert_eq!(
        ack,
        json!({
            "type": "connected",
            "job_id": job.id,
            "status": "pending",
            "progress": 0,
        })
    );

    let snapshot = serde_json::to_value(feed.next().await.unwrap()).unwrap();
    assert_eq!(snapshot["status"], "pending");
    assert_eq!(snapshot["step"], "Scan initiated...");
    assert_eq!(snapshot["grade"], Value::Null);

    harness
        .channel
        .publish(job.id, ProgressEvent::running(25, "Analyzing cookies & consent banners"))
        .await
        .unwrap();
    harness
        .channel
        .publish(
            job.id,
            ProgressEvent::Complete {
                progress: 100,
                grade: Grade::B,
                risk_score: 17.0,
            },
        )
        .await
        .unwrap();

    let update = serde_json::to_value(feed.next().await.unwrap()).unwrap();
    assert_eq!(
        update,
        json!({
            "progress": 25,
            "step": "Analyzing cookies & consent banners",
            "grade": null,
            "risk_score": null,
            "status": "running",
        })
    );

    let complete = serde_json::to_value(feed.next().await.unwrap()).unwrap();
    assert_eq!(
        complete,
        json!({
            "type": "complete",
            "force_reload": true,
            "progress": 100,
            "grade": "B",
            "risk_score": 17.0,
        })
    );

    assert!(feed.next().await.is_none());
    assert_eq!(harness.channel.topic_count(), 0);
}

#[tokio::test]
async fn failed_event_carries_the_error() {
    let harness = Harness::new();
    let gateway = NotificationGateway::new(harness.store.clone(), harness.channel.clone());
    let job = harness.store.create(tenant(1), "example.com").await.unwrap();
    let mut feed = gateway.connect(tenant(1), job.id).await.unwrap();
    feed.next().await;
    feed.next().await;

    harness
        .channel
        .publish(
            job.id,
            ProgressEvent::Failed {
                progress: 45,
                error: "dns lookup failed".into(),
            },
        )
        .await
        .unwrap();

    let failed = serde_json::to_value(feed.next().await.unwrap()).unwrap();
    assert_eq!(failed["status"], "failed");
    assert_eq!(failed["progress"], 45);
    assert_eq!(failed["error"], "dns lookup failed");
    assert!(feed.next().await.is_none());
}

#[tokio::test]
async fn finished_jobs_get_a_snapshot_and_a_closed_feed() {
    let harness = Harness::new();
    let gateway = NotificationGateway::new(harness.store.clone(), harness.channel.clone());
    let job = harness.store.create(tenant(1), "example.com").await.unwrap();
    harness
        .executor(Arc::new(FindingRunner))
        .execute(job.queued())
        .await;

    let messages: Vec<Value> = gateway
        .connect(tenant(1), job.id)
        .await
        .unwrap()
        .map(|message| serde_json::to_value(message).unwrap())
        .collect()
        .await;

    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["status"], "complete");
    assert_eq!(messages[0]["progress"], 100);
    assert_eq!(messages[1]["type"], "complete");
    assert_eq!(messages[1]["grade"], "C");
    assert_eq!(harness.channel.topic_count(), 0);
}

#[tokio::test]
async fn foreign_tenants_cannot_connect() {
    let harness = Harness::new();
    let gateway = NotificationGateway::new(harness.store.clone(), harness.channel.clone());
    let job = harness.store.create(tenant(1), "example.com").await.unwrap();

    let err = gateway.connect(tenant(2), job.id).await.unwrap_err();
    assert!(matches!(err, ScanError::NotFound(id) if id == job.id));
    assert_eq!(harness.channel.topic_count(), 0);

    let running = harness.store.claim(tenant(1), job.id).await.unwrap();
    assert_eq!(running.status, ScanStatus::Running);
}
