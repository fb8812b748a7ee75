use anyhow::Result;
use axum::http::{StatusCode, header::RETRY_AFTER};
use serde_json::{Value, json};

#[path = "support/mod.rs"]
mod support;

use support::{TENANT_HEADER, fast_app, slow_app, submit, tenant, wait_for_status};

#[tokio::test]
async fn health_is_public() -> Result<()> {
    let app = fast_app().await?;

    let response = app.server.get("/health").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "ok");

    app.runtime.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn scan_routes_require_a_tenant() -> Result<()> {
    let app = fast_app().await?;

    app.server
        .get("/api/v1/scans")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
    app.server
        .get("/api/v1/scans")
        .add_header(TENANT_HEADER, "not-a-uuid")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    app.runtime.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn submitted_scan_runs_to_completion() -> Result<()> {
    let app = fast_app().await?;
    let tenant = tenant();

    let response = app
        .server
        .post("/api/v1/scans")
        .add_header(TENANT_HEADER, tenant.as_str())
        .json(&json!({ "domain": "  example.com " }))
        .await;
    response.assert_status(StatusCode::ACCEPTED);
    let body: Value = response.json();
    assert_eq!(body["status"], "success");
    assert_eq!(body["data"]["status"], "pending");
    let job_id = body["data"]["job_id"].as_str().unwrap().to_string();

    let snapshot = wait_for_status(&app, &tenant, &job_id, "complete").await;
    assert_eq!(snapshot["domain"], "example.com");
    assert_eq!(snapshot["progress"], 100);
    assert!(snapshot["grade"].is_string());
    assert!(snapshot["risk_score"].is_number());
    let log = snapshot["log"].as_array().unwrap();
    assert!(
        log.last().unwrap()["message"]
            .as_str()
            .unwrap()
            .starts_with("[COMPLETE] Grade:")
    );

    let report: Value = app
        .server
        .get(&format!("/api/v1/scans/{job_id}/report"))
        .add_header(TENANT_HEADER, tenant.as_str())
        .await
        .json();
    assert_eq!(report["data"]["job_id"], job_id.as_str());
    assert_eq!(report["data"]["grade"], snapshot["grade"]);

    let list: Value = app
        .server
        .get("/api/v1/scans")
        .add_header(TENANT_HEADER, tenant.as_str())
        .await
        .json();
    assert_eq!(list["data"]["total"], 1);
    assert_eq!(list["data"]["scans"][0]["id"], job_id.as_str());
    assert_eq!(list["data"]["latest_grade"], snapshot["grade"]);

    app.runtime.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn invalid_submissions_are_rejected() -> Result<()> {
    let app = fast_app().await?;
    let tenant = tenant();

    let empty = app
        .server
        .post("/api/v1/scans")
        .add_header(TENANT_HEADER, tenant.as_str())
        .json(&json!({ "domain": "   " }))
        .await;
    empty.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = empty.json();
    assert_eq!(body["error"]["status"], 400);

    app.server
        .post("/api/v1/scans")
        .add_header(TENANT_HEADER, tenant.as_str())
        .json(&json!({ "target": "example.com" }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    app.runtime.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn fourth_submission_in_a_minute_is_throttled() -> Result<()> {
    let app = slow_app().await?;
    let tenant = tenant();

    for i in 0..3 {
        submit(&app, &tenant, &format!("site{i}.example")).await;
    }

    let response = app
        .server
        .post("/api/v1/scans")
        .add_header(TENANT_HEADER, tenant.as_str())
        .json(&json!({ "domain": "site3.example" }))
        .await;
    response.assert_status(StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = response.header(RETRY_AFTER).to_str()?.parse()?;
    assert!((1..=60).contains(&retry_after));

    // Another tenant has its own window.
    submit(&app, &support::tenant(), "site3.example").await;

    let list: Value = app
        .server
        .get("/api/v1/scans")
        .add_header(TENANT_HEADER, tenant.as_str())
        .await
        .json();
    assert_eq!(list["data"]["total"], 3);
    Ok(())
}

#[tokio::test]
async fn foreign_tenant_sees_not_found() -> Result<()> {
    let app = slow_app().await?;
    let owner = tenant();
    let stranger = tenant();
    let job_id = submit(&app, &owner, "example.com").await;

    for path in [
        format!("/api/v1/scans/{job_id}"),
        format!("/api/v1/scans/{job_id}/report"),
        format!("/api/v1/scans/{job_id}/events"),
    ] {
        app.server
            .get(&path)
            .add_header(TENANT_HEADER, stranger.as_str())
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }
    app.server
        .post(&format!("/api/v1/scans/{job_id}/cancel"))
        .add_header(TENANT_HEADER, stranger.as_str())
        .await
        .assert_status(StatusCode::NOT_FOUND);

    let list: Value = app
        .server
        .get("/api/v1/scans")
        .add_header(TENANT_HEADER, stranger.as_str())
        .await
        .json();
    assert_eq!(list["data"]["total"], 0);
    assert_eq!(list["data"]["latest_grade"], Value::Null);
    Ok(())
}

#[tokio::test]
async fn cancel_then_retry() -> Result<()> {
    let app = slow_app().await?;
    let tenant = tenant();
    let job_id = submit(&app, &tenant, "example.com").await;

    app.server
        .get(&format!("/api/v1/scans/{job_id}/report"))
        .add_header(TENANT_HEADER, tenant.as_str())
        .await
        .assert_status(StatusCode::NOT_FOUND);

    let cancelled = app
        .server
        .post(&format!("/api/v1/scans/{job_id}/cancel"))
        .add_header(TENANT_HEADER, tenant.as_str())
        .await;
    cancelled.assert_status_ok();
    let body: Value = cancelled.json();
    assert_eq!(body["data"]["status"], "cancelled");

    let again = app
        .server
        .post(&format!("/api/v1/scans/{job_id}/cancel"))
        .add_header(TENANT_HEADER, tenant.as_str())
        .await;
    again.assert_status(StatusCode::CONFLICT);

    let retried = app
        .server
        .post(&format!("/api/v1/scans/{job_id}/retry"))
        .add_header(TENANT_HEADER, tenant.as_str())
        .await;
    retried.assert_status(StatusCode::ACCEPTED);
    let body: Value = retried.json();
    assert_eq!(body["data"]["status"], "pending");
    assert_eq!(body["data"]["job_id"], job_id.as_str());
    Ok(())
}

#[tokio::test]
async fn retry_of_active_scan_conflicts() -> Result<()> {
    let app = slow_app().await?;
    let tenant = tenant();
    let job_id = submit(&app, &tenant, "example.com").await;

    app.server
        .post(&format!("/api/v1/scans/{job_id}/retry"))
        .add_header(TENANT_HEADER, tenant.as_str())
        .await
        .assert_status(StatusCode::CONFLICT);
    Ok(())
}

#[tokio::test]
async fn events_of_finished_scan_replay_snapshot_and_close() -> Result<()> {
    let app = fast_app().await?;
    let tenant = tenant();
    let job_id = submit(&app, &tenant, "example.com").await;
    wait_for_status(&app, &tenant, &job_id, "complete").await;

    let response = app
        .server
        .get(&format!("/api/v1/scans/{job_id}/events"))
        .add_header(TENANT_HEADER, tenant.as_str())
        .await;
    response.assert_status_ok();
    let body = response.text();
    assert!(body.contains("event: connected"));
    assert!(body.contains("\"type\":\"connected\""));
    assert!(body.contains("event: complete"));
    assert!(body.contains("\"force_reload\":true"));

    app.runtime.shutdown().await;
    Ok(())
}
