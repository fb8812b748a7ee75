use std::time::Duration;

use anyhow::Result;
use axum_test::TestServer;
use compliscan_server::{
    infra::{
        config::Config,
        startup::{Runtime, build_memory_runtime},
    },
    routes::create_router,
};
use serde_json::Value;
use uuid::Uuid;

pub const TENANT_HEADER: &str = "x-tenant-id";

// Shared by several test binaries; not every one uses every helper.
#[allow(unused)]
pub struct TestApp {
    pub server: TestServer,
    pub runtime: Runtime,
}

/// Steps finish immediately.
#[allow(unused)]
pub async fn fast_app() -> Result<TestApp> {
    build_app(0).await
}

/// Steps take a minute, so scans stay active for the whole test.
#[allow(unused)]
pub async fn slow_app() -> Result<TestApp> {
    build_app(60_000).await
}

async fn build_app(step_delay_ms: u64) -> Result<TestApp> {
    let mut config = Config::default();
    config.scanner.workers = 2;
    config.scanner.step_delay_ms = step_delay_ms;

    let runtime = build_memory_runtime(config, |executor| executor).await?;
    let server = TestServer::new(create_router(runtime.state.clone()))?;
    Ok(TestApp { server, runtime })
}

#[allow(unused)]
pub fn tenant() -> String {
    Uuid::new_v4().to_string()
}

#[allow(unused)]
pub async fn submit(app: &TestApp, tenant: &str, domain: &str) -> String {
    let response = app
        .server
        .post("/api/v1/scans")
        .add_header(TENANT_HEADER, tenant)
        .json(&serde_json::json!({ "domain": domain }))
        .await;
    response.assert_status(axum::http::StatusCode::ACCEPTED);
    let body: Value = response.json();
    body["data"]["job_id"]
        .as_str()
        .expect("job_id in response")
        .to_string()
}

/// Poll the snapshot until the scan reaches `status`.
#[allow(unused)]
pub async fn wait_for_status(
    app: &TestApp,
    tenant: &str,
    job_id: &str,
    status: &str,
) -> Value {
    for _ in 0..500 {
        let body: Value = app
            .server
            .get(&format!("/api/v1/scans/{job_id}"))
            .add_header(TENANT_HEADER, tenant)
            .await
            .json();
        if body["data"]["status"] == status {
            return body["data"].clone();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("scan {job_id} never reached {status}");
}
