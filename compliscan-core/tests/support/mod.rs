//! Shared fixtures for core integration tests.
#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use compliscan_core::{
    channel::{InProcProgressChannel, ProgressFrame, Subscription},
    error::{Result, ScanError},
    executor::{ScanExecutor, ScanPlan, ScanStep, StepOutput, StepRunner},
    store::MemoryJobStore,
    types::{ScanJob, TenantId},
};
use futures::StreamExt;
use tokio::sync::Notify;
use uuid::Uuid;

pub fn tenant(n: u128) -> TenantId {
    TenantId(Uuid::from_u128(n))
}

/// Three short steps; keeps assertions readable.
pub fn short_plan() -> ScanPlan {
    ScanPlan::new(vec![
        ScanStep::new("Fetching domain info", 10),
        ScanStep::new("Checking DNS records", 20),
        ScanStep::new("Testing TLS/SSL configuration", 30),
    ])
    .expect("valid plan")
}

pub struct Harness {
    pub store: Arc<MemoryJobStore>,
    pub channel: Arc<InProcProgressChannel>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryJobStore::new()),
            channel: Arc::new(InProcProgressChannel::default()),
        }
    }

    pub fn executor(&self, runner: Arc<dyn StepRunner>) -> ScanExecutor {
        ScanExecutor::new(
            self.store.clone(),
            self.store.clone(),
            self.channel.clone(),
        )
        .with_runner(runner)
        .with_plan(short_plan())
    }
}

/// Emits one finding per step, instantly.
#[derive(Debug, Default)]
pub struct FindingRunner;

#[async_trait]
impl StepRunner for FindingRunner {
    async fn run(&self, _job: &ScanJob, step: &ScanStep) -> Result<StepOutput> {
        Ok(StepOutput {
            findings: vec![format!("Non-compliant {}", step.name.to_lowercase())],
            ..StepOutput::default()
        })
    }
}

/// Fails when it reaches the step with `target`.
#[derive(Debug)]
pub struct FailingRunner {
    pub fail_at: u8,
}

#[async_trait]
impl StepRunner for FailingRunner {
    async fn run(&self, job: &ScanJob, step: &ScanStep) -> Result<StepOutput> {
        if step.target == self.fail_at {
            return Err(ScanError::Execution("dns lookup failed".into()));
        }
        FindingRunner.run(job, step).await
    }
}

/// Takes `per_step` of (virtual) time on every step.
#[derive(Debug)]
pub struct SlowRunner {
    pub per_step: Duration,
}

#[async_trait]
impl StepRunner for SlowRunner {
    async fn run(&self, _job: &ScanJob, _step: &ScanStep) -> Result<StepOutput> {
        tokio::time::sleep(self.per_step).await;
        Ok(StepOutput::default())
    }
}

/// Parks inside the step with `target` until released.
#[derive(Debug)]
pub struct GatedRunner {
    pub gate_at: u8,
    pub entered: Notify,
    pub release: Notify,
}

impl GatedRunner {
    pub fn new(gate_at: u8) -> Self {
        Self {
            gate_at,
            entered: Notify::new(),
            release: Notify::new(),
        }
    }
}

#[async_trait]
impl StepRunner for GatedRunner {
    async fn run(&self, job: &ScanJob, step: &ScanStep) -> Result<StepOutput> {
        if step.target == self.gate_at {
            self.entered.notify_one();
            self.release.notified().await;
        }
        FindingRunner.run(job, step).await
    }
}

/// Everything already buffered on `subscription` up to and including the
/// first terminal frame.
pub async fn drain_until_terminal(subscription: &mut Subscription) -> Vec<ProgressFrame> {
    let mut frames = Vec::new();
    while let Ok(Some(frame)) =
        tokio::time::timeout(Duration::from_secs(5), subscription.next()).await
    {
        let terminal = frame.event.is_terminal();
        frames.push(frame);
        if terminal {
            break;
        }
    }
    frames
}
