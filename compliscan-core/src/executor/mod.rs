//! Runs one claimed job through its [`ScanPlan`].
//!
//! The executor is the only writer of a running job. The claim stamps a
//! [`LeaseId`] on the record, and every step, finalize and fail write is a
//! [`JobUpdate`] guarded on that lease and on `running`. A cancel issued
//! through the control surface therefore wins over whatever the step was
//! about to record, and a run whose job was retried and claimed again can no
//! longer write to it.
//!
//! Cancellation is cooperative: a step already in flight runs to completion
//! and its output is discarded when the guard fails. The executor also checks
//! the stored status and lease before starting each step.

pub mod plan;
pub mod runner;
pub mod scoring;

use std::{fmt, sync::Arc, time::Duration};

use tokio::time::{Instant, timeout};
use tracing::{debug, info, instrument, warn};

use crate::channel::{ProgressEvent, ProgressPublisher};
use crate::config::ScannerConfig;
use crate::error::{Result, ScanError};
use crate::store::{FieldOp, JobStore, JobUpdate, ReportStore};
use crate::types::{Grade, LeaseId, QueuedJob, ScanJob, ScanStatus};

pub use plan::{ScanPlan, ScanStep};
pub use runner::{SimulatedStepRunner, StepOutput, StepRunner};
pub use scoring::{FindingsScorer, Scorer, ScoringInput};

const DEFAULT_MAX_RUNTIME: Duration = Duration::from_secs(15 * 60);
const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_millis(250);

/// How a single [`ScanExecutor::execute`] call ended.
#[derive(Clone, Debug, PartialEq)]
pub enum ExecutionOutcome {
    Completed { grade: Grade, risk_score: f64 },
    Cancelled { progress: u8 },
    Failed { error: String },
    /// Another run owns the job, or it no longer exists.
    Skipped,
    /// The claim could not be attempted; the job is still `pending` and
    /// should be offered again.
    Deferred { error: String },
}

enum StepEnd {
    Continue,
    Stop(ExecutionOutcome),
}

pub struct ScanExecutor {
    store: Arc<dyn JobStore>,
    reports: Arc<dyn ReportStore>,
    publisher: Arc<dyn ProgressPublisher>,
    runner: Arc<dyn StepRunner>,
    scorer: Arc<dyn Scorer>,
    plan: ScanPlan,
    max_runtime: Duration,
    publish_timeout: Duration,
}

impl fmt::Debug for ScanExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanExecutor")
            .field("steps", &self.plan.len())
            .field("max_runtime", &self.max_runtime)
            .field("publish_timeout", &self.publish_timeout)
            .finish_non_exhaustive()
    }
}

impl ScanExecutor {
    /// Executor with the standard plan, the simulated runner using the
    /// default step delay, and the findings scorer.
    pub fn new(
        store: Arc<dyn JobStore>,
        reports: Arc<dyn ReportStore>,
        publisher: Arc<dyn ProgressPublisher>,
    ) -> Self {
        Self {
            store,
            reports,
            publisher,
            runner: Arc::new(SimulatedStepRunner::new(
                ScannerConfig::default().step_delay(),
            )),
            scorer: Arc::new(FindingsScorer),
            plan: ScanPlan::standard(),
            max_runtime: DEFAULT_MAX_RUNTIME,
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
        }
    }

    pub fn with_runner(mut self, runner: Arc<dyn StepRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn Scorer>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn with_plan(mut self, plan: ScanPlan) -> Self {
        self.plan = plan;
        self
    }

    pub fn with_max_runtime(mut self, max_runtime: Duration) -> Self {
        self.max_runtime = max_runtime;
        self
    }

    /// Applies runtime budget, publish timeout and the simulated step delay.
    pub fn with_config(self, config: &ScannerConfig) -> Self {
        let mut executor = self
            .with_runner(Arc::new(SimulatedStepRunner::new(config.step_delay())))
            .with_max_runtime(config.max_runtime());
        executor.publish_timeout = config.publish_timeout();
        executor
    }

    pub fn plan(&self) -> &ScanPlan {
        &self.plan
    }

    /// Claim and run `queued` to a terminal state.
    ///
    /// Never returns an error: failures end up as a `failed` job and
    /// [`ExecutionOutcome::Failed`]. A claim that could not reach the store
    /// leaves the job `pending` and reports [`ExecutionOutcome::Deferred`].
    #[instrument(skip(self), fields(job_id = %queued.job_id, tenant_id = %queued.tenant_id))]
    pub async fn execute(&self, queued: QueuedJob) -> ExecutionOutcome {
        let job = match self.store.claim(queued.tenant_id, queued.job_id).await {
            Ok(job) => job,
            Err(
                err @ (ScanError::InvalidState { .. }
                | ScanError::NotFound(_)
                | ScanError::LeaseLost { .. }),
            ) => {
                debug!(error = %err, "job not claimable; skipping");
                return ExecutionOutcome::Skipped;
            }
            Err(err) => {
                warn!(error = %err, "claim failed; job stays pending");
                return ExecutionOutcome::Deferred {
                    error: err.to_string(),
                };
            }
        };
        let Some(lease) = job.lease_id else {
            warn!("claimed job carries no lease; skipping");
            return ExecutionOutcome::Skipped;
        };
        info!(domain = %job.domain, %lease, "scan started");

        self.publish(&job, ProgressEvent::running(0, "Scan initiated"))
            .await;

        let deadline = Instant::now() + self.max_runtime;
        let mut job = job;
        for step in self.plan.steps() {
            match self.run_step(&mut job, lease, step, deadline).await {
                Ok(StepEnd::Continue) => {}
                Ok(StepEnd::Stop(outcome)) => return outcome,
                Err(err) => return self.fail(&job, lease, err).await,
            }
        }

        self.finalize(job, lease).await
    }

    async fn run_step(
        &self,
        job: &mut ScanJob,
        lease: LeaseId,
        step: &ScanStep,
        deadline: Instant,
    ) -> Result<StepEnd> {
        let current = self.store.get(job.tenant_id, job.id).await?;
        if current.lease_id != Some(lease) {
            warn!(job_id = %job.id, status = %current.status, "job was reclaimed by another run");
            return Ok(StepEnd::Stop(ExecutionOutcome::Skipped));
        }
        match current.status {
            ScanStatus::Running => {}
            ScanStatus::Cancelled => {
                return Ok(StepEnd::Stop(self.cancelled(&current).await));
            }
            other => {
                warn!(job_id = %job.id, status = %other, "job left running state between steps");
                return Ok(StepEnd::Stop(ExecutionOutcome::Skipped));
            }
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        let output = match timeout(remaining, self.runner.run(&current, step)).await
        {
            Ok(output) => output?,
            Err(_) => {
                return Err(ScanError::Execution(format!(
                    "scan exceeded maximum runtime of {}s",
                    self.max_runtime.as_secs()
                )));
            }
        };

        let update = JobUpdate::new("record step for")
            .when(&[ScanStatus::Running])
            .leased_by(lease)
            .op(FieldOp::AdvanceProgress(step.target))
            .log(step.log_line())
            .op(FieldOp::AppendFindings(output.findings))
            .op(FieldOp::AppendBreachAlerts(output.breach_alerts))
            .op(FieldOp::AppendScannedUrls(output.scanned_urls));

        match self.store.update(job.tenant_id, job.id, update).await {
            Ok(updated) => *job = updated,
            Err(ScanError::InvalidState {
                current: ScanStatus::Cancelled,
                ..
            }) => {
                let stopped = self.store.get(job.tenant_id, job.id).await?;
                return Ok(StepEnd::Stop(self.cancelled(&stopped).await));
            }
            Err(ScanError::InvalidState { current, .. }) => {
                warn!(job_id = %job.id, status = %current, "job left running state mid-step");
                return Ok(StepEnd::Stop(ExecutionOutcome::Skipped));
            }
            Err(ScanError::LeaseLost { .. }) => {
                warn!(job_id = %job.id, step = %step.name, "job was reclaimed mid-step; discarding output");
                return Ok(StepEnd::Stop(ExecutionOutcome::Skipped));
            }
            Err(err) => return Err(err),
        }

        debug!(job_id = %job.id, step = %step.name, progress = job.progress, "step recorded");
        self.publish(job, ProgressEvent::running(step.target, &step.name))
            .await;
        Ok(StepEnd::Continue)
    }

    async fn finalize(&self, job: ScanJob, lease: LeaseId) -> ExecutionOutcome {
        let outcome = self.scorer.score(&ScoringInput::from_job(&job));
        let (grade, risk_score) = (outcome.grade, outcome.risk_score);

        let update = JobUpdate::new("finalize")
            .when(&[ScanStatus::Running])
            .leased_by(lease)
            .status(ScanStatus::Complete)
            .op(FieldOp::AdvanceProgress(100))
            .op(FieldOp::SetOutcome(outcome))
            .log("[100%] Finalizing results")
            .log(format!("[COMPLETE] Grade: {grade}, Risk: {risk_score:.1}"));

        let job = match self.store.update(job.tenant_id, job.id, update).await {
            Ok(job) => job,
            Err(ScanError::InvalidState {
                current: ScanStatus::Cancelled,
                ..
            }) => return self.cancelled(&job).await,
            Err(err @ (ScanError::InvalidState { .. } | ScanError::LeaseLost { .. })) => {
                warn!(job_id = %job.id, error = %err, "finalize lost the job");
                return ExecutionOutcome::Skipped;
            }
            Err(err) => return self.fail(&job, lease, err).await,
        };

        self.publish(
            &job,
            ProgressEvent::Complete {
                progress: 100,
                grade,
                risk_score,
            },
        )
        .await;

        match self.reports.ensure_report(&job).await {
            Ok(creation) if creation.created => {
                debug!(job_id = %job.id, report_id = %creation.report.id, "report created");
            }
            Ok(_) => debug!(job_id = %job.id, "report already present"),
            Err(err) => {
                warn!(job_id = %job.id, error = %err, "failed to create report");
            }
        }

        info!(job_id = %job.id, %grade, risk_score, "scan complete");
        ExecutionOutcome::Completed { grade, risk_score }
    }

    async fn fail(
        &self,
        job: &ScanJob,
        lease: LeaseId,
        err: ScanError,
    ) -> ExecutionOutcome {
        let message = match err {
            ScanError::Execution(message) => message,
            other => other.to_string(),
        };
        warn!(job_id = %job.id, error = %message, "scan failed");

        let progress = match self
            .store
            .update(
                job.tenant_id,
                job.id,
                JobUpdate::fail(&message).leased_by(lease),
            )
            .await
        {
            Ok(failed) => failed.progress,
            Err(ScanError::InvalidState {
                current: ScanStatus::Cancelled,
                ..
            }) => return self.cancelled(job).await,
            Err(ScanError::LeaseLost { .. }) => {
                warn!(job_id = %job.id, "job was reclaimed before its failure was recorded");
                return ExecutionOutcome::Skipped;
            }
            Err(update_err) => {
                warn!(job_id = %job.id, error = %update_err, "could not mark job failed");
                job.progress
            }
        };

        self.publish(
            job,
            ProgressEvent::Failed {
                progress,
                error: message.clone(),
            },
        )
        .await;
        ExecutionOutcome::Failed { error: message }
    }

    async fn cancelled(&self, job: &ScanJob) -> ExecutionOutcome {
        info!(job_id = %job.id, progress = job.progress, "scan cancelled");
        self.publish(
            job,
            ProgressEvent::Progress {
                progress: job.progress,
                step: None,
                status: ScanStatus::Cancelled,
            },
        )
        .await;
        ExecutionOutcome::Cancelled {
            progress: job.progress,
        }
    }

    async fn publish(&self, job: &ScanJob, event: ProgressEvent) {
        match timeout(self.publish_timeout, self.publisher.publish(job.id, event))
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(job_id = %job.id, error = %err, "progress publish failed");
            }
            Err(_) => {
                warn!(job_id = %job.id, "progress publish timed out");
            }
        }
    }
}
