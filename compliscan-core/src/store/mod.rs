//! Durable job and report records.
//!
//! The store is the single source of truth for a job. Every read and write is
//! scoped by [`TenantId`]; a job owned by another tenant is reported as
//! [`ScanError::NotFound`](crate::error::ScanError::NotFound), exactly like a
//! missing one.

pub mod memory;
#[cfg(feature = "database")]
pub mod postgres;
pub mod update;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{
    JobId, QueuedJob, Report, ReportCreation, ScanJob, TenantId,
};

pub use memory::MemoryJobStore;
#[cfg(feature = "database")]
pub use postgres::PostgresJobStore;
pub use update::{FieldOp, JobUpdate};

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new `pending` job.
    async fn create(&self, tenant_id: TenantId, domain: &str)
    -> Result<ScanJob>;

    async fn get(&self, tenant_id: TenantId, job_id: JobId) -> Result<ScanJob>;

    /// Apply `update` atomically and return the record as written.
    async fn update(
        &self,
        tenant_id: TenantId,
        job_id: JobId,
        update: JobUpdate,
    ) -> Result<ScanJob>;

    /// Newest first.
    async fn list(
        &self,
        tenant_id: TenantId,
        limit: usize,
    ) -> Result<Vec<ScanJob>>;

    async fn count(&self, tenant_id: TenantId) -> Result<u64>;

    /// Jobs still waiting for a worker, oldest first, across all tenants.
    async fn pending(&self, limit: usize) -> Result<Vec<QueuedJob>>;

    /// The conditional `pending -> running` transition. Exactly one of any
    /// number of concurrent callers wins; the rest see `InvalidState`.
    async fn claim(
        &self,
        tenant_id: TenantId,
        job_id: JobId,
    ) -> Result<ScanJob> {
        self.update(tenant_id, job_id, JobUpdate::claim()).await
    }
}

#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Get-or-create the report for a completed job.
    ///
    /// An existing report keeps its id and creation time but takes the
    /// job's current grade and risk score, so a rerun never leaves it stale.
    async fn ensure_report(&self, job: &ScanJob) -> Result<ReportCreation>;

    async fn report(&self, tenant_id: TenantId, job_id: JobId)
    -> Result<Report>;
}

pub(crate) fn report_from_job(job: &ScanJob) -> Result<Report> {
    use crate::error::ScanError;
    use crate::types::{ReportId, ScanStatus};

    let outcome = match (&job.status, &job.outcome) {
        (ScanStatus::Complete, Some(outcome)) => outcome,
        _ => {
            return Err(ScanError::InvalidState {
                job_id: job.id,
                current: job.status,
                action: "create a report for",
            });
        }
    };

    Ok(Report {
        id: ReportId::new(),
        job_id: job.id,
        tenant_id: job.tenant_id,
        domain: job.domain.clone(),
        grade: outcome.grade,
        risk_score: outcome.risk_score,
        created_at: chrono::Utc::now(),
    })
}
