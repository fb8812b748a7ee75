use async_trait::async_trait;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex;

use super::{JobStore, JobUpdate, ReportStore, report_from_job};
use crate::error::{Result, ScanError};
use crate::types::{
    JobId, QueuedJob, Report, ReportCreation, ScanJob, ScanStatus, TenantId,
};

/// Process-local store. Every operation runs under one lock, which makes the
/// guarded updates (and therefore the claim) trivially atomic.
#[derive(Clone, Debug, Default)]
pub struct MemoryJobStore {
    jobs: Arc<Mutex<HashMap<JobId, ScanJob>>>,
    reports: Arc<Mutex<HashMap<JobId, Report>>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn report_count(&self, job_id: JobId) -> usize {
        let guard = self.reports.lock().await;
        usize::from(guard.contains_key(&job_id))
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(
        &self,
        tenant_id: TenantId,
        domain: &str,
    ) -> Result<ScanJob> {
        let job = ScanJob::new(tenant_id, domain);
        let mut guard = self.jobs.lock().await;
        guard.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get(&self, tenant_id: TenantId, job_id: JobId) -> Result<ScanJob> {
        let guard = self.jobs.lock().await;
        guard
            .get(&job_id)
            .filter(|job| job.is_owned_by(tenant_id))
            .cloned()
            .ok_or(ScanError::NotFound(job_id))
    }

    async fn update(
        &self,
        tenant_id: TenantId,
        job_id: JobId,
        update: JobUpdate,
    ) -> Result<ScanJob> {
        let mut guard = self.jobs.lock().await;
        let entry = guard
            .get_mut(&job_id)
            .filter(|job| job.is_owned_by(tenant_id))
            .ok_or(ScanError::NotFound(job_id))?;

        // Apply to a copy so a rejected update cannot leave partial writes.
        let mut next = entry.clone();
        update.apply(&mut next)?;
        *entry = next.clone();
        Ok(next)
    }

    async fn list(
        &self,
        tenant_id: TenantId,
        limit: usize,
    ) -> Result<Vec<ScanJob>> {
        let guard = self.jobs.lock().await;
        let mut jobs: Vec<ScanJob> = guard
            .values()
            .filter(|job| job.is_owned_by(tenant_id))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| {
            b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id))
        });
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn count(&self, tenant_id: TenantId) -> Result<u64> {
        let guard = self.jobs.lock().await;
        Ok(guard
            .values()
            .filter(|job| job.is_owned_by(tenant_id))
            .count() as u64)
    }

    async fn pending(&self, limit: usize) -> Result<Vec<QueuedJob>> {
        let guard = self.jobs.lock().await;
        let mut pending: Vec<&ScanJob> = guard
            .values()
            .filter(|job| job.status == ScanStatus::Pending)
            .collect();
        pending.sort_by_key(|job| (job.created_at, job.id));
        Ok(pending
            .into_iter()
            .take(limit)
            .map(ScanJob::queued)
            .collect())
    }
}

#[async_trait]
impl ReportStore for MemoryJobStore {
    async fn ensure_report(&self, job: &ScanJob) -> Result<ReportCreation> {
        let candidate = report_from_job(job)?;
        let mut guard = self.reports.lock().await;
        if let Some(existing) = guard.get_mut(&job.id) {
            existing.grade = candidate.grade;
            existing.risk_score = candidate.risk_score;
            return Ok(ReportCreation {
                report: existing.clone(),
                created: false,
            });
        }

        guard.insert(job.id, candidate.clone());
        Ok(ReportCreation {
            report: candidate,
            created: true,
        })
    }

    async fn report(
        &self,
        tenant_id: TenantId,
        job_id: JobId,
    ) -> Result<Report> {
        let guard = self.reports.lock().await;
        guard
            .get(&job_id)
            .filter(|report| report.tenant_id == tenant_id)
            .cloned()
            .ok_or(ScanError::NotFound(job_id))
    }
}
