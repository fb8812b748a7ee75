//! Cancel, retry and read-side operations on existing jobs.

use std::{collections::BTreeMap, fmt, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Result;
use crate::queue::JobQueue;
use crate::store::{JobStore, JobUpdate, ReportStore};
use crate::types::{
    Grade, JobId, LogEntry, Recommendation, Report, ScanJob, ScanStatus,
    TenantId,
};

/// Everything a client needs to render one job, flattened from the record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanSnapshot {
    pub id: JobId,
    pub domain: String,
    pub status: ScanStatus,
    pub progress: u8,
    pub log: Vec<LogEntry>,
    pub grade: Option<Grade>,
    pub risk_score: Option<f64>,
    pub anomaly_score: Option<f64>,
    pub findings: Vec<String>,
    pub breach_alerts: Vec<String>,
    pub checklist: BTreeMap<String, bool>,
    pub recommendations: Vec<Recommendation>,
    pub scanned_urls: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ScanJob> for ScanSnapshot {
    fn from(job: ScanJob) -> Self {
        let (grade, risk_score, anomaly_score, checklist, recommendations) =
            match job.outcome {
                Some(outcome) => (
                    Some(outcome.grade),
                    Some(outcome.risk_score),
                    Some(outcome.anomaly_score),
                    outcome.checklist,
                    outcome.recommendations,
                ),
                None => (None, None, None, BTreeMap::new(), Vec::new()),
            };

        Self {
            id: job.id,
            domain: job.domain,
            status: job.status,
            progress: job.progress,
            log: job.log,
            grade,
            risk_score,
            anomaly_score,
            findings: job.findings,
            breach_alerts: job.breach_alerts,
            checklist,
            recommendations,
            scanned_urls: job.scanned_urls,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

/// One row of the tenant's scan history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub id: JobId,
    pub domain: String,
    pub status: ScanStatus,
    pub progress: u8,
    pub grade: Option<Grade>,
    pub risk_score: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl From<&ScanJob> for ScanSummary {
    fn from(job: &ScanJob) -> Self {
        Self {
            id: job.id,
            domain: job.domain.clone(),
            status: job.status,
            progress: job.progress,
            grade: job.outcome.as_ref().map(|outcome| outcome.grade),
            risk_score: job.outcome.as_ref().map(|outcome| outcome.risk_score),
            created_at: job.created_at,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanList {
    pub scans: Vec<ScanSummary>,
    pub total: u64,
    /// Grade of the newest completed scan in the page.
    pub latest_grade: Option<Grade>,
}

pub struct ControlSurface {
    store: Arc<dyn JobStore>,
    reports: Arc<dyn ReportStore>,
    queue: Arc<dyn JobQueue>,
}

impl fmt::Debug for ControlSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlSurface").finish_non_exhaustive()
    }
}

impl ControlSurface {
    pub fn new(
        store: Arc<dyn JobStore>,
        reports: Arc<dyn ReportStore>,
        queue: Arc<dyn JobQueue>,
    ) -> Self {
        Self {
            store,
            reports,
            queue,
        }
    }

    /// `pending | running -> cancelled`. A running executor notices at its
    /// next step boundary.
    pub async fn cancel(
        &self,
        tenant_id: TenantId,
        job_id: JobId,
    ) -> Result<ScanJob> {
        let job = self
            .store
            .update(tenant_id, job_id, JobUpdate::cancel())
            .await?;
        info!(job_id = %job_id, tenant_id = %tenant_id, progress = job.progress, "scan cancelled");
        Ok(job)
    }

    /// Terminal job back to `pending` with its results cleared, then
    /// re-enqueued. An existing report is kept and refreshed when the rerun
    /// completes.
    pub async fn retry(
        &self,
        tenant_id: TenantId,
        job_id: JobId,
    ) -> Result<ScanJob> {
        let job = self
            .store
            .update(tenant_id, job_id, JobUpdate::retry())
            .await?;

        if let Err(err) = self.queue.enqueue(job.queued()).await {
            warn!(job_id = %job_id, error = %err, "failed to enqueue retried scan");
            if let Err(mark_err) = self
                .store
                .update(tenant_id, job_id, JobUpdate::abandon())
                .await
            {
                warn!(job_id = %job_id, error = %mark_err, "could not mark unqueued scan failed");
            }
            return Err(err);
        }

        info!(job_id = %job_id, tenant_id = %tenant_id, "scan retried");
        Ok(job)
    }

    pub async fn status(
        &self,
        tenant_id: TenantId,
        job_id: JobId,
    ) -> Result<ScanSnapshot> {
        Ok(self.store.get(tenant_id, job_id).await?.into())
    }

    pub async fn list(&self, tenant_id: TenantId, limit: usize) -> Result<ScanList> {
        let jobs = self.store.list(tenant_id, limit).await?;
        let total = self.store.count(tenant_id).await?;
        let latest_grade = jobs
            .iter()
            .find(|job| job.status == ScanStatus::Complete)
            .and_then(|job| job.outcome.as_ref())
            .map(|outcome| outcome.grade);

        Ok(ScanList {
            scans: jobs.iter().map(ScanSummary::from).collect(),
            total,
            latest_grade,
        })
    }

    pub async fn report(
        &self,
        tenant_id: TenantId,
        job_id: JobId,
    ) -> Result<Report> {
        self.reports.report(tenant_id, job_id).await
    }
}
