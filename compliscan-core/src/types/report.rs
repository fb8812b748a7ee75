use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    ids::{JobId, ReportId, TenantId},
    outcome::Grade,
};

/// Downstream artifact linked to a completed job. At most one per job.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: ReportId,
    pub job_id: JobId,
    pub tenant_id: TenantId,
    pub domain: String,
    pub grade: Grade,
    pub risk_score: f64,
    pub created_at: DateTime<Utc>,
}

/// Result of an idempotent report creation.
#[derive(Clone, Debug, PartialEq)]
pub struct ReportCreation {
    pub report: Report,
    /// `false` when the report already existed.
    pub created: bool,
}
