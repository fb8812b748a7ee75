use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use super::{
    ids::{JobId, LeaseId, TenantId},
    outcome::ScanOutcome,
};

/// First log line written on creation and again whenever a worker claims the job.
pub const INITIATED_LOG_LINE: &str = "Scan initiated...";

/// Lifecycle states of a scan job.
///
/// `pending -> running -> complete`, with `cancelled` reachable from the two
/// active states and `failed` from `running`. Retry moves any terminal state
/// back to `pending`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Pending,
    Running,
    Complete,
    Cancelled,
    Failed,
}

impl ScanStatus {
    /// States from which a job may still be cancelled.
    pub const ACTIVE: &'static [ScanStatus] =
        &[ScanStatus::Pending, ScanStatus::Running];

    /// States from which a job may be retried.
    pub const TERMINAL: &'static [ScanStatus] = &[
        ScanStatus::Complete,
        ScanStatus::Cancelled,
        ScanStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Pending => "pending",
            ScanStatus::Running => "running",
            ScanStatus::Complete => "complete",
            ScanStatus::Cancelled => "cancelled",
            ScanStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        Self::TERMINAL.contains(self)
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ScanStatus::Pending),
            "running" => Ok(ScanStatus::Running),
            "complete" => Ok(ScanStatus::Complete),
            "cancelled" => Ok(ScanStatus::Cancelled),
            "failed" => Ok(ScanStatus::Failed),
            other => Err(format!("unknown scan status `{other}`")),
        }
    }
}

/// One immutable line of a job's execution log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub message: String,
}

impl LogEntry {
    pub fn now(message: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            message: message.into(),
        }
    }
}

/// The durable record of one compliance scan.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanJob {
    pub id: JobId,
    pub tenant_id: TenantId,
    pub domain: String,
    pub status: ScanStatus,
    pub progress: u8,
    pub log: Vec<LogEntry>,
    pub findings: Vec<String>,
    pub breach_alerts: Vec<String>,
    /// Every URL touched by the steps so far; feeds `raw_data` at finalize.
    pub scanned_urls: Vec<String>,
    pub outcome: Option<ScanOutcome>,
    /// Set by the claim that owns the current run; cleared on retry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_id: Option<LeaseId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScanJob {
    pub fn new(tenant_id: TenantId, domain: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            tenant_id,
            domain: domain.into(),
            status: ScanStatus::Pending,
            progress: 0,
            log: vec![LogEntry::now(INITIATED_LOG_LINE)],
            findings: Vec::new(),
            breach_alerts: Vec::new(),
            scanned_urls: Vec::new(),
            outcome: None,
            lease_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn queued(&self) -> QueuedJob {
        QueuedJob {
            job_id: self.id,
            tenant_id: self.tenant_id,
        }
    }

    pub fn is_owned_by(&self, tenant_id: TenantId) -> bool {
        self.tenant_id == tenant_id
    }
}

/// What travels through the queue: just enough to claim the job under its
/// tenant scope.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct QueuedJob {
    pub job_id: JobId,
    pub tenant_id: TenantId,
}
