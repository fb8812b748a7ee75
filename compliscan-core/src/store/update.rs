use chrono::Utc;

use crate::error::{Result, ScanError};
use crate::types::{
    INITIATED_LOG_LINE, LeaseId, LogEntry, ScanJob, ScanOutcome, ScanStatus,
};

/// A single field-level mutation inside a [`JobUpdate`].
#[derive(Clone, Debug, PartialEq)]
pub enum FieldOp {
    Status(ScanStatus),
    /// Raise progress to at least this value. Never lowers it.
    AdvanceProgress(u8),
    ResetProgress,
    AppendLog(Vec<LogEntry>),
    /// Replace the whole log. Only claim and retry do this.
    ResetLog(Vec<LogEntry>),
    AppendFindings(Vec<String>),
    AppendBreachAlerts(Vec<String>),
    AppendScannedUrls(Vec<String>),
    SetOutcome(ScanOutcome),
    SetLease(Option<LeaseId>),
    /// Drop findings, breach alerts, scanned urls and the outcome.
    ClearResults,
}

/// Atomic multi-field update of one job, optionally guarded on the current
/// status and on the lease of the run making it.
///
/// Stores apply the whole update or nothing. A lease mismatch surfaces as
/// [`ScanError::LeaseLost`], a failed status guard as
/// [`ScanError::InvalidState`]; either leaves the record untouched.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct JobUpdate {
    guard: Option<&'static [ScanStatus]>,
    lease: Option<LeaseId>,
    action: &'static str,
    ops: Vec<FieldOp>,
}

impl JobUpdate {
    pub fn new(action: &'static str) -> Self {
        Self {
            guard: None,
            lease: None,
            action,
            ops: Vec::new(),
        }
    }

    /// Only apply when the job is currently in one of `statuses`.
    pub fn when(mut self, statuses: &'static [ScanStatus]) -> Self {
        self.guard = Some(statuses);
        self
    }

    /// Only apply while `lease` still owns the job.
    pub fn leased_by(mut self, lease: LeaseId) -> Self {
        self.lease = Some(lease);
        self
    }

    pub fn op(mut self, op: FieldOp) -> Self {
        self.ops.push(op);
        self
    }

    pub fn status(self, status: ScanStatus) -> Self {
        self.op(FieldOp::Status(status))
    }

    pub fn log(self, message: impl Into<String>) -> Self {
        self.op(FieldOp::AppendLog(vec![LogEntry::now(message)]))
    }

    pub fn action(&self) -> &'static str {
        self.action
    }

    pub fn ops(&self) -> &[FieldOp] {
        &self.ops
    }

    pub fn resets_log(&self) -> bool {
        self.ops
            .iter()
            .any(|op| matches!(op, FieldOp::ResetLog(_)))
    }

    /// `pending -> running` under a fresh lease; restarts the log with the
    /// initiating entry.
    pub fn claim() -> Self {
        Self::new("claim")
            .when(&[ScanStatus::Pending])
            .status(ScanStatus::Running)
            .op(FieldOp::SetLease(Some(LeaseId::new())))
            .op(FieldOp::ResetProgress)
            .op(FieldOp::ResetLog(vec![LogEntry::now(INITIATED_LOG_LINE)]))
    }

    pub fn cancel() -> Self {
        Self::new("cancel")
            .when(ScanStatus::ACTIVE)
            .status(ScanStatus::Cancelled)
            .log("[CANCELLED] Scan cancelled by user")
    }

    /// Terminal states back to `pending` with every execution artifact cleared.
    pub fn retry() -> Self {
        Self::new("retry")
            .when(ScanStatus::TERMINAL)
            .status(ScanStatus::Pending)
            .op(FieldOp::ResetProgress)
            .op(FieldOp::ResetLog(Vec::new()))
            .op(FieldOp::ClearResults)
            .op(FieldOp::SetLease(None))
    }

    /// A `pending` job whose queue entry could not be written.
    pub fn abandon() -> Self {
        Self::new("abandon")
            .when(&[ScanStatus::Pending])
            .status(ScanStatus::Failed)
            .log("[ERROR] failed to enqueue scan")
    }

    pub fn fail(message: &str) -> Self {
        Self::new("fail")
            .when(&[ScanStatus::Running])
            .status(ScanStatus::Failed)
            .log(format!("[ERROR] {message}"))
    }

    /// Validates the lease and status guards against `job`, then applies
    /// every op in order.
    ///
    /// After the ops run the progress/status invariants are re-established:
    /// pending holds 0, running stays below 100 and complete is exactly 100.
    pub fn apply(&self, job: &mut ScanJob) -> Result<()> {
        if let Some(lease) = self.lease
            && job.lease_id != Some(lease)
        {
            return Err(ScanError::LeaseLost { job_id: job.id });
        }

        if let Some(allowed) = self.guard
            && !allowed.contains(&job.status)
        {
            return Err(ScanError::InvalidState {
                job_id: job.id,
                current: job.status,
                action: self.action,
            });
        }

        for op in &self.ops {
            match op {
                FieldOp::Status(status) => job.status = *status,
                FieldOp::AdvanceProgress(value) => {
                    job.progress = job.progress.max((*value).min(100));
                }
                FieldOp::ResetProgress => job.progress = 0,
                FieldOp::AppendLog(entries) => {
                    job.log.extend(entries.iter().cloned())
                }
                FieldOp::ResetLog(entries) => job.log = entries.clone(),
                FieldOp::AppendFindings(findings) => {
                    job.findings.extend(findings.iter().cloned())
                }
                FieldOp::AppendBreachAlerts(alerts) => {
                    job.breach_alerts.extend(alerts.iter().cloned())
                }
                FieldOp::AppendScannedUrls(urls) => {
                    job.scanned_urls.extend(urls.iter().cloned())
                }
                FieldOp::SetOutcome(outcome) => {
                    job.outcome = Some(outcome.clone())
                }
                FieldOp::SetLease(lease) => job.lease_id = *lease,
                FieldOp::ClearResults => {
                    job.findings.clear();
                    job.breach_alerts.clear();
                    job.scanned_urls.clear();
                    job.outcome = None;
                }
            }
        }

        match job.status {
            ScanStatus::Pending => job.progress = 0,
            ScanStatus::Running => job.progress = job.progress.min(99),
            ScanStatus::Complete => job.progress = 100,
            ScanStatus::Cancelled | ScanStatus::Failed => {}
        }
        job.updated_at = Utc::now();
        Ok(())
    }
}
