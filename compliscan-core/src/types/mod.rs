//! Domain types shared by every compliscan component.

pub mod ids;
pub mod job;
pub mod outcome;
pub mod report;

pub use ids::{JobId, LeaseId, ReportId, TenantId};
pub use job::{INITIATED_LOG_LINE, LogEntry, QueuedJob, ScanJob, ScanStatus};
pub use outcome::{Grade, Priority, RawData, Recommendation, ScanOutcome};
pub use report::{Report, ReportCreation};
