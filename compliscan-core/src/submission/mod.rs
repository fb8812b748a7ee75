//! Request-path entry point: validate, throttle, persist, enqueue.

pub mod limiter;
#[cfg(feature = "database")]
pub mod redis_window;

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, ScanError};
use crate::queue::JobQueue;
use crate::store::{JobStore, JobUpdate};
use crate::types::{JobId, ScanStatus, TenantId};

pub use limiter::{SlidingWindowLimiter, SubmissionLimiter};
#[cfg(feature = "database")]
pub use redis_window::RedisSlidingWindowLimiter;

/// Longest name DNS allows.
pub const MAX_DOMAIN_LEN: usize = 253;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubmitScan {
    pub domain: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedScan {
    pub job_id: JobId,
    pub status: ScanStatus,
}

/// Trim and check a submitted domain.
pub fn validate_domain(raw: &str) -> Result<&str> {
    let domain = raw.trim();
    if domain.is_empty() {
        return Err(ScanError::validation("domain must not be empty"));
    }
    if domain.len() > MAX_DOMAIN_LEN {
        return Err(ScanError::validation(format!(
            "domain must be at most {MAX_DOMAIN_LEN} characters"
        )));
    }
    if domain.chars().any(char::is_whitespace) {
        return Err(ScanError::validation("domain must not contain whitespace"));
    }
    Ok(domain)
}

pub struct SubmissionGateway {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn JobQueue>,
    limiter: Arc<dyn SubmissionLimiter>,
}

impl fmt::Debug for SubmissionGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubmissionGateway").finish_non_exhaustive()
    }
}

impl SubmissionGateway {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn JobQueue>,
        limiter: Arc<dyn SubmissionLimiter>,
    ) -> Self {
        Self {
            store,
            queue,
            limiter,
        }
    }

    /// Create a `pending` job and hand it to the workers.
    ///
    /// Invalid domains are rejected before the limiter is consulted, so they
    /// never use up a slot. A rate-limited submission creates nothing.
    pub async fn submit(
        &self,
        tenant_id: TenantId,
        request: SubmitScan,
    ) -> Result<SubmittedScan> {
        let domain = validate_domain(&request.domain)?;
        self.limiter.check(tenant_id).await?;

        let job = self.store.create(tenant_id, domain).await?;

        if let Err(err) = self.queue.enqueue(job.queued()).await {
            warn!(job_id = %job.id, error = %err, "failed to enqueue scan");
            if let Err(mark_err) = self
                .store
                .update(tenant_id, job.id, JobUpdate::abandon())
                .await
            {
                warn!(job_id = %job.id, error = %mark_err, "could not mark unqueued scan failed");
            }
            return Err(err);
        }

        info!(job_id = %job.id, tenant_id = %tenant_id, domain = %job.domain, "scan submitted");
        Ok(SubmittedScan {
            job_id: job.id,
            status: job.status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domains_are_trimmed_and_checked() {
        assert_eq!(validate_domain("  example.com \n").unwrap(), "example.com");
        assert!(validate_domain("   ").is_err());
        assert!(validate_domain("exa mple.com").is_err());
        assert!(validate_domain(&"a".repeat(254)).is_err());
        assert!(validate_domain(&"a".repeat(253)).is_ok());
    }
}
