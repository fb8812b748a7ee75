use std::{
    collections::{HashMap, VecDeque},
    fmt,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::config::RateLimitConfig;
use crate::error::{Result, ScanError};
use crate::types::TenantId;

/// Per-tenant admission check run before a job is created.
///
/// An `Ok` consumes one slot in the tenant's window.
#[async_trait]
pub trait SubmissionLimiter: Send + Sync {
    async fn check(&self, tenant_id: TenantId) -> Result<()>;
}

/// In-process sliding window log.
pub struct SlidingWindowLimiter {
    max_submissions: usize,
    window: Duration,
    hits: Mutex<HashMap<TenantId, VecDeque<Instant>>>,
}

impl SlidingWindowLimiter {
    pub fn new(max_submissions: u32, window: Duration) -> Self {
        Self {
            max_submissions: max_submissions as usize,
            window,
            hits: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.max_submissions, config.window())
    }

    fn check_at(&self, tenant_id: TenantId, now: Instant) -> Result<()> {
        let mut hits = self.hits.lock();
        // Forget tenants whose whole log has aged out.
        hits.retain(|_, log| {
            log.back().is_some_and(|newest| {
                now.saturating_duration_since(*newest) < self.window
            })
        });
        let log = hits.entry(tenant_id).or_default();

        while let Some(oldest) = log.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                log.pop_front();
            } else {
                break;
            }
        }

        if log.len() >= self.max_submissions {
            let retry_after = log
                .front()
                .map(|oldest| {
                    self.window
                        .saturating_sub(now.saturating_duration_since(*oldest))
                })
                .unwrap_or(self.window);
            return Err(ScanError::RateLimited { retry_after });
        }

        log.push_back(now);
        Ok(())
    }
}

impl Default for SlidingWindowLimiter {
    fn default() -> Self {
        Self::from_config(&RateLimitConfig::default())
    }
}

impl fmt::Debug for SlidingWindowLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlidingWindowLimiter")
            .field("max_submissions", &self.max_submissions)
            .field("window", &self.window)
            .field("tenants", &self.hits.lock().len())
            .finish()
    }
}

#[async_trait]
impl SubmissionLimiter for SlidingWindowLimiter {
    async fn check(&self, tenant_id: TenantId) -> Result<()> {
        self.check_at(tenant_id, Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn fourth_submission_in_window_is_rejected() {
        let limiter = SlidingWindowLimiter::new(3, Duration::from_secs(60));
        let tenant = TenantId(Uuid::from_u128(1));
        let start = Instant::now();

        for i in 0..3 {
            limiter
                .check_at(tenant, start + Duration::from_secs(i))
                .expect("within limit");
        }

        let err = limiter
            .check_at(tenant, start + Duration::from_secs(10))
            .unwrap_err();
        match err {
            ScanError::RateLimited { retry_after } => {
                assert_eq!(retry_after, Duration::from_secs(50));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn window_slides_and_tenants_are_independent() {
        let limiter = SlidingWindowLimiter::new(1, Duration::from_secs(60));
        let a = TenantId(Uuid::from_u128(1));
        let b = TenantId(Uuid::from_u128(2));
        let start = Instant::now();

        limiter.check_at(a, start).unwrap();
        limiter.check_at(b, start).unwrap();
        assert!(limiter.check_at(a, start + Duration::from_secs(30)).is_err());
        limiter.check_at(a, start + Duration::from_secs(60)).unwrap();
    }

    #[test]
    fn drained_tenants_are_forgotten() {
        let limiter = SlidingWindowLimiter::new(3, Duration::from_secs(60));
        let start = Instant::now();

        for n in 0..10 {
            limiter.check_at(TenantId(Uuid::from_u128(n)), start).unwrap();
        }
        assert_eq!(limiter.hits.lock().len(), 10);

        let later = start + Duration::from_secs(61);
        limiter.check_at(TenantId(Uuid::from_u128(99)), later).unwrap();
        let hits = limiter.hits.lock();
        assert_eq!(hits.len(), 1);
        assert!(hits.contains_key(&TenantId(Uuid::from_u128(99))));
    }
}
