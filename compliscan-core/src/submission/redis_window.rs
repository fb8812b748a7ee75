use std::{
    fmt,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use redis::{Script, aio::ConnectionManager};
use tracing::debug;
use uuid::Uuid;

use super::limiter::SubmissionLimiter;
use crate::config::RateLimitConfig;
use crate::error::{Result, ScanError};
use crate::types::TenantId;

const KEY_PREFIX: &str = "compliscan:submissions";

/// Sliding window log over a sorted set. Returns `{1, count}` when admitted
/// and `{0, count, retry_after_ms}` when the window is full.
fn sliding_window_log() -> Script {
    Script::new(
        r#"
        local key = KEYS[1]
        local now = tonumber(ARGV[1])
        local window = tonumber(ARGV[2])
        local limit = tonumber(ARGV[3])
        local member = ARGV[4]

        redis.call('ZREMRANGEBYSCORE', key, 0, now - window)
        local current = redis.call('ZCARD', key)

        if current < limit then
            redis.call('ZADD', key, now, member)
            redis.call('PEXPIRE', key, window)
            return {1, current + 1}
        end

        local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
        local retry_after = oldest[2] and (tonumber(oldest[2]) + window - now) or window
        return {0, current, retry_after}
        "#,
    )
}

/// Deployment-wide limiter shared by every server process through Redis.
#[derive(Clone)]
pub struct RedisSlidingWindowLimiter {
    redis: ConnectionManager,
    max_submissions: u32,
    window: Duration,
}

impl RedisSlidingWindowLimiter {
    pub async fn connect(redis_url: &str, config: &RateLimitConfig) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let redis = ConnectionManager::new(client).await?;
        Ok(Self::new(redis, config))
    }

    pub fn new(redis: ConnectionManager, config: &RateLimitConfig) -> Self {
        Self {
            redis,
            max_submissions: config.max_submissions,
            window: config.window(),
        }
    }

    fn key(tenant_id: TenantId) -> String {
        format!("{KEY_PREFIX}:{tenant_id}")
    }
}

impl fmt::Debug for RedisSlidingWindowLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisSlidingWindowLimiter")
            .field("max_submissions", &self.max_submissions)
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SubmissionLimiter for RedisSlidingWindowLimiter {
    async fn check(&self, tenant_id: TenantId) -> Result<()> {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|err| ScanError::storage(format!("system clock error: {err}")))?
            .as_millis() as i64;
        let window_ms = self.window.as_millis() as i64;

        let mut conn = self.redis.clone();
        let result = sliding_window_log()
            .key(Self::key(tenant_id))
            .arg(now_ms)
            .arg(window_ms)
            .arg(self.max_submissions)
            .arg(Uuid::new_v4().to_string())
            .invoke_async::<Vec<i64>>(&mut conn)
            .await?;

        match result.as_slice() {
            [1, count, ..] => {
                debug!(tenant_id = %tenant_id, count, "submission admitted");
                Ok(())
            }
            [0, _, retry_after_ms, ..] => Err(ScanError::RateLimited {
                retry_after: Duration::from_millis((*retry_after_ms).max(0) as u64),
            }),
            other => Err(ScanError::storage(format!(
                "unexpected rate limit script reply: {other:?}"
            ))),
        }
    }
}
