use std::time::Duration;

use thiserror::Error;

use crate::types::{JobId, ScanStatus};

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Validation error: {0}")]
    Validation(String),

    /// Covers both "absent" and "owned by another tenant" so callers cannot
    /// probe for foreign job ids.
    #[error("Scan not found: {0}")]
    NotFound(JobId),

    #[error("Rate limit exceeded; retry in {}s", retry_after.as_secs().max(1))]
    RateLimited { retry_after: Duration },

    #[error("Cannot {action} scan {job_id} while it is {current}")]
    InvalidState {
        job_id: JobId,
        current: ScanStatus,
        action: &'static str,
    },

    /// The job was reclaimed by another run; the caller no longer owns it.
    #[error("Scan {job_id} is owned by another run")]
    LeaseLost { job_id: JobId },

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Progress publish failed: {0}")]
    Publish(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl ScanError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Self::InvalidState { .. })
    }
}

#[cfg(feature = "database")]
impl From<sqlx::Error> for ScanError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(format!("database error: {err}"))
    }
}

#[cfg(feature = "database")]
impl From<redis::RedisError> for ScanError {
    fn from(err: redis::RedisError) -> Self {
        Self::Storage(format!("redis error: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;
