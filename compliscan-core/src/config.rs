use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Knobs for the background scan runtime.
///
/// All fields carry defaults so a configuration file only needs to name what
/// it changes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Number of long-lived executor workers.
    pub workers: usize,
    /// Simulated work per step, in milliseconds.
    pub step_delay_ms: u64,
    /// Wall-clock budget for one run; exceeding it fails the job.
    pub max_runtime_secs: u64,
    /// Upper bound on a single progress publish before it is abandoned.
    pub publish_timeout_ms: u64,
    /// Per-topic buffer of the in-process progress channel.
    pub channel_capacity: usize,
    /// How often the store-backed queue looks for pending jobs.
    pub poll_interval_ms: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            step_delay_ms: 1_800,
            max_runtime_secs: 15 * 60,
            publish_timeout_ms: 250,
            channel_capacity: 64,
            poll_interval_ms: 500,
        }
    }
}

impl ScannerConfig {
    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }

    pub fn max_runtime(&self) -> Duration {
        Duration::from_secs(self.max_runtime_secs.max(1))
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms.max(1))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Per-tenant submission throttle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_submissions: u32,
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_submissions: 3,
            window_secs: 60,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs.max(1))
    }
}
