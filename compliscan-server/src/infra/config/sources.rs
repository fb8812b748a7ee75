use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as written in `compliscan.toml`.
///
/// Every field is optional; whatever is missing falls through to the
/// environment or the built-in default.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub server: FileServerConfig,
    #[serde(default)]
    pub database: FileDatabaseConfig,
    pub redis: Option<FileRedisConfig>,
    #[serde(default)]
    pub scanner: FileScannerConfig,
    #[serde(default)]
    pub rate_limit: FileRateLimitConfig,
    #[serde(default)]
    pub cors: FileCorsConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileServerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileDatabaseConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileRedisConfig {
    pub url: String,
}

/// Durations are humantime strings such as `"1800ms"` or `"15m"`.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileScannerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_delay: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_runtime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_capacity: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_interval: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileRateLimitConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_submissions: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileCorsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_origins: Option<Vec<String>>,
}

/// Environment-derived configuration values.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub server_host: Option<String>,
    pub server_port: Option<u16>,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub scanner_workers: Option<usize>,
    pub scanner_step_delay: Option<String>,
    pub scanner_max_runtime: Option<String>,
    pub scanner_publish_timeout: Option<String>,
    pub rate_limit_max_submissions: Option<u32>,
    pub rate_limit_window: Option<String>,
    pub cors_allowed_origins: Option<Vec<String>>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `gather` uses the process environment.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        Self {
            config_path: non_empty("COMPLISCAN_CONFIG").map(PathBuf::from),
            server_host: non_empty("SERVER_HOST"),
            server_port: non_empty("SERVER_PORT").and_then(|s| s.parse().ok()),
            database_url: non_empty("DATABASE_URL"),
            redis_url: non_empty("REDIS_URL"),
            scanner_workers: non_empty("SCANNER_WORKERS").and_then(|s| s.parse().ok()),
            scanner_step_delay: non_empty("SCANNER_STEP_DELAY"),
            scanner_max_runtime: non_empty("SCANNER_MAX_RUNTIME"),
            scanner_publish_timeout: non_empty("SCANNER_PUBLISH_TIMEOUT"),
            rate_limit_max_submissions: non_empty("RATE_LIMIT_MAX_SUBMISSIONS")
                .and_then(|s| s.parse().ok()),
            rate_limit_window: non_empty("RATE_LIMIT_WINDOW"),
            cors_allowed_origins: non_empty("CORS_ALLOWED_ORIGINS").map(|s| {
                s.split(',')
                    .map(|origin| origin.trim().to_string())
                    .filter(|origin| !origin.is_empty())
                    .collect()
            }),
        }
    }
}
