//! Layered server configuration: defaults, then `compliscan.toml`, then the
//! environment (including `.env`), then CLI flags applied by `main`.

pub mod loader;
pub mod models;
pub mod sources;

pub use loader::{ConfigLoad, ConfigLoadError, ConfigLoader, ConfigLoaderOptions};
pub use models::{
    Config, ConfigMetadata, ConfigWarning, ConfigWarnings, CorsConfig,
    DatabaseConfig, RedisConfig, ServerConfig,
};
pub use compliscan_core::config::{RateLimitConfig, ScannerConfig};
