use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use compliscan_core::config::{RateLimitConfig, ScannerConfig};
use thiserror::Error;

use super::{
    models::{
        Config, ConfigMetadata, ConfigWarnings, CorsConfig, DatabaseConfig,
        RedisConfig, ServerConfig,
    },
    sources::{EnvConfig, FileConfig},
};

const DEFAULT_CONFIG_LOCATIONS: &[&str] =
    &["compliscan.toml", "config/compliscan.toml"];

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
    /// Replaces the process environment; used by tests.
    pub env: Option<EnvConfig>,
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("configuration file missing: {path}")]
    MissingConfig { path: PathBuf },
    #[error("failed to read configuration {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid duration for {field}: '{value}'")]
    InvalidDuration {
        field: &'static str,
        value: String,
        #[source]
        source: humantime::DurationError,
    },
    #[error("invalid value for {field}: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
    #[error(transparent)]
    EnvFile(#[from] dotenvy::Error),
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    pub fn with_env_config(mut self, env: EnvConfig) -> Self {
        self.options.env = Some(env);
        self
    }

    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = self.load_env_file()?;
        let env = match &self.options.env {
            Some(env) => env.clone(),
            None => EnvConfig::gather(),
        };

        let (file_config, config_path) = self.load_file_config(&env)?;
        let (mut config, warnings) = compose_config(file_config, env, config_path.is_some())?;
        config.metadata = ConfigMetadata {
            config_path,
            env_file_loaded,
        };

        Ok(ConfigLoad { config, warnings })
    }

    fn load_env_file(&self) -> Result<bool, ConfigLoadError> {
        if self.options.env.is_some() {
            return Ok(false);
        }
        let loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true),
            None => dotenvy::dotenv().map(|_| true),
        };
        match loaded {
            Ok(loaded) => Ok(loaded),
            Err(dotenvy::Error::Io(_)) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn load_file_config(
        &self,
        env: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        let explicit = self
            .options
            .config_path
            .clone()
            .or_else(|| env.config_path.clone());

        let path = match explicit {
            Some(path) if !path.exists() => {
                return Err(ConfigLoadError::MissingConfig { path });
            }
            Some(path) => path,
            None => match DEFAULT_CONFIG_LOCATIONS
                .iter()
                .map(PathBuf::from)
                .find(|candidate| candidate.exists())
            {
                Some(path) => path,
                None => return Ok((None, None)),
            },
        };

        let file_config = read_file_config(&path)?;
        Ok((Some(file_config), Some(path)))
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig, ConfigLoadError> {
    let contents =
        fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    toml::from_str(&contents).map_err(|source| ConfigLoadError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_duration(
    field: &'static str,
    value: Option<String>,
) -> Result<Option<Duration>, ConfigLoadError> {
    value
        .map(|raw| {
            humantime::parse_duration(raw.trim()).map_err(|source| {
                ConfigLoadError::InvalidDuration {
                    field,
                    value: raw,
                    source,
                }
            })
        })
        .transpose()
}

fn compose_config(
    file_config: Option<FileConfig>,
    env: EnvConfig,
    config_present: bool,
) -> Result<(Config, ConfigWarnings), ConfigLoadError> {
    let mut warnings = ConfigWarnings::default();

    if !config_present {
        warnings.push_with_hint(
            "No compliscan.toml detected; using environment variables and defaults",
            "Set COMPLISCAN_CONFIG or pass --config to point at a configuration file",
        );
    }

    let FileConfig {
        server: file_server,
        database: file_database,
        redis: file_redis,
        scanner: file_scanner,
        rate_limit: file_rate_limit,
        cors: file_cors,
    } = file_config.unwrap_or_default();

    let defaults = ServerConfig::default();
    let server = ServerConfig {
        host: env
            .server_host
            .or(file_server.host)
            .unwrap_or(defaults.host),
        port: env.server_port.or(file_server.port).unwrap_or(defaults.port),
    };

    let database = DatabaseConfig {
        url: env.database_url.or(file_database.url),
    };
    if let Some(url) = &database.url
        && !(url.starts_with("postgres://") || url.starts_with("postgresql://"))
    {
        return Err(ConfigLoadError::Invalid {
            field: "database.url",
            message: "must start with postgres:// or postgresql://".into(),
        });
    }
    if database.url.is_none() {
        warnings.push_with_hint(
            "No database configured; scans are kept in memory and lost on restart",
            "Set DATABASE_URL to persist scans in PostgreSQL",
        );
    }

    let redis = env
        .redis_url
        .map(|url| RedisConfig { url })
        .or_else(|| file_redis.map(|redis| RedisConfig { url: redis.url }));

    let mut scanner = ScannerConfig::default();
    if let Some(workers) = env.scanner_workers.or(file_scanner.workers) {
        if workers == 0 {
            return Err(ConfigLoadError::Invalid {
                field: "scanner.workers",
                message: "at least one worker is required".into(),
            });
        }
        scanner.workers = workers;
    }
    if let Some(delay) = parse_duration(
        "scanner.step_delay",
        env.scanner_step_delay.or(file_scanner.step_delay),
    )? {
        scanner.step_delay_ms = delay.as_millis() as u64;
    }
    if let Some(max_runtime) = parse_duration(
        "scanner.max_runtime",
        env.scanner_max_runtime.or(file_scanner.max_runtime),
    )? {
        scanner.max_runtime_secs = max_runtime.as_secs().max(1);
    }
    if let Some(timeout) = parse_duration(
        "scanner.publish_timeout",
        env.scanner_publish_timeout.or(file_scanner.publish_timeout),
    )? {
        scanner.publish_timeout_ms = timeout.as_millis() as u64;
    }
    if let Some(interval) =
        parse_duration("scanner.poll_interval", file_scanner.poll_interval)?
    {
        scanner.poll_interval_ms = interval.as_millis() as u64;
    }
    if let Some(capacity) = file_scanner.channel_capacity {
        scanner.channel_capacity = capacity.max(1);
    }

    let mut rate_limit = RateLimitConfig::default();
    if let Some(max) = env
        .rate_limit_max_submissions
        .or(file_rate_limit.max_submissions)
    {
        rate_limit.max_submissions = max;
    }
    if let Some(window) = parse_duration(
        "rate_limit.window",
        env.rate_limit_window.or(file_rate_limit.window),
    )? {
        rate_limit.window_secs = window.as_secs().max(1);
    }

    let cors = CorsConfig {
        allowed_origins: env
            .cors_allowed_origins
            .or(file_cors.allowed_origins)
            .unwrap_or_default(),
    };

    Ok((
        Config {
            server,
            database,
            redis,
            scanner,
            rate_limit,
            cors,
            metadata: ConfigMetadata::default(),
        },
        warnings,
    ))
}
