//! Configuration for the order processor.
//!
//! YAML with `${VAR}` / `${VAR:-default}` environment interpolation, parsed
//! with every section optional and validated before use.
//!
//! # Usage
//!
//! ```rust,ignore
//! use order_processor::config::load_config;
//!
//! // Load from default path (config.yaml)
//! let config = load_config(None)?;
//!
//! println!("workers: {}", config.worker_pool.workers);
//! ```

mod execution;
mod messaging;
mod observability;
mod simulation;
mod worker_pool;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use execution::ExecutionConfig;
pub use messaging::MessagingConfig;
pub use observability::{LogFormat, LoggingConfig, MetricsExportConfig, ObservabilityConfig};
pub use simulation::{SimulatedUserConfig, SimulationConfig};
pub use worker_pool::WorkerPoolConfig;

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Environment variable overriding the configuration file path.
pub const CONFIG_PATH_ENV: &str = "ORDER_PROCESSOR_CONFIG";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        /// Path to the config file.
        path: String,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("Failed to parse config YAML: {0}")]
    ParseError(#[from] serde_yaml_bw::Error),

    /// Configuration validation failed.
    #[error("Config validation failed: {0}")]
    ValidationError(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Execution engine configuration.
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Worker pool configuration.
    #[serde(default)]
    pub worker_pool: WorkerPoolConfig,
    /// Message bus configuration.
    #[serde(default)]
    pub messaging: MessagingConfig,
    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
    /// Simulated collaborator seed data.
    #[serde(default)]
    pub simulation: SimulationConfig,
}

pub(crate) const fn default_true() -> bool {
    true
}

// ============================================
// Configuration Loading
// ============================================

/// Load configuration from a YAML file with environment variable interpolation.
///
/// # Arguments
///
/// * `path` - Optional path to the config file. Defaults to `config.yaml`.
///
/// # Errors
///
/// Returns a `ConfigError` if the file cannot be read, parsed, or validated.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or(DEFAULT_CONFIG_PATH);

    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_string(),
        source: e,
    })?;

    load_config_from_string(&contents)
}

/// Load configuration from a YAML string.
///
/// # Errors
///
/// Returns a `ConfigError` if the YAML cannot be parsed or validated.
pub fn load_config_from_string(yaml: &str) -> Result<Config, ConfigError> {
    let interpolated = interpolate_env_vars(yaml);
    let config: Config = if interpolated.trim().is_empty() {
        Config::default()
    } else {
        serde_yaml_bw::from_str(&interpolated)?
    };
    validate_config(&config)?;
    Ok(config)
}

/// Load the file named by `ORDER_PROCESSOR_CONFIG` (or `config.yaml`),
/// falling back to defaults when it does not exist.
///
/// # Errors
///
/// Returns a `ConfigError` if an existing file cannot be parsed or validated.
pub fn load_config_or_default() -> Result<Config, ConfigError> {
    let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

    match load_config(Some(&path)) {
        Err(ConfigError::ReadError { source, .. })
            if source.kind() == std::io::ErrorKind::NotFound =>
        {
            tracing::warn!(path = %path, "Config file not found, using defaults");
            let config = Config::default();
            validate_config(&config)?;
            Ok(config)
        }
        other => other,
    }
}

/// Interpolate environment variables in a string.
///
/// Supports both `${VAR}` and `${VAR:-default}` syntax.
#[allow(clippy::expect_used)] // Regex is compile-time constant; expect() is safe here
fn interpolate_env_vars(input: &str) -> String {
    use std::sync::OnceLock;

    static ENV_VAR_REGEX: OnceLock<regex::Regex> = OnceLock::new();

    let re = ENV_VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("env var regex is valid")
    });

    re.replace_all(input, |cap: &regex::Captures<'_>| {
        let default_value = cap.get(2).map_or("", |m| m.as_str());
        match cap.get(1).map(|m| std::env::var(m.as_str())) {
            Some(Ok(v)) if !v.is_empty() => v,
            _ => default_value.to_string(),
        }
    })
    .into_owned()
}

/// Validate configuration values.
fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let exec = &config.execution;

    for (name, rate) in [
        ("maker_fee_rate", exec.maker_fee_rate),
        ("taker_fee_rate", exec.taker_fee_rate),
    ] {
        if rate < Decimal::ZERO || rate >= Decimal::ONE {
            return Err(ConfigError::ValidationError(format!(
                "execution.{name} must be in [0, 1)"
            )));
        }
    }

    if exec.minimum_fee < Decimal::ZERO {
        return Err(ConfigError::ValidationError(
            "execution.minimum_fee must not be negative".to_string(),
        ));
    }

    if exec.max_slippage < Decimal::ZERO || exec.max_slippage >= Decimal::ONE {
        return Err(ConfigError::ValidationError(
            "execution.max_slippage must be in [0, 1)".to_string(),
        ));
    }

    if exec.slippage < Decimal::ZERO || exec.slippage > exec.max_slippage {
        return Err(ConfigError::ValidationError(
            "execution.slippage must be between 0 and max_slippage".to_string(),
        ));
    }

    let pool = &config.worker_pool;
    if pool.workers == 0 {
        return Err(ConfigError::ValidationError(
            "worker_pool.workers must be positive".to_string(),
        ));
    }
    if pool.queue_size == 0 || pool.result_buffer == 0 || pool.error_buffer == 0 {
        return Err(ConfigError::ValidationError(
            "worker_pool queue and buffer sizes must be positive".to_string(),
        ));
    }

    let messaging = &config.messaging;
    if messaging.prefetch == 0 {
        return Err(ConfigError::ValidationError(
            "messaging.prefetch must be positive".to_string(),
        ));
    }
    if messaging.workers_per_queue == 0 {
        return Err(ConfigError::ValidationError(
            "messaging.workers_per_queue must be positive".to_string(),
        ));
    }
    if [
        &messaging.events_exchange,
        &messaging.audit_exchange,
        &messaging.monitoring_exchange,
    ]
    .iter()
    .any(|name| name.trim().is_empty())
    {
        return Err(ConfigError::ValidationError(
            "messaging exchange names must not be empty".to_string(),
        ));
    }

    Ok(())
}
