//! Log output and Prometheus export settings.

use std::net::{Ipv4Addr, SocketAddr};

use serde::{Deserialize, Serialize};

/// `observability:` section.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Subscriber settings.
    pub logging: LoggingConfig,
    /// Exporter settings.
    pub metrics: MetricsExportConfig,
}

/// How log lines are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line, with the current span.
    #[default]
    Json,
    /// Human-readable lines for local runs.
    Pretty,
}

/// Subscriber settings. `RUST_LOG` wins over `level` when set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info,order_processor=debug`.
    pub level: String,
    /// Line rendering.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: LogFormat::default(),
        }
    }
}

/// Prometheus exporter. Off unless `enabled`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsExportConfig {
    /// Start the HTTP exporter.
    pub enabled: bool,
    /// Address serving `/metrics`.
    pub listen_addr: SocketAddr,
}

impl Default for MetricsExportConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 9090)),
        }
    }
}
