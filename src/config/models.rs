use crate::humanize::HumanDuration;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    /// Largest accepted request body, in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

/// How finalize decides which line, if any, carries the stream metadata
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataConvention {
    /// A stream of at most one line is treated as metadata only
    #[default]
    LineCount,
    /// Only a leading `{"$metadata": {...}}` line is treated as metadata
    Marker,
}

/// Stream storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_active_dir")]
    pub active_dir: PathBuf,
    #[serde(default = "default_complete_dir")]
    pub complete_dir: PathBuf,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: HumanDuration,
    /// Record field used to address lines for edit/delete
    #[serde(default = "default_record_id_field")]
    pub record_id_field: String,
    #[serde(default)]
    pub metadata_convention: MetadataConvention,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            active_dir: default_active_dir(),
            complete_dir: default_complete_dir(),
            idle_timeout: default_idle_timeout(),
            record_id_field: default_record_id_field(),
            metadata_convention: MetadataConvention::default(),
        }
    }
}

fn default_active_dir() -> PathBuf {
    PathBuf::from("data/active")
}

fn default_complete_dir() -> PathBuf {
    PathBuf::from("data/complete")
}

fn default_idle_timeout() -> HumanDuration {
    HumanDuration::from_millis(5000)
}

fn default_record_id_field() -> String {
    "id".to_string()
}

/// Retention configuration for complete documents
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetentionConfig {
    #[serde(default = "default_retention_enabled")]
    pub enabled: bool,
    #[serde(default = "default_complete_ttl")]
    pub complete_ttl: HumanDuration,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: HumanDuration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: default_retention_enabled(),
            complete_ttl: default_complete_ttl(),
            sweep_interval: default_sweep_interval(),
        }
    }
}

fn default_retention_enabled() -> bool {
    true
}

fn default_complete_ttl() -> HumanDuration {
    HumanDuration::from_secs(30 * 86_400)
}

fn default_sweep_interval() -> HumanDuration {
    HumanDuration::from_secs(3600)
}

/// Telemetry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetryConfig {
    /// Fallback filter when `RUST_LOG` is unset
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.server.bind_addr.to_string(), "0.0.0.0:8080");
        assert_eq!(config.storage.active_dir, PathBuf::from("data/active"));
        assert_eq!(config.storage.idle_timeout.0, Duration::from_millis(5000));
        assert_eq!(config.storage.record_id_field, "id");
        assert_eq!(config.storage.metadata_convention, MetadataConvention::LineCount);
        assert!(config.retention.enabled);
    }

    #[test]
    fn test_convention_from_toml() {
        let config: Config = toml::from_str(
            r#"
[storage]
metadata_convention = "marker"
idle_timeout = "250ms"
            "#,
        )
        .unwrap();

        assert_eq!(config.storage.metadata_convention, MetadataConvention::Marker);
        assert_eq!(config.storage.idle_timeout.0, Duration::from_millis(250));
    }
}
