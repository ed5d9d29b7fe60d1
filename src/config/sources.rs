use super::models::Config;
use config::{ConfigError, Environment, File};
use std::env;
use std::path::PathBuf;

const CONFIG_ENV_VAR: &str = "STREAMBOX_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/streambox.toml";
const ENV_PREFIX: &str = "STREAMBOX";
const ENV_SEPARATOR: &str = "__";

/// Load configuration from multiple sources with priority:
/// 1. Defaults (embedded in structs)
/// 2. TOML file (if exists)
/// 3. Environment variables from .env file (via dotenvy)
/// 4. System environment variables (highest priority)
pub fn load() -> Result<Config, ConfigError> {
    let _ = dotenvy::dotenv();

    let config_path = env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

    load_from_sources(config_path)
}

/// Load configuration from a specific path and environment
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    if config_path.exists() {
        tracing::info!("Loading configuration from: {}", config_path.display());
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::warn!(
            "Configuration file not found at {}, using defaults and environment overrides",
            config_path.display()
        );
    }

    // STREAMBOX__STORAGE__ACTIVE_DIR -> storage.active_dir
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    let config = builder.build()?;
    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MetadataConvention;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_load_defaults_only() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nonexistent.toml");

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.server.bind_addr.to_string(), "0.0.0.0:8080");
        assert_eq!(config.storage.idle_timeout.0, Duration::from_secs(5));
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[server]
bind_addr = "127.0.0.1:9000"
max_body_bytes = 4096

[storage]
active_dir = "/srv/streams/active"
complete_dir = "/srv/streams/complete"
idle_timeout = "2s"
record_id_field = "uuid"
metadata_convention = "marker"

[retention]
enabled = false
complete_ttl = "7d"
sweep_interval = "10m"

[telemetry]
log_filter = "streambox=debug"
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.server.bind_addr.to_string(), "127.0.0.1:9000");
        assert_eq!(config.server.max_body_bytes, 4096);
        assert_eq!(config.storage.active_dir, PathBuf::from("/srv/streams/active"));
        assert_eq!(config.storage.idle_timeout.0, Duration::from_secs(2));
        assert_eq!(config.storage.record_id_field, "uuid");
        assert_eq!(config.storage.metadata_convention, MetadataConvention::Marker);
        assert!(!config.retention.enabled);
        assert_eq!(config.retention.complete_ttl.0, Duration::from_secs(7 * 86_400));
        assert_eq!(config.retention.sweep_interval.0, Duration::from_secs(600));
        assert_eq!(config.telemetry.log_filter, "streambox=debug");
    }
}
