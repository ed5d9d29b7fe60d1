//! Configuration management for StreamBox
//!
//! This module provides a layered configuration system that loads settings from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use streambox::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("Active streams live in: {}", config.storage.active_dir.display());
//! ```
//!
//! # Environment Variables
//!
//! Configuration can be overridden using environment variables with the pattern:
//! `STREAMBOX__<section>__<key>`
//!
//! Examples:
//! - `STREAMBOX__SERVER__BIND_ADDR=0.0.0.0:9000`
//! - `STREAMBOX__STORAGE__ACTIVE_DIR=/var/lib/streambox/active`
//! - `STREAMBOX__STORAGE__IDLE_TIMEOUT=10s`
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `config/streambox.toml`.
//! This can be overridden using the `STREAMBOX_CONFIG` environment variable.

mod models;
mod sources;
mod validation;

pub use crate::humanize::HumanDuration;
pub use models::{
    Config, MetadataConvention, RetentionConfig, ServerConfig, StorageConfig, TelemetryConfig,
};
pub use validation::ValidationError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file is malformed or validation fails.
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path
    ///
    /// Useful for testing with custom configuration files.
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }
}
