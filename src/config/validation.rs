use super::models::Config;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Active and complete directories must differ: {path}")]
    SharedDirectory { path: String },

    #[error("Directory setting '{field}' must not be empty")]
    EmptyDirectory { field: &'static str },

    #[error("Idle timeout must be positive")]
    InvalidIdleTimeout,

    #[error("Record id field must not be empty")]
    EmptyRecordIdField,

    #[error("Duration must be positive: {field}")]
    InvalidRetentionDuration { field: &'static str },

    #[error("max_body_bytes must be positive")]
    InvalidBodyLimit,
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_storage(config)?;
    validate_retention(config)?;
    validate_server(config)?;
    Ok(())
}

fn validate_storage(config: &Config) -> Result<(), ValidationError> {
    let storage = &config.storage;

    if storage.active_dir.as_os_str().is_empty() {
        return Err(ValidationError::EmptyDirectory { field: "active_dir" });
    }
    if storage.complete_dir.as_os_str().is_empty() {
        return Err(ValidationError::EmptyDirectory {
            field: "complete_dir",
        });
    }

    // Temp files in both directories share one naming scheme.
    if storage.active_dir == storage.complete_dir {
        return Err(ValidationError::SharedDirectory {
            path: storage.active_dir.display().to_string(),
        });
    }

    if storage.idle_timeout.0 == Duration::ZERO {
        return Err(ValidationError::InvalidIdleTimeout);
    }

    if storage.record_id_field.trim().is_empty() {
        return Err(ValidationError::EmptyRecordIdField);
    }

    Ok(())
}

fn validate_retention(config: &Config) -> Result<(), ValidationError> {
    if !config.retention.enabled {
        return Ok(());
    }

    if config.retention.complete_ttl.0 == Duration::ZERO {
        return Err(ValidationError::InvalidRetentionDuration {
            field: "complete_ttl",
        });
    }
    if config.retention.sweep_interval.0 == Duration::ZERO {
        return Err(ValidationError::InvalidRetentionDuration {
            field: "sweep_interval",
        });
    }

    Ok(())
}

fn validate_server(config: &Config) -> Result<(), ValidationError> {
    if config.server.max_body_bytes == 0 {
        return Err(ValidationError::InvalidBodyLimit);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::humanize::HumanDuration;
    use std::path::PathBuf;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_shared_directory_rejected() {
        let mut config = Config::default();
        config.storage.complete_dir = config.storage.active_dir.clone();

        assert!(matches!(
            validate(&config),
            Err(ValidationError::SharedDirectory { .. })
        ));
    }

    #[test]
    fn test_empty_directory_rejected() {
        let mut config = Config::default();
        config.storage.active_dir = PathBuf::new();

        assert!(matches!(
            validate(&config),
            Err(ValidationError::EmptyDirectory { field: "active_dir" })
        ));
    }

    #[test]
    fn test_zero_idle_timeout_rejected() {
        let mut config = Config::default();
        config.storage.idle_timeout = HumanDuration::from_millis(0);

        assert!(matches!(
            validate(&config),
            Err(ValidationError::InvalidIdleTimeout)
        ));
    }

    #[test]
    fn test_blank_record_id_field_rejected() {
        let mut config = Config::default();
        config.storage.record_id_field = "  ".to_string();

        assert!(matches!(
            validate(&config),
            Err(ValidationError::EmptyRecordIdField)
        ));
    }

    #[test]
    fn test_retention_durations_only_checked_when_enabled() {
        let mut config = Config::default();
        config.retention.sweep_interval = HumanDuration::from_millis(0);
        assert!(validate(&config).is_err());

        config.retention.enabled = false;
        assert!(validate(&config).is_ok());
    }
}
