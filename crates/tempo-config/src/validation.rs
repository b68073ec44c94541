// Copyright 2025 Tempo Developers
// SPDX-License-Identifier: Apache-2.0

//! Configuration validation
//!
//! Ensures configuration values are within valid ranges and name known
//! controllers, levels and formats.

use crate::{ConfigError, ConfigResult, TempoConfig, CONTROLLER_NAMES, LOG_LEVELS};

/// Upper bound on worker threads
pub const MAX_THREADS: usize = 1024;

/// Validation errors that can occur during config validation
#[derive(Debug, Clone)]
pub enum ConfigValidationError {
    MissingRequired { field: String },
    InvalidValue { field: String, reason: String },
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingRequired { field } => {
                write!(f, "Missing required configuration: {}", field)
            }
            Self::InvalidValue { field, reason } => {
                write!(f, "Invalid configuration value for {}: {}", field, reason)
            }
        }
    }
}

/// Validate the complete configuration
///
/// # Errors
///
/// Returns `ConfigError::ValidationError` listing every problem found
pub fn validate_config(config: &TempoConfig) -> ConfigResult<()> {
    let mut errors = Vec::new();

    validate_updater(config, &mut errors);
    validate_logging(config, &mut errors);

    if !errors.is_empty() {
        let error_messages = errors
            .iter()
            .map(|e| format!("  - {}", e))
            .collect::<Vec<_>>()
            .join("\n");

        return Err(ConfigError::ValidationError(format!(
            "Configuration validation failed:\n{}",
            error_messages
        )));
    }

    Ok(())
}

fn validate_updater(config: &TempoConfig, errors: &mut Vec<ConfigValidationError>) {
    let updater = &config.updater;

    if updater.threads > MAX_THREADS {
        errors.push(ConfigValidationError::InvalidValue {
            field: "updater.threads".to_string(),
            reason: format!("must be at most {}", MAX_THREADS),
        });
    }

    if !CONTROLLER_NAMES.contains(&updater.controller.as_str()) {
        errors.push(ConfigValidationError::InvalidValue {
            field: "updater.controller".to_string(),
            reason: format!("must be one of: {}", CONTROLLER_NAMES.join(", ")),
        });
    }

    if updater.thread_name_prefix.is_empty() {
        errors.push(ConfigValidationError::MissingRequired {
            field: "updater.thread_name_prefix".to_string(),
        });
    }
}

fn validate_logging(config: &TempoConfig, errors: &mut Vec<ConfigValidationError>) {
    let logging = &config.logging;

    if !LOG_LEVELS.contains(&logging.level.as_str()) {
        errors.push(ConfigValidationError::InvalidValue {
            field: "logging.level".to_string(),
            reason: format!("must be one of: {}", LOG_LEVELS.join(", ")),
        });
    }

    if logging.retention_runs == 0 {
        errors.push(ConfigValidationError::InvalidValue {
            field: "logging.retention_runs".to_string(),
            reason: "must be at least 1".to_string(),
        });
    }

    if logging.file_logging && logging.log_dir.as_os_str().is_empty() {
        errors.push(ConfigValidationError::MissingRequired {
            field: "logging.log_dir".to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = TempoConfig::default();
        let result = validate_config(&config);
        if let Err(e) = &result {
            eprintln!("Validation error: {}", e);
        }
        assert!(result.is_ok());
    }

    #[test]
    fn test_too_many_threads() {
        let mut config = TempoConfig::default();
        config.updater.threads = MAX_THREADS + 1;

        let result = validate_config(&config);
        assert!(result.is_err());

        if let Err(ConfigError::ValidationError(msg)) = result {
            assert!(msg.contains("updater.threads"));
        }
    }

    #[test]
    fn test_unknown_controller() {
        let mut config = TempoConfig::default();
        config.updater.controller = "gauss-seidel".to_string();

        let result = validate_config(&config);
        assert!(result.is_err());

        if let Err(ConfigError::ValidationError(msg)) = result {
            assert!(msg.contains("updater.controller"));
            assert!(msg.contains("buffered"));
        }
    }

    #[test]
    fn test_errors_are_collected() {
        let mut config = TempoConfig::default();
        config.logging.level = "verbose".to_string();
        config.logging.retention_runs = 0;

        let result = validate_config(&config);
        if let Err(ConfigError::ValidationError(msg)) = result {
            assert!(msg.contains("logging.level"));
            assert!(msg.contains("logging.retention_runs"));
        } else {
            panic!("expected validation error");
        }
    }
}
