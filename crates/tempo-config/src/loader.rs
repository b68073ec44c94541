// Copyright 2025 Tempo Developers
// SPDX-License-Identifier: Apache-2.0

//! Configuration file loading with override support
//!
//! This module implements the 3-tier configuration loading system:
//! 1. TOML file (base defaults)
//! 2. Environment variables (runtime overrides)
//! 3. CLI arguments (explicit user overrides)

use crate::{ConfigError, ConfigResult, TempoConfig};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "tempo_configuration.toml";

/// Find the tempo configuration file
///
/// Search order:
/// 1. `TEMPO_CONFIG_PATH` environment variable
/// 2. Current working directory: `./tempo_configuration.toml`
/// 3. Parent directories (up to 5 levels)
///
/// # Errors
///
/// Returns `ConfigError::FileNotFound` if no config file is found in any location
pub fn find_config_file() -> ConfigResult<PathBuf> {
    if let Ok(env_path) = env::var("TEMPO_CONFIG_PATH") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        } else {
            return Err(ConfigError::FileNotFound(format!(
                "Config file specified by TEMPO_CONFIG_PATH not found: {}",
                path.display()
            )));
        }
    }

    let mut search_paths = Vec::new();

    if let Ok(cwd) = env::current_dir() {
        search_paths.push(cwd.join(CONFIG_FILE_NAME));

        let mut current = cwd.clone();
        for _ in 0..5 {
            if let Some(parent) = current.parent() {
                search_paths.push(parent.join(CONFIG_FILE_NAME));
                current = parent.to_path_buf();
            }
        }
    }

    for path in &search_paths {
        if path.exists() {
            return Ok(path.clone());
        }
    }

    let search_list = search_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    Err(ConfigError::FileNotFound(format!(
        "Configuration file '{}' not found in any of these locations:\n{}\n\nSet TEMPO_CONFIG_PATH environment variable to specify custom location.",
        CONFIG_FILE_NAME, search_list
    )))
}

/// Load configuration from TOML file
///
/// # Arguments
///
/// * `config_path` - Optional path to config file. If `None`, will search for config file.
/// * `cli_args` - Optional CLI argument overrides
///
/// # Errors
///
/// Returns error if config file is not found or contains invalid TOML
pub fn load_config(
    config_path: Option<&Path>,
    cli_args: Option<&HashMap<String, String>>,
) -> ConfigResult<TempoConfig> {
    let config_file = if let Some(path) = config_path {
        path.to_path_buf()
    } else {
        find_config_file()?
    };

    let content = fs::read_to_string(&config_file)?;
    let mut config: TempoConfig = toml::from_str(&content)?;

    apply_environment_overrides(&mut config);

    if let Some(cli) = cli_args {
        apply_cli_overrides(&mut config, cli);
    }

    Ok(config)
}

/// Apply environment variable overrides to configuration
///
/// Supported environment variables:
/// - `TEMPO_UPDATER_THREADS` -> `updater.threads`
/// - `TEMPO_UPDATE_DELAY_MS` -> `updater.update_delay_ms`
/// - `TEMPO_UPDATE_CONTROLLER` -> `updater.controller`
/// - `TEMPO_CYCLE_TIMEOUT_MS` -> `updater.cycle_timeout_ms`
/// - `TEMPO_EVENT_DRAIN_TIMEOUT_MS` -> `updater.event_drain_timeout_ms`
/// - `TEMPO_LOG_LEVEL` -> `logging.level`
/// - `TEMPO_LOG_DIR` -> `logging.log_dir`
pub fn apply_environment_overrides(config: &mut TempoConfig) {
    if let Ok(value) = env::var("TEMPO_UPDATER_THREADS") {
        if let Ok(threads) = value.parse::<usize>() {
            config.updater.threads = threads;
        }
    }
    if let Ok(value) = env::var("TEMPO_UPDATE_DELAY_MS") {
        if let Ok(delay) = value.parse::<u64>() {
            config.updater.update_delay_ms = delay;
        }
    }
    if let Ok(value) = env::var("TEMPO_UPDATE_CONTROLLER") {
        config.updater.controller = value.to_lowercase();
    }
    if let Ok(value) = env::var("TEMPO_CYCLE_TIMEOUT_MS") {
        if let Ok(timeout) = value.parse::<u64>() {
            config.updater.cycle_timeout_ms = timeout;
        }
    }
    if let Ok(value) = env::var("TEMPO_EVENT_DRAIN_TIMEOUT_MS") {
        if let Ok(timeout) = value.parse::<u64>() {
            config.updater.event_drain_timeout_ms = timeout;
        }
    }

    if let Ok(value) = env::var("TEMPO_LOG_LEVEL") {
        config.logging.level = value.to_lowercase();
    }
    if let Ok(value) = env::var("TEMPO_LOG_DIR") {
        config.logging.log_dir = PathBuf::from(value);
    }
}

/// Apply CLI argument overrides to configuration
///
/// # Arguments
///
/// * `config` - Configuration to modify
/// * `cli_args` - HashMap of CLI arguments (e.g., `{"threads": "4", "controller": "priority"}`)
pub fn apply_cli_overrides(config: &mut TempoConfig, cli_args: &HashMap<String, String>) {
    if let Some(value) = cli_args.get("threads") {
        if let Ok(threads) = value.parse::<usize>() {
            config.updater.threads = threads;
        }
    }
    if let Some(value) = cli_args.get("update_delay_ms") {
        if let Ok(delay) = value.parse::<u64>() {
            config.updater.update_delay_ms = delay;
        }
    }
    if let Some(value) = cli_args.get("controller") {
        config.updater.controller = value.to_lowercase();
    }
    if let Some(value) = cli_args.get("cycle_timeout_ms") {
        if let Ok(timeout) = value.parse::<u64>() {
            config.updater.cycle_timeout_ms = timeout;
        }
    }
    if let Some(value) = cli_args.get("event_drain_timeout_ms") {
        if let Ok(timeout) = value.parse::<u64>() {
            config.updater.event_drain_timeout_ms = timeout;
        }
    }
    if let Some(value) = cli_args.get("log_level") {
        config.logging.level = value.to_lowercase();
    }
}
