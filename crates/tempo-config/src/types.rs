// Copyright 2025 Tempo Developers
// SPDX-License-Identifier: Apache-2.0

//! Configuration type definitions
//!
//! This module defines all configuration structs that map to sections in
//! `tempo_configuration.toml`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Controller names accepted by `updater.controller`
pub const CONTROLLER_NAMES: &[&str] = &["buffered", "priority"];

/// Log levels accepted by `logging.level`
pub const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TempoConfig {
    pub updater: UpdaterConfig,
    pub logging: LoggingConfig,
}

/// Workspace updater configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpdaterConfig {
    /// Worker threads for component updates (0 = available parallelism)
    pub threads: usize,
    /// Sleep at the start of every update cycle, in milliseconds
    pub update_delay_ms: u64,
    /// Update controller: "buffered" or "priority"
    pub controller: String,
    /// Maximum wait for the component updates of one cycle (0 = wait forever)
    pub cycle_timeout_ms: u64,
    /// Maximum wait for drained UI events to complete (0 = wait forever)
    pub event_drain_timeout_ms: u64,
    /// Name prefix of the worker threads
    pub thread_name_prefix: String,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            threads: 0, // 0 = auto-detect
            update_delay_ms: 0,
            controller: "buffered".to_string(),
            cycle_timeout_ms: 0,
            event_drain_timeout_ms: 0,
            thread_name_prefix: "tempo-update".to_string(),
        }
    }
}

impl UpdaterConfig {
    /// Number of worker threads, resolving 0 to the available parallelism
    pub fn resolved_threads(&self) -> usize {
        if self.threads > 0 {
            self.threads
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }

    pub fn update_delay(&self) -> Duration {
        Duration::from_millis(self.update_delay_ms)
    }

    /// Cycle timeout, `None` when waits are unbounded
    pub fn cycle_timeout(&self) -> Option<Duration> {
        (self.cycle_timeout_ms > 0).then(|| Duration::from_millis(self.cycle_timeout_ms))
    }

    /// Event drain timeout, `None` when waits are unbounded
    pub fn event_drain_timeout(&self) -> Option<Duration> {
        (self.event_drain_timeout_ms > 0).then(|| Duration::from_millis(self.event_drain_timeout_ms))
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default log level (trace, debug, info, warn, error)
    pub level: String,
    pub format: LogFormat,
    /// Write a combined log file per run (requires the `file-logging` feature)
    pub file_logging: bool,
    pub log_dir: PathBuf,
    /// Keep log runs for N days
    pub retention_days: u64,
    /// Keep the N most recent runs
    pub retention_runs: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            file_logging: false,
            log_dir: PathBuf::from("./logs"),
            retention_days: 30,
            retention_runs: 10,
        }
    }
}
