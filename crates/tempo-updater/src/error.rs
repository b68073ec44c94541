// Copyright 2025 Tempo Developers
// SPDX-License-Identifier: Apache-2.0

//! Error types for the workspace updater

use std::any::Any;

/// Errors raised by the scheduler itself
#[derive(Debug, thiserror::Error)]
pub enum UpdaterError {
    #[error("Workspace updater already running")]
    AlreadyRunning,

    #[error("Failed to spawn thread: {0}")]
    ThreadSpawn(String),

    #[error("Executor '{0}' has shut down")]
    ExecutorShutDown(String),

    #[error("Update cycle {time} timed out with {pending} update parts pending")]
    CycleTimedOut { time: u64, pending: usize },

    #[error("Update cycle {time} was interrupted")]
    CycleInterrupted { time: u64 },

    #[error("An intercepting event queue is already installed")]
    InterceptorAlreadyInstalled,

    #[error("No intercepting event queue is installed")]
    InterceptorNotInstalled,

    #[error("Event dispatcher has shut down")]
    DispatcherShutDown,

    #[error("Task failed: {0}")]
    TaskFailed(String),

    #[error(transparent)]
    Config(#[from] tempo_config::ConfigError),
}

/// Result type for updater operations
pub type UpdaterResult<T> = Result<T, UpdaterError>;

/// Failure of a single component update part
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ComponentError {
    #[error("component update failed: {0}")]
    Failed(String),

    #[error("component update panicked: {0}")]
    Panicked(String),
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
