// Copyright 2025 Tempo Developers
// SPDX-License-Identifier: Apache-2.0

//! # Tempo - workspace update scheduler
//!
//! Tempo advances a workspace of simulation components in discrete cycles.
//! Each cycle propagates couplings, updates every component in parallel on
//! a worker pool, then lets queued UI actions run against a consistent
//! workspace.
//!
//! ## Crates
//! - **`config`**: TOML configuration with environment and CLI overrides
//! - **`observability`**: logging setup and per-crate debug flags
//! - **`updater`**: the scheduler, worker pool, and UI event interception
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use tempo::prelude::*;
//! use tempo::workload::build_workload;
//!
//! let workload = build_workload(8, 1, Duration::from_micros(100));
//! let updater = WorkspaceUpdater::new(
//!     workload.registry.clone(),
//!     workload.couplings.clone(),
//!     UpdaterSettings::default(),
//! )?;
//!
//! updater.iterate(100)?.wait()?;
//! assert_eq!(updater.time(), 100);
//! # Ok::<(), tempo::updater::UpdaterError>(())
//! ```

pub use tempo_config as config;
pub use tempo_observability as observability;
pub use tempo_updater as updater;

pub mod workload;

/// Prelude - commonly used types and traits
pub mod prelude {
    pub use crate::config::{load_config, TempoConfig, UpdaterConfig};
    pub use crate::updater::{
        all_equal, ComponentError, ComponentId, ComponentLock, ComponentRegistry, ComponentUpdateListener,
        CouplingManager, EventDispatcher, NoCouplings, UpdateController, UpdaterSettings, WorkspaceComponent,
        WorkspaceUpdater, WorkspaceUpdaterListener,
    };
}
