// Copyright 2025 Tempo Developers
// SPDX-License-Identifier: Apache-2.0

//! # tempo-observability
//!
//! Logging infrastructure shared by the tempo crates, with per-crate debug
//! flag support.
//!
//! ## Features
//! - `file-logging`: timestamped run folders with a combined JSON log file

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod cli;
pub mod init;

pub use cli::*;
pub use init::*;

/// Known tempo crate names for debug flags
pub const KNOWN_CRATES: &[&str] = &["tempo", "tempo-config", "tempo-updater"];
