// Copyright 2025 Tempo Developers
// SPDX-License-Identifier: Apache-2.0

//! Tempo Runner - drives a synthetic workspace through the updater
//!
//! Builds a chain of spinning components, runs update cycles on the worker
//! pool, and optionally feeds UI events that check the workspace is
//! consistent whenever they run.
//!
//! Usage:
//!   tempo-runner --components 16 --threads 4 --iterations 1000
//!   tempo-runner --ui-events --debug tempo-updater     # until Ctrl+C

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use tempo::config::{
    apply_cli_overrides, apply_environment_overrides, load_config, validate_config, ConfigError, LogFormat,
    LoggingConfig, TempoConfig,
};
use tempo::observability::{init_logging, parse_debug_flags, CrateDebugFlags, LoggingOptions, KNOWN_CRATES};
use tempo::updater::{EventDispatcher, TaskHandle, WorkspaceUpdater};
use tempo::workload::{build_workload, Workload};

/// Tempo Runner - multi-threaded workspace update demo
#[derive(Parser, Debug)]
#[command(name = "tempo-runner", version, long_about = None)]
struct Args {
    /// Path to tempo_configuration.toml (searched for when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of components in the workspace
    #[arg(long, default_value_t = 8)]
    components: usize,

    /// Update parts per component
    #[arg(long, default_value_t = 1)]
    parts: usize,

    /// Number of cycles to run (runs until Ctrl+C when omitted)
    #[arg(short, long)]
    iterations: Option<u64>,

    /// Worker threads (overrides configuration)
    #[arg(short, long)]
    threads: Option<usize>,

    /// Delay at the start of each cycle in milliseconds (overrides configuration)
    #[arg(long)]
    delay_ms: Option<u64>,

    /// Update controller: buffered or priority (overrides configuration)
    #[arg(long)]
    controller: Option<String>,

    /// Time allowed for queued UI events to drain on uninstall, in milliseconds
    #[arg(long)]
    drain_timeout_ms: Option<u64>,

    /// CPU time burned per update part, in microseconds
    #[arg(long, default_value_t = 200)]
    work_us: u64,

    /// Feed UI consistency checks through an intercepting event queue
    #[arg(long, default_value_t = false)]
    ui_events: bool,

    /// Interval between UI consistency checks in milliseconds
    #[arg(long, default_value_t = 5)]
    check_interval_ms: u64,

    /// Enable debug logging for crates (comma-separated, or "all")
    #[arg(long)]
    debug: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_runner_config(&args)?;
    let flags = debug_flags(&args);
    let _log_guard = init_logging(&flags, &logging_options(&config.logging))?;

    info!(
        "[RUNNER] {} components x {} parts, {}us per part",
        args.components, args.parts, args.work_us
    );

    let workload = Arc::new(build_workload(
        args.components,
        args.parts,
        Duration::from_micros(args.work_us),
    ));
    let updater = WorkspaceUpdater::from_config(
        workload.registry.clone(),
        workload.couplings.clone(),
        &config.updater,
    )
    .context("Failed to create workspace updater")?;

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        info!("[RUNNER] Shutdown signal received");
        r.store(false, Ordering::SeqCst);
    })?;

    let check = if args.ui_events {
        Some(UiCheck::start(
            &updater,
            workload.clone(),
            running.clone(),
            Duration::from_millis(args.check_interval_ms),
        )?)
    } else {
        None
    };

    let started = Instant::now();
    let handle = match args.iterations {
        Some(cycles) => updater.iterate(cycles)?,
        None => {
            info!("[RUNNER] Running until Ctrl+C");
            updater.run()?
        }
    };
    wait_for_cycles(&updater, &handle, &running)?;
    let elapsed = started.elapsed();

    running.store(false, Ordering::SeqCst);
    let check_summary = match check {
        Some(check) => Some(check.finish(&updater)?),
        None => None,
    };

    print_summary(&updater, &workload, elapsed, check_summary);
    updater.shutdown();
    Ok(())
}

/// Load configuration, falling back to defaults when no file exists
fn load_runner_config(args: &Args) -> Result<TempoConfig> {
    let mut cli = HashMap::new();
    if let Some(threads) = args.threads {
        cli.insert("threads".to_string(), threads.to_string());
    }
    if let Some(delay) = args.delay_ms {
        cli.insert("update_delay_ms".to_string(), delay.to_string());
    }
    if let Some(controller) = &args.controller {
        cli.insert("controller".to_string(), controller.clone());
    }
    if let Some(drain) = args.drain_timeout_ms {
        cli.insert("event_drain_timeout_ms".to_string(), drain.to_string());
    }

    let config = match load_config(args.config.as_deref(), Some(&cli)) {
        Ok(config) => config,
        Err(ConfigError::FileNotFound(_)) if args.config.is_none() => {
            let mut config = TempoConfig::default();
            apply_environment_overrides(&mut config);
            apply_cli_overrides(&mut config, &cli);
            config
        }
        Err(e) => return Err(e).context("Failed to load configuration"),
    };

    validate_config(&config).context("Invalid configuration")?;
    Ok(config)
}

fn debug_flags(args: &Args) -> CrateDebugFlags {
    let mut flags = parse_debug_flags();
    if let Some(list) = &args.debug {
        for name in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            if name == "all" {
                for crate_name in KNOWN_CRATES {
                    flags.enabled_crates.insert(crate_name.to_string(), true);
                }
            } else {
                flags.enabled_crates.insert(name.to_string(), true);
            }
        }
    }
    flags
}

fn logging_options(logging: &LoggingConfig) -> LoggingOptions {
    LoggingOptions {
        level: logging.level.clone(),
        json: logging.format == LogFormat::Json,
        file_logging: logging.file_logging,
        log_dir: logging.log_dir.clone(),
        retention_days: logging.retention_days,
        retention_runs: logging.retention_runs,
    }
}

/// Wait for the driver, stopping it once Ctrl+C is pressed
fn wait_for_cycles(updater: &WorkspaceUpdater, handle: &TaskHandle, running: &AtomicBool) -> Result<()> {
    loop {
        if let Some(result) = handle.wait_timeout(Duration::from_millis(100)) {
            return result.context("Update driver failed");
        }
        if !running.load(Ordering::SeqCst) && updater.is_running() {
            updater.stop();
        }
    }
}

struct CheckSummary {
    checks: u64,
    inconsistent: u64,
}

/// UI thread traffic that checks workspace consistency from event handlers
struct UiCheck {
    dispatcher: Arc<EventDispatcher>,
    feeder: thread::JoinHandle<()>,
    checks: Arc<AtomicU64>,
    inconsistent: Arc<AtomicU64>,
}

impl UiCheck {
    fn start(
        updater: &WorkspaceUpdater,
        workload: Arc<Workload>,
        running: Arc<AtomicBool>,
        interval: Duration,
    ) -> Result<Self> {
        let dispatcher = Arc::new(EventDispatcher::new("tempo-ui")?);
        updater.install_event_queue(&dispatcher)?;

        let checks = Arc::new(AtomicU64::new(0));
        let inconsistent = Arc::new(AtomicU64::new(0));

        let feeder = {
            let dispatcher = dispatcher.clone();
            let checks = checks.clone();
            let inconsistent = inconsistent.clone();
            thread::Builder::new()
                .name("tempo-ui-feeder".to_string())
                .spawn(move || {
                    while running.load(Ordering::SeqCst) {
                        let workload = workload.clone();
                        let checks = checks.clone();
                        let inconsistent = inconsistent.clone();
                        let posted = dispatcher.invoke_later("check", move || {
                            checks.fetch_add(1, Ordering::Relaxed);
                            if !workload.is_consistent() {
                                inconsistent.fetch_add(1, Ordering::Relaxed);
                            }
                        });
                        if posted.is_err() {
                            break;
                        }
                        thread::sleep(interval);
                    }
                })
                .context("Failed to spawn UI feeder thread")?
        };

        info!("[RUNNER] UI consistency checks every {:?}", interval);
        Ok(Self {
            dispatcher,
            feeder,
            checks,
            inconsistent,
        })
    }

    fn finish(self, updater: &WorkspaceUpdater) -> Result<CheckSummary> {
        if self.feeder.join().is_err() {
            warn!("[RUNNER] UI feeder thread panicked");
        }
        // Buffered checks are posted to the dispatcher on uninstall
        updater.uninstall_event_queue(&self.dispatcher)?;
        self.dispatcher.invoke_and_wait("flush", || ())?;
        self.dispatcher.shutdown();

        Ok(CheckSummary {
            checks: self.checks.load(Ordering::Relaxed),
            inconsistent: self.inconsistent.load(Ordering::Relaxed),
        })
    }
}

fn print_summary(updater: &WorkspaceUpdater, workload: &Workload, elapsed: Duration, check: Option<CheckSummary>) {
    let cycles = updater.time();
    let rate = cycles as f64 / elapsed.as_secs_f64().max(f64::EPSILON);

    println!();
    println!("=== Tempo Run Summary ===");
    println!("Controller:      {}", updater.current_update_controller_name());
    println!("Worker threads:  {}", updater.num_threads());
    println!("Cycles:          {} in {:.2?} ({:.1} cycles/s)", cycles, elapsed, rate);
    println!("Component steps: {}", workload.total_steps());
    if let Some(report) = updater.last_report() {
        println!(
            "Last cycle:      {} components, {} parts, {} failures",
            report.components,
            report.parts,
            report.failures.len()
        );
    }
    if let Some(head) = workload.components.first() {
        println!("Head value:      {:.6}", head.value());
    }
    if let Some(check) = check {
        println!(
            "UI checks:       {} run, {} saw an inconsistent workspace",
            check.checks, check.inconsistent
        );
        if check.inconsistent > 0 {
            warn!("[RUNNER] {} UI checks ran during an update", check.inconsistent);
        }
    }
}
