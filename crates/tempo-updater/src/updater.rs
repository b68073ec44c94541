// Copyright 2025 Tempo Developers
// SPDX-License-Identifier: Apache-2.0

//! Workspace updater: drives update cycles over the registered components
//!
//! One driver thread runs cycles (continuous, single, or a fixed count).
//! Each cycle advances the time counter, sleeps for the configured delay,
//! lets the update controller update couplings and components on the worker
//! pool, drains UI events buffered by the task synchronization manager, and
//! notifies listeners.
//!
//! # Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use tempo_updater::{ComponentRegistry, NoCouplings, UpdaterSettings, WorkspaceUpdater};
//!
//! let registry = Arc::new(ComponentRegistry::new());
//! let updater = WorkspaceUpdater::new(registry, Arc::new(NoCouplings), UpdaterSettings::default())?;
//! updater.run_once()?.wait()?;
//! assert_eq!(updater.time(), 1);
//! # Ok::<(), tempo_updater::UpdaterError>(())
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tempo_config::UpdaterConfig;
use tracing::{debug, error, info, trace, warn};

use crate::completion::{CompletionSignal, LatchCompletionSignal, LatchWait, PartFailure};
use crate::component::{ComponentRegistry, CouplingManager, WorkspaceComponent};
use crate::controller::{
    controller_from_name, BufferedUpdateController, CycleReport, UpdateController, UpdateControllerKind,
    UpdateControls,
};
use crate::dispatcher::EventDispatcher;
use crate::error::{ComponentError, UpdaterError, UpdaterResult};
use crate::event_queue::{InterceptingEventQueue, NoActionSynchronizationManager, TaskSynchronizationManager};
use crate::executor::{SerialExecutor, TaskHandle};
use crate::listener::{ComponentUpdateListener, Notifier, WorkspaceUpdaterListener};
use crate::sync::ComponentSynchronizer;
use crate::thread_pool::{UpdateThreadPool, SHUTDOWN_GRACE};
use crate::update::ComponentUpdate;

/// Construction-time settings
#[derive(Debug, Clone)]
pub struct UpdaterSettings {
    /// Worker threads (at least one is started)
    pub threads: usize,
    pub update_delay: Duration,
    /// Bound on the wait for one cycle's updates; `None` waits forever
    pub cycle_timeout: Option<Duration>,
    /// Bound on the wait for drained UI events; `None` waits forever
    pub event_drain_timeout: Option<Duration>,
    pub thread_name_prefix: String,
}

impl Default for UpdaterSettings {
    fn default() -> Self {
        Self::from_config(&UpdaterConfig::default())
    }
}

impl UpdaterSettings {
    pub fn from_config(config: &UpdaterConfig) -> Self {
        Self {
            threads: config.resolved_threads(),
            update_delay: config.update_delay(),
            cycle_timeout: config.cycle_timeout(),
            event_drain_timeout: config.event_drain_timeout(),
            thread_name_prefix: config.thread_name_prefix.clone(),
        }
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_update_delay(mut self, delay: Duration) -> Self {
        self.update_delay = delay;
        self
    }

    pub fn with_cycle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.cycle_timeout = timeout;
        self
    }
}

/// The scheduler's [`UpdateControls`]
struct WorkspaceControls {
    registry: Arc<ComponentRegistry>,
    couplings: Arc<dyn CouplingManager>,
    pool: RwLock<Arc<UpdateThreadPool>>,
    notifier: Arc<Notifier>,
    time: AtomicU64,
    cycle_timeout: Option<Duration>,
    current_latch: Mutex<Option<Arc<LatchCompletionSignal>>>,
    shutting_down: AtomicBool,
}

impl WorkspaceControls {
    /// Interrupt the cycle in flight and every later one
    fn interrupt_cycle(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        if let Some(latch) = self.current_latch.lock().as_ref() {
            latch.latch().interrupt();
        }
    }

    fn pool(&self) -> Arc<UpdateThreadPool> {
        self.pool.read().clone()
    }
}

impl UpdateControls for WorkspaceControls {
    fn components(&self) -> Vec<Arc<dyn WorkspaceComponent>> {
        self.registry.snapshot()
    }

    fn update_couplings(&self) {
        self.couplings.update_all_couplings();
        self.notifier.couplings_updated(self.time());
    }

    fn update_incoming_couplings(&self, component: &dyn WorkspaceComponent) {
        self.couplings.update_incoming_couplings(component);
    }

    fn update_outgoing_couplings(&self, component: &dyn WorkspaceComponent) {
        self.couplings.update_outgoing_couplings(component);
    }

    fn scheduled_parts(&self, component: &dyn WorkspaceComponent) -> usize {
        if component.is_update_enabled() {
            component.update_part_count()
        } else {
            0
        }
    }

    fn update_component(
        &self,
        component: &Arc<dyn WorkspaceComponent>,
        signal: &Arc<dyn CompletionSignal>,
    ) -> UpdaterResult<()> {
        let parts = self.scheduled_parts(component.as_ref());
        let time = self.time();
        let pool = self.pool();

        for part in 0..parts {
            let update = ComponentUpdate::new(
                component.clone(),
                part,
                time,
                signal.clone(),
                self.notifier.clone(),
            );
            if let Err(e) = pool.submit(move |thread| update.run(thread)) {
                for skipped in part..parts {
                    signal.failed(PartFailure {
                        component: component.id(),
                        component_name: component.name(),
                        part: skipped,
                        error: ComponentError::Failed(e.to_string()),
                    });
                }
                return Err(e);
            }
        }
        Ok(())
    }

    fn await_completion(&self, signal: &Arc<LatchCompletionSignal>) -> UpdaterResult<()> {
        *self.current_latch.lock() = Some(signal.clone());
        // Covers a shutdown that ran before the latch was registered
        if self.shutting_down.load(Ordering::SeqCst) {
            signal.latch().interrupt();
        }
        let outcome = signal.latch().await_for(self.cycle_timeout);
        *self.current_latch.lock() = None;

        match outcome {
            LatchWait::Completed => Ok(()),
            LatchWait::TimedOut => Err(UpdaterError::CycleTimedOut {
                time: self.time(),
                pending: signal.latch().count(),
            }),
            LatchWait::Interrupted => Err(UpdaterError::CycleInterrupted { time: self.time() }),
        }
    }

    fn time(&self) -> u64 {
        self.time.load(Ordering::Acquire)
    }
}

/// State shared between the updater handle and its driver thread
struct UpdaterShared {
    controls: WorkspaceControls,
    notifier: Arc<Notifier>,
    synchronizer: Arc<ComponentSynchronizer>,
    controller: RwLock<Arc<dyn UpdateController>>,
    synch_manager: RwLock<Arc<dyn TaskSynchronizationManager>>,
    /// Cancellation flag of the active run or iteration
    active_run: Mutex<Option<Arc<AtomicBool>>>,
    update_delay_ms: AtomicU64,
    last_report: Mutex<Option<CycleReport>>,
}

impl UpdaterShared {
    fn synch_manager(&self) -> Arc<dyn TaskSynchronizationManager> {
        self.synch_manager.read().clone()
    }

    /// Continuous updates until `run` is cancelled
    fn run_loop(&self, run: &Arc<AtomicBool>) {
        info!("[UPDATER] Continuous updates started");
        self.notifier.updating_started();
        let synch = self.synch_manager();
        synch.queue_tasks();

        while run.load(Ordering::Acquire) {
            self.do_update(synch.as_ref());
        }

        synch.release_tasks();
        synch.run_tasks();
        self.finish_run(run);
        self.notifier.updating_finished();
        info!("[UPDATER] Continuous updates stopped at time {}", self.controls.time());
    }

    /// Run `cycles` cycles, stopping early once `run` is cancelled
    fn run_cycles(&self, cycles: u64, run: Option<&Arc<AtomicBool>>) {
        self.notifier.updating_started();
        let synch = self.synch_manager();

        for _ in 0..cycles {
            if run.is_some_and(|run| !run.load(Ordering::Acquire)) {
                debug!("[UPDATER] Iteration cancelled at time {}", self.controls.time());
                break;
            }
            synch.queue_tasks();
            self.do_update(synch.as_ref());
            synch.release_tasks();
            synch.run_tasks();
        }

        if let Some(run) = run {
            self.finish_run(run);
        }
        self.notifier.updating_finished();
    }

    /// Release the active run slot if `run` still holds it
    fn finish_run(&self, run: &Arc<AtomicBool>) {
        let mut active = self.active_run.lock();
        if active.as_ref().is_some_and(|active| Arc::ptr_eq(active, run)) {
            *active = None;
        }
    }

    fn do_update(&self, synch: &dyn TaskSynchronizationManager) {
        let time = self.controls.time.fetch_add(1, Ordering::AcqRel) + 1;
        trace!("[UPDATER] Starting cycle {}", time);

        let delay_ms = self.update_delay_ms.load(Ordering::Relaxed);
        if delay_ms > 0 {
            thread::sleep(Duration::from_millis(delay_ms));
        }

        let controller = self.controller.read().clone();
        match controller.do_update(&self.controls) {
            Ok(report) => {
                if report.is_degraded() {
                    warn!(
                        "[UPDATER] Cycle {} finished with {} failed update parts",
                        time,
                        report.failures.len()
                    );
                }
                *self.last_report.lock() = Some(report);
            }
            Err(UpdaterError::CycleInterrupted { .. }) => {
                debug!("[UPDATER] Cycle {} abandoned", time);
            }
            Err(e) => error!("[UPDATER] Cycle {} failed: {}", time, e),
        }

        synch.run_tasks();
        self.notifier.workspace_updated(time);
        trace!("[UPDATER] Finished cycle {}", time);
    }
}

/// Schedules and runs update cycles for a workspace
pub struct WorkspaceUpdater {
    // Dropped first so the driver finishes before the shared state goes away
    updates: SerialExecutor,
    shared: Arc<UpdaterShared>,
    thread_name_prefix: String,
    event_drain_timeout: Option<Duration>,
}

impl WorkspaceUpdater {
    /// Create an updater with the buffered controller
    pub fn new(
        registry: Arc<ComponentRegistry>,
        couplings: Arc<dyn CouplingManager>,
        settings: UpdaterSettings,
    ) -> UpdaterResult<Self> {
        Self::with_controller(registry, couplings, Arc::new(BufferedUpdateController), settings)
    }

    /// Create an updater from the `[updater]` configuration section
    pub fn from_config(
        registry: Arc<ComponentRegistry>,
        couplings: Arc<dyn CouplingManager>,
        config: &UpdaterConfig,
    ) -> UpdaterResult<Self> {
        let controller = controller_from_name(&config.controller)?;
        Self::with_controller(registry, couplings, controller, UpdaterSettings::from_config(config))
    }

    pub fn with_controller(
        registry: Arc<ComponentRegistry>,
        couplings: Arc<dyn CouplingManager>,
        controller: Arc<dyn UpdateController>,
        settings: UpdaterSettings,
    ) -> UpdaterResult<Self> {
        let prefix = settings.thread_name_prefix.clone();
        let pool = UpdateThreadPool::new(settings.threads, &prefix)?;
        let notifier = Arc::new(Notifier::new(&format!("{}-events", prefix))?);
        let updates = SerialExecutor::new(&format!("{}-driver", prefix))?;
        let synchronizer = Arc::new(ComponentSynchronizer::new(registry.clone()));

        info!(
            "[UPDATER] Created with {} worker threads, {} controller",
            pool.num_threads(),
            controller.name()
        );

        let shared = Arc::new(UpdaterShared {
            controls: WorkspaceControls {
                registry,
                couplings,
                pool: RwLock::new(Arc::new(pool)),
                notifier: notifier.clone(),
                time: AtomicU64::new(0),
                cycle_timeout: settings.cycle_timeout,
                current_latch: Mutex::new(None),
                shutting_down: AtomicBool::new(false),
            },
            notifier,
            synchronizer,
            controller: RwLock::new(controller),
            synch_manager: RwLock::new(Arc::new(NoActionSynchronizationManager)),
            active_run: Mutex::new(None),
            update_delay_ms: AtomicU64::new(settings.update_delay.as_millis() as u64),
            last_report: Mutex::new(None),
        });

        Ok(Self {
            updates,
            shared,
            thread_name_prefix: prefix,
            event_drain_timeout: settings.event_drain_timeout,
        })
    }

    /// Start continuous updates on the driver thread
    ///
    /// # Errors
    ///
    /// [`UpdaterError::AlreadyRunning`] if continuous updates or an
    /// iteration are in progress.
    pub fn run(&self) -> UpdaterResult<TaskHandle> {
        let run = self.claim_run()?;
        let shared = self.shared.clone();
        let token = run.clone();
        self.updates
            .submit(move || shared.run_loop(&token))
            .map_err(|e| {
                self.shared.finish_run(&run);
                e
            })
    }

    /// Run exactly one cycle
    pub fn run_once(&self) -> UpdaterResult<TaskHandle> {
        let shared = self.shared.clone();
        self.updates.submit(move || shared.run_cycles(1, None))
    }

    /// Run `cycles` cycles; [`stop`](Self::stop) ends the iteration early
    pub fn iterate(&self, cycles: u64) -> UpdaterResult<TaskHandle> {
        let run = self.claim_run()?;
        let shared = self.shared.clone();
        let token = run.clone();
        self.updates
            .submit(move || shared.run_cycles(cycles, Some(&token)))
            .map_err(|e| {
                self.shared.finish_run(&run);
                e
            })
    }

    /// Each run or iteration gets its own cancellation flag, so a stopped
    /// run never picks up the flag of the one started after it
    fn claim_run(&self) -> UpdaterResult<Arc<AtomicBool>> {
        let mut active = self.shared.active_run.lock();
        if active.is_some() {
            return Err(UpdaterError::AlreadyRunning);
        }
        let run = Arc::new(AtomicBool::new(true));
        *active = Some(run.clone());
        Ok(run)
    }

    /// Cancel the active run or iteration
    ///
    /// The cycle in flight completes first; no later cycle of that run
    /// starts. A new run may be started right away and queues behind it.
    pub fn stop(&self) {
        if let Some(run) = self.shared.active_run.lock().take() {
            run.store(false, Ordering::Release);
            info!("[UPDATER] Stop requested");
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.active_run.lock().is_some()
    }

    /// Number of cycles started since creation or the last reset
    pub fn time(&self) -> u64 {
        self.shared.controls.time()
    }

    pub fn reset_time(&self) {
        self.shared.controls.time.store(0, Ordering::Release);
        debug!("[UPDATER] Time reset");
    }

    pub fn last_report(&self) -> Option<CycleReport> {
        self.shared.last_report.lock().clone()
    }

    pub fn num_threads(&self) -> usize {
        self.shared.controls.pool().num_threads()
    }

    /// Replace the worker pool
    ///
    /// Stops continuous updates first; the old pool finishes its queued
    /// parts before its threads exit.
    pub fn set_num_threads(&self, threads: usize) -> UpdaterResult<()> {
        if self.is_running() {
            self.stop();
        }
        let pool = UpdateThreadPool::new(threads, &self.thread_name_prefix)?;
        let num_threads = pool.num_threads();
        let old = std::mem::replace(&mut *self.shared.controls.pool.write(), Arc::new(pool));
        drop(old);

        info!("[UPDATER] Worker threads set to {}", num_threads);
        self.shared.notifier.num_threads_changed(num_threads);
        Ok(())
    }

    pub fn update_delay(&self) -> Duration {
        Duration::from_millis(self.shared.update_delay_ms.load(Ordering::Relaxed))
    }

    pub fn set_update_delay(&self, delay: Duration) {
        self.shared
            .update_delay_ms
            .store(delay.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn update_controller(&self) -> Arc<dyn UpdateController> {
        self.shared.controller.read().clone()
    }

    /// Takes effect from the next cycle
    pub fn set_update_controller(&self, controller: Arc<dyn UpdateController>) {
        let name = controller.name().to_string();
        *self.shared.controller.write() = controller;
        info!("[UPDATER] Update controller set to {}", name);
        self.shared.notifier.update_controller_changed(name);
    }

    pub fn current_update_controller_name(&self) -> String {
        self.shared.controller.read().name().to_string()
    }

    pub fn update_controller_kind(&self) -> UpdateControllerKind {
        self.shared.controller.read().kind()
    }

    /// Install a task synchronization manager; `None` restores the no-op one
    ///
    /// Continuous updates pick up the change when next started.
    pub fn set_task_synchronization_manager(&self, manager: Option<Arc<dyn TaskSynchronizationManager>>) {
        let manager = manager.unwrap_or_else(|| Arc::new(NoActionSynchronizationManager));
        *self.shared.synch_manager.write() = manager;
    }

    pub fn add_component_listener(&self, listener: Arc<dyn ComponentUpdateListener>) {
        self.shared.notifier.component_listeners().add(listener);
    }

    pub fn remove_component_listener(&self, listener: &Arc<dyn ComponentUpdateListener>) -> bool {
        self.shared.notifier.component_listeners().remove(listener)
    }

    pub fn add_updater_listener(&self, listener: Arc<dyn WorkspaceUpdaterListener>) {
        self.shared.notifier.updater_listeners().add(listener);
    }

    pub fn remove_updater_listener(&self, listener: &Arc<dyn WorkspaceUpdaterListener>) -> bool {
        self.shared.notifier.updater_listeners().remove(listener)
    }

    /// Wait until queued listener notifications have been delivered
    pub fn flush_notifications(&self) -> UpdaterResult<()> {
        self.shared.notifier.flush()
    }

    /// Run `task` with exclusive access to every component
    pub fn sync_on_all_components<R>(&self, task: impl FnOnce() -> R) -> R {
        self.shared.synchronizer.sync_on_all_components(task)
    }

    pub fn synchronizer(&self) -> Arc<ComponentSynchronizer> {
        self.shared.synchronizer.clone()
    }

    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.shared.controls.registry
    }

    /// Event queue bound to this updater's components
    pub fn create_event_queue(&self) -> Arc<InterceptingEventQueue> {
        Arc::new(
            InterceptingEventQueue::new(self.synchronizer()).with_drain_timeout(self.event_drain_timeout),
        )
    }

    /// Intercept `dispatcher`'s invocation events around update cycles
    pub fn install_event_queue(&self, dispatcher: &EventDispatcher) -> UpdaterResult<Arc<InterceptingEventQueue>> {
        let queue = self.create_event_queue();
        dispatcher.install(queue.clone())?;
        self.set_task_synchronization_manager(Some(queue.clone()));
        Ok(queue)
    }

    pub fn uninstall_event_queue(&self, dispatcher: &EventDispatcher) -> UpdaterResult<()> {
        dispatcher.uninstall()?;
        self.set_task_synchronization_manager(None);
        Ok(())
    }

    /// Stop updates and abandon the cycle in flight
    ///
    /// Final: cycles started afterwards are abandoned as well.
    pub fn shutdown(&self) {
        self.stop();
        self.shared.controls.interrupt_cycle();
    }
}

impl Drop for WorkspaceUpdater {
    fn drop(&mut self) {
        self.shutdown();
        self.updates.shutdown();
        let detached = self.shared.controls.pool().shutdown_within(SHUTDOWN_GRACE);
        if detached > 0 {
            warn!(
                "[UPDATER] {} update workers were still busy at shutdown and have been detached",
                detached
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{ComponentId, ComponentLock};
    use std::sync::atomic::AtomicUsize;

    struct Counter {
        id: ComponentId,
        lock: ComponentLock,
        updates: AtomicUsize,
    }

    impl Counter {
        fn new(id: u64) -> Arc<Self> {
            Arc::new(Self {
                id: ComponentId(id),
                lock: ComponentLock::new(),
                updates: AtomicUsize::new(0),
            })
        }
    }

    impl WorkspaceComponent for Counter {
        fn id(&self) -> ComponentId {
            self.id
        }

        fn update(&self) -> Result<(), ComponentError> {
            self.updates.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn lock(&self) -> &ComponentLock {
            &self.lock
        }
    }

    fn settings(threads: usize) -> UpdaterSettings {
        UpdaterSettings::default().with_threads(threads)
    }

    #[test]
    fn test_run_once_advances_time() {
        let registry = Arc::new(ComponentRegistry::new());
        let counter = Counter::new(1);
        registry.add(counter.clone());
        let updater = WorkspaceUpdater::new(registry, Arc::new(crate::NoCouplings), settings(2)).unwrap();

        updater.run_once().unwrap().wait().unwrap();

        assert_eq!(updater.time(), 1);
        assert_eq!(counter.updates.load(Ordering::SeqCst), 1);
        assert!(!updater.is_running());
        assert_eq!(updater.last_report().unwrap().parts, 1);
    }

    #[test]
    fn test_empty_workspace_still_ticks() {
        let updater = WorkspaceUpdater::new(
            Arc::new(ComponentRegistry::new()),
            Arc::new(crate::NoCouplings),
            settings(1),
        )
        .unwrap();
        updater.iterate(3).unwrap().wait().unwrap();
        assert_eq!(updater.time(), 3);
        updater.reset_time();
        assert_eq!(updater.time(), 0);
    }

    #[test]
    fn test_second_run_is_rejected() {
        let updater = WorkspaceUpdater::new(
            Arc::new(ComponentRegistry::new()),
            Arc::new(crate::NoCouplings),
            settings(1).with_update_delay(Duration::from_millis(5)),
        )
        .unwrap();

        let handle = updater.run().unwrap();
        assert!(matches!(updater.run(), Err(UpdaterError::AlreadyRunning)));
        assert!(matches!(updater.iterate(2), Err(UpdaterError::AlreadyRunning)));

        updater.stop();
        handle.wait().unwrap();
        assert!(!updater.is_running());
    }

    #[test]
    fn test_settings_from_config() {
        let config = UpdaterConfig {
            threads: 3,
            update_delay_ms: 10,
            cycle_timeout_ms: 500,
            ..UpdaterConfig::default()
        };
        let settings = UpdaterSettings::from_config(&config);
        assert_eq!(settings.threads, 3);
        assert_eq!(settings.update_delay, Duration::from_millis(10));
        assert_eq!(settings.cycle_timeout, Some(Duration::from_millis(500)));
        assert_eq!(settings.event_drain_timeout, None);
    }

    #[test]
    fn test_from_config_rejects_unknown_controller() {
        let config = UpdaterConfig {
            controller: "fastest".to_string(),
            ..UpdaterConfig::default()
        };
        let result = WorkspaceUpdater::from_config(
            Arc::new(ComponentRegistry::new()),
            Arc::new(crate::NoCouplings),
            &config,
        );
        assert!(matches!(result, Err(UpdaterError::Config(_))));
    }

    #[test]
    fn test_set_num_threads_and_delay() {
        let updater = WorkspaceUpdater::new(
            Arc::new(ComponentRegistry::new()),
            Arc::new(crate::NoCouplings),
            settings(2),
        )
        .unwrap();
        assert_eq!(updater.num_threads(), 2);

        updater.set_num_threads(4).unwrap();
        assert_eq!(updater.num_threads(), 4);

        updater.set_update_delay(Duration::from_millis(7));
        assert_eq!(updater.update_delay(), Duration::from_millis(7));
    }
}
