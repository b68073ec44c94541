// Copyright 2025 Tempo Developers
// SPDX-License-Identifier: Apache-2.0

//! Instrumented components shared by the integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tempo_updater::*;

/// Ordered record of what happened, with timestamps
#[derive(Default)]
pub struct Timeline {
    entries: Mutex<Vec<(String, Instant)>>,
}

impl Timeline {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record(&self, what: impl Into<String>) {
        self.entries.lock().push((what.into(), Instant::now()));
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn labels(&self) -> Vec<String> {
        self.entries.lock().iter().map(|(l, _)| l.clone()).collect()
    }

    pub fn first(&self, prefix: &str) -> Option<Instant> {
        self.entries
            .lock()
            .iter()
            .find(|(l, _)| l.starts_with(prefix))
            .map(|(_, at)| *at)
    }

    pub fn last(&self, prefix: &str) -> Option<Instant> {
        self.entries
            .lock()
            .iter()
            .rev()
            .find(|(l, _)| l.starts_with(prefix))
            .map(|(_, at)| *at)
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|(l, _)| l.starts_with(prefix))
            .count()
    }
}

/// Component that bumps a shared counter once per update part
pub struct CountingComponent {
    id: ComponentId,
    lock: ComponentLock,
    parts: usize,
    priority: i32,
    enabled: AtomicBool,
    delay: Duration,
    counter: Arc<AtomicUsize>,
    pub updates: AtomicUsize,
    timeline: Option<Arc<Timeline>>,
}

impl CountingComponent {
    pub fn new(counter: Arc<AtomicUsize>) -> Self {
        Self {
            id: ComponentId::next(),
            lock: ComponentLock::new(),
            parts: 1,
            priority: 0,
            enabled: AtomicBool::new(true),
            delay: Duration::ZERO,
            counter,
            updates: AtomicUsize::new(0),
            timeline: None,
        }
    }

    pub fn with_parts(mut self, parts: usize) -> Self {
        self.parts = parts;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_timeline(mut self, timeline: Arc<Timeline>) -> Self {
        self.timeline = Some(timeline);
        self
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }
}

impl WorkspaceComponent for CountingComponent {
    fn id(&self) -> ComponentId {
        self.id
    }

    fn name(&self) -> String {
        format!("counter-{}", self.id.0)
    }

    fn update(&self) -> Result<(), ComponentError> {
        self.update_part(0)
    }

    fn update_part_count(&self) -> usize {
        self.parts
    }

    fn update_part(&self, part: usize) -> Result<(), ComponentError> {
        if let Some(timeline) = &self.timeline {
            timeline.record(format!("update-start {} {}", self.id.0, part));
        }
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        self.counter.fetch_add(1, Ordering::SeqCst);
        self.updates.fetch_add(1, Ordering::SeqCst);
        if let Some(timeline) = &self.timeline {
            timeline.record(format!("update-end {} {}", self.id.0, part));
        }
        Ok(())
    }

    fn is_update_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn update_priority(&self) -> i32 {
        self.priority
    }

    fn lock(&self) -> &ComponentLock {
        &self.lock
    }
}

/// Component whose update always fails, by error or by panic
pub struct BrokenComponent {
    id: ComponentId,
    lock: ComponentLock,
    panics: bool,
}

impl BrokenComponent {
    pub fn erroring() -> Self {
        Self {
            id: ComponentId::next(),
            lock: ComponentLock::new(),
            panics: false,
        }
    }

    pub fn panicking() -> Self {
        Self {
            id: ComponentId::next(),
            lock: ComponentLock::new(),
            panics: true,
        }
    }
}

impl WorkspaceComponent for BrokenComponent {
    fn id(&self) -> ComponentId {
        self.id
    }

    fn update(&self) -> Result<(), ComponentError> {
        if self.panics {
            panic!("numerical blow-up");
        }
        Err(ComponentError::Failed("state diverged".to_string()))
    }

    fn lock(&self) -> &ComponentLock {
        &self.lock
    }
}

/// Coupling manager that records each propagation
pub struct RecordingCouplings {
    pub timeline: Arc<Timeline>,
}

impl CouplingManager for RecordingCouplings {
    fn update_all_couplings(&self) {
        self.timeline.record("couplings");
    }

    fn update_incoming_couplings(&self, component: &dyn WorkspaceComponent) {
        self.timeline.record(format!("incoming {}", component.id().0));
    }

    fn update_outgoing_couplings(&self, component: &dyn WorkspaceComponent) {
        self.timeline.record(format!("outgoing {}", component.id().0));
    }
}

/// Updater listener that counts callbacks
#[derive(Default)]
pub struct UpdaterEvents {
    pub started: AtomicUsize,
    pub finished: AtomicUsize,
    pub couplings: AtomicUsize,
    pub updated: Mutex<Vec<u64>>,
    pub num_threads: Mutex<Vec<usize>>,
    pub controllers: Mutex<Vec<String>>,
}

impl WorkspaceUpdaterListener for UpdaterEvents {
    fn updating_started(&self) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    fn updating_finished(&self) {
        self.finished.fetch_add(1, Ordering::SeqCst);
    }

    fn updated_couplings(&self, _time: u64) {
        self.couplings.fetch_add(1, Ordering::SeqCst);
    }

    fn workspace_updated(&self, time: u64) {
        self.updated.lock().push(time);
    }

    fn changed_num_threads(&self, num_threads: usize) {
        self.num_threads.lock().push(num_threads);
    }

    fn changed_update_controller(&self, controller_name: &str) {
        self.controllers.lock().push(controller_name.to_string());
    }
}

pub fn shared<C: WorkspaceComponent + 'static>(component: &Arc<C>) -> Arc<dyn WorkspaceComponent> {
    component.clone()
}

pub fn registry_of(components: Vec<Arc<dyn WorkspaceComponent>>) -> Arc<ComponentRegistry> {
    let registry = Arc::new(ComponentRegistry::new());
    for component in components {
        registry.add(component);
    }
    registry
}

pub fn settings(threads: usize) -> UpdaterSettings {
    UpdaterSettings::default()
        .with_threads(threads)
        .with_update_delay(Duration::ZERO)
}

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}
