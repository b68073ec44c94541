// Copyright 2025 Tempo Developers
// SPDX-License-Identifier: Apache-2.0

//! Synthetic workload for exercising the scheduler
//!
//! A chain of components, each relaying its value to the next through a
//! coupling. Every update part burns a fixed amount of CPU time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::updater::{
    all_equal, ComponentError, ComponentId, ComponentLock, ComponentRegistry, CouplingManager, WorkspaceComponent,
};

/// Leaky integrator that spins for `work` per update part
pub struct SpinComponent {
    id: ComponentId,
    name: String,
    lock: ComponentLock,
    parts: usize,
    work: Duration,
    part_updates: AtomicU64,
    input: Mutex<f64>,
    value: Mutex<f64>,
}

impl SpinComponent {
    pub fn new(name: impl Into<String>, parts: usize, work: Duration) -> Self {
        Self {
            id: ComponentId::next(),
            name: name.into(),
            lock: ComponentLock::new(),
            parts: parts.max(1),
            work,
            part_updates: AtomicU64::new(0),
            input: Mutex::new(0.0),
            value: Mutex::new(0.0),
        }
    }

    /// Completed updates of the whole component
    pub fn steps(&self) -> u64 {
        self.part_updates.load(Ordering::Acquire) / self.parts as u64
    }

    pub fn value(&self) -> f64 {
        *self.value.lock()
    }

    pub fn set_input(&self, input: f64) {
        *self.input.lock() = input;
    }
}

impl WorkspaceComponent for SpinComponent {
    fn id(&self) -> ComponentId {
        self.id
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn update(&self) -> Result<(), ComponentError> {
        for part in 0..self.parts {
            self.update_part(part)?;
        }
        Ok(())
    }

    fn update_part_count(&self) -> usize {
        self.parts
    }

    fn update_part(&self, part: usize) -> Result<(), ComponentError> {
        let deadline = Instant::now() + self.work;
        while Instant::now() < deadline {
            std::hint::spin_loop();
        }

        // Part 0 owns the state change; the others only burn time
        if part == 0 {
            let input = *self.input.lock();
            let mut value = self.value.lock();
            *value = *value * 0.5 + input;
            if !value.is_finite() {
                return Err(ComponentError::Failed(format!("{} diverged", self.name)));
            }
        }
        self.part_updates.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn lock(&self) -> &ComponentLock {
        &self.lock
    }
}

/// Copies each component's value into the next one's input; the head is
/// driven by a constant
pub struct ChainCouplings {
    chain: Vec<Arc<SpinComponent>>,
    drive: f64,
}

impl ChainCouplings {
    pub fn new(chain: Vec<Arc<SpinComponent>>, drive: f64) -> Self {
        Self { chain, drive }
    }

    fn position(&self, component: &dyn WorkspaceComponent) -> Option<usize> {
        let id = component.id();
        self.chain.iter().position(|c| c.id == id)
    }
}

impl CouplingManager for ChainCouplings {
    fn update_all_couplings(&self) {
        let Some(head) = self.chain.first() else {
            return;
        };
        // Upstream values are read before any downstream input changes
        let values: Vec<f64> = self.chain.iter().map(|c| c.value()).collect();
        head.set_input(self.drive);
        for (component, upstream) in self.chain.iter().skip(1).zip(values) {
            component.set_input(upstream);
        }
    }

    fn update_incoming_couplings(&self, component: &dyn WorkspaceComponent) {
        match self.position(component) {
            Some(0) => self.chain[0].set_input(self.drive),
            Some(i) => self.chain[i].set_input(self.chain[i - 1].value()),
            None => {}
        }
    }

    fn update_outgoing_couplings(&self, component: &dyn WorkspaceComponent) {
        if let Some(i) = self.position(component) {
            if let Some(next) = self.chain.get(i + 1) {
                next.set_input(self.chain[i].value());
            }
        }
    }
}

/// Components, couplings, and registry of a synthetic run
pub struct Workload {
    pub components: Vec<Arc<SpinComponent>>,
    pub couplings: Arc<ChainCouplings>,
    pub registry: Arc<ComponentRegistry>,
}

impl Workload {
    /// True when every component has completed the same number of steps
    pub fn is_consistent(&self) -> bool {
        all_equal(&self.components, |c| c.steps())
    }

    pub fn total_steps(&self) -> u64 {
        self.components.iter().map(|c| c.steps()).sum()
    }
}

pub fn build_workload(count: usize, parts: usize, work: Duration) -> Workload {
    let components: Vec<Arc<SpinComponent>> = (0..count)
        .map(|i| Arc::new(SpinComponent::new(format!("spin-{}", i), parts, work)))
        .collect();

    let registry = Arc::new(ComponentRegistry::new());
    for component in &components {
        registry.add(component.clone());
    }

    Workload {
        couplings: Arc::new(ChainCouplings::new(components.clone(), 1.0)),
        components,
        registry,
    }
}
