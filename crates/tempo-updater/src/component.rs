// Copyright 2025 Tempo Developers
// SPDX-License-Identifier: Apache-2.0

//! Workspace components, their locks, and the registry the scheduler reads

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::ComponentError;

/// Stable identity used to order lock acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComponentId(pub u64);

static NEXT_COMPONENT_ID: AtomicU64 = AtomicU64::new(1);

impl ComponentId {
    /// Allocate a process-unique id
    pub fn next() -> Self {
        ComponentId(NEXT_COMPONENT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "component-{}", self.0)
    }
}

/// Per-component lock
///
/// Update workers hold it shared while a part runs; whole-workspace
/// synchronization holds it exclusively.
#[derive(Debug, Default)]
pub struct ComponentLock {
    inner: RwLock<()>,
}

impl ComponentLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire_shared(&self) -> RwLockReadGuard<'_, ()> {
        self.inner.read()
    }

    pub fn acquire_exclusive(&self) -> RwLockWriteGuard<'_, ()> {
        self.inner.write()
    }

    pub fn try_acquire_exclusive_for(&self, timeout: Duration) -> Option<RwLockWriteGuard<'_, ()>> {
        self.inner.try_write_for(timeout)
    }

    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}

/// A unit of simulated state advanced once per update cycle
///
/// Components that split their work override [`update_part_count`] and
/// [`update_part`]; parts of one component may run concurrently on
/// different workers.
///
/// [`update_part_count`]: WorkspaceComponent::update_part_count
/// [`update_part`]: WorkspaceComponent::update_part
pub trait WorkspaceComponent: Send + Sync {
    fn id(&self) -> ComponentId;

    fn name(&self) -> String {
        self.id().to_string()
    }

    /// Advance the whole component by one step
    fn update(&self) -> Result<(), ComponentError>;

    fn update_part_count(&self) -> usize {
        1
    }

    fn update_part(&self, part: usize) -> Result<(), ComponentError> {
        let _ = part;
        self.update()
    }

    /// Disabled components are skipped without blocking the cycle
    fn is_update_enabled(&self) -> bool {
        true
    }

    /// Lower values update first under the priority controller
    fn update_priority(&self) -> i32 {
        0
    }

    fn lock(&self) -> &ComponentLock;
}

/// Thread-safe, ordered set of components
///
/// Readers take a snapshot, so membership changes never disturb a cycle
/// already in flight.
#[derive(Default)]
pub struct ComponentRegistry {
    components: RwLock<Vec<Arc<dyn WorkspaceComponent>>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a component; returns false if its id is already present
    pub fn add(&self, component: Arc<dyn WorkspaceComponent>) -> bool {
        let mut components = self.components.write();
        let id = component.id();
        if components.iter().any(|c| c.id() == id) {
            tracing::warn!("[UPDATER] Component {} already registered", id);
            return false;
        }
        tracing::debug!("[UPDATER] Registered component {} ({})", id, component.name());
        components.push(component);
        true
    }

    pub fn remove(&self, id: ComponentId) -> Option<Arc<dyn WorkspaceComponent>> {
        let mut components = self.components.write();
        let index = components.iter().position(|c| c.id() == id)?;
        tracing::debug!("[UPDATER] Removed component {}", id);
        Some(components.remove(index))
    }

    pub fn get(&self, id: ComponentId) -> Option<Arc<dyn WorkspaceComponent>> {
        self.components.read().iter().find(|c| c.id() == id).cloned()
    }

    /// Components in insertion order
    pub fn snapshot(&self) -> Vec<Arc<dyn WorkspaceComponent>> {
        self.components.read().clone()
    }

    pub fn len(&self) -> usize {
        self.components.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.read().is_empty()
    }
}

/// Propagates values between components before they update
///
/// The per-component methods let controllers that update components one at
/// a time move only the values a component reads or produces. They default
/// to doing nothing.
pub trait CouplingManager: Send + Sync {
    fn update_all_couplings(&self);

    /// Propagate the couplings that feed `component`
    fn update_incoming_couplings(&self, _component: &dyn WorkspaceComponent) {}

    /// Propagate the couplings that read from `component`
    fn update_outgoing_couplings(&self, _component: &dyn WorkspaceComponent) {}
}

/// Coupling manager for workspaces without couplings
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCouplings;

impl CouplingManager for NoCouplings {
    fn update_all_couplings(&self) {}
}

impl<F> CouplingManager for F
where
    F: Fn() + Send + Sync,
{
    fn update_all_couplings(&self) {
        self()
    }
}
