// Copyright 2025 Tempo Developers
// SPDX-License-Identifier: Apache-2.0

//! Whole-workspace synchronization
//!
//! Runs a task while holding every component's lock exclusively, so no
//! update part can interleave with it. Locks are taken in ascending id
//! order and released in reverse. Nested calls on the same thread run the
//! task directly.

use std::cell::Cell;
use std::sync::Arc;

use parking_lot::ReentrantMutex;

use crate::component::ComponentRegistry;

pub struct ComponentSynchronizer {
    registry: Arc<ComponentRegistry>,
    // Serializes synchronizers; the flag marks a held sync on the owning thread
    gate: ReentrantMutex<Cell<bool>>,
}

struct ClearOnDrop<'a>(&'a Cell<bool>);

impl Drop for ClearOnDrop<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl ComponentSynchronizer {
    pub fn new(registry: Arc<ComponentRegistry>) -> Self {
        Self {
            registry,
            gate: ReentrantMutex::new(Cell::new(false)),
        }
    }

    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.registry
    }

    /// Run `task` with exclusive access to all registered components
    ///
    /// Components registered while the task runs are not locked.
    pub fn sync_on_all_components<R>(&self, task: impl FnOnce() -> R) -> R {
        let gate = self.gate.lock();
        if gate.get() {
            return task();
        }

        let mut components = self.registry.snapshot();
        components.sort_by_key(|c| c.id());

        gate.set(true);
        let _clear = ClearOnDrop(&gate);

        let mut guards = Vec::with_capacity(components.len());
        for component in &components {
            guards.push(component.lock().acquire_exclusive());
        }
        tracing::trace!("[UPDATER] Holding {} component locks", guards.len());

        let result = task();

        while let Some(guard) = guards.pop() {
            drop(guard);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{ComponentId, ComponentLock, WorkspaceComponent};
    use crate::error::ComponentError;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    struct Plain {
        id: ComponentId,
        lock: ComponentLock,
    }

    impl WorkspaceComponent for Plain {
        fn id(&self) -> ComponentId {
            self.id
        }

        fn update(&self) -> Result<(), ComponentError> {
            Ok(())
        }

        fn lock(&self) -> &ComponentLock {
            &self.lock
        }
    }

    fn registry(ids: &[u64]) -> Arc<ComponentRegistry> {
        let registry = Arc::new(ComponentRegistry::new());
        for id in ids {
            registry.add(Arc::new(Plain {
                id: ComponentId(*id),
                lock: ComponentLock::new(),
            }));
        }
        registry
    }

    #[test]
    fn test_all_locks_held_during_task() {
        let registry = registry(&[3, 1, 2]);
        let synchronizer = ComponentSynchronizer::new(registry.clone());

        let held = synchronizer.sync_on_all_components(|| {
            registry.snapshot().iter().all(|c| c.lock().is_locked())
        });

        assert!(held);
        assert!(registry.snapshot().iter().all(|c| !c.lock().is_locked()));
    }

    #[test]
    fn test_nested_sync_runs_inline() {
        let synchronizer = ComponentSynchronizer::new(registry(&[1, 2]));
        let value = synchronizer.sync_on_all_components(|| synchronizer.sync_on_all_components(|| 42));
        assert_eq!(value, 42);
    }

    #[test]
    fn test_empty_registry_runs_task() {
        let synchronizer = ComponentSynchronizer::new(registry(&[]));
        assert_eq!(synchronizer.sync_on_all_components(|| "ran"), "ran");
    }

    #[test]
    fn test_sync_waits_for_shared_holder() {
        let registry = registry(&[1]);
        let synchronizer = Arc::new(ComponentSynchronizer::new(registry.clone()));
        let component = registry.get(ComponentId(1)).unwrap();
        let released = Arc::new(AtomicBool::new(false));

        let shared = component.lock().acquire_shared();
        let waiter = {
            let synchronizer = synchronizer.clone();
            let released = released.clone();
            thread::spawn(move || synchronizer.sync_on_all_components(|| released.load(Ordering::SeqCst)))
        };

        thread::sleep(Duration::from_millis(30));
        released.store(true, Ordering::SeqCst);
        drop(shared);

        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_flag_cleared_after_panic() {
        let synchronizer = ComponentSynchronizer::new(registry(&[1]));
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            synchronizer.sync_on_all_components(|| panic!("task failed"))
        }));
        assert!(outcome.is_err());

        let locked = synchronizer.sync_on_all_components(|| {
            synchronizer
                .registry()
                .snapshot()
                .iter()
                .all(|c| c.lock().is_locked())
        });
        assert!(locked);
    }
}
