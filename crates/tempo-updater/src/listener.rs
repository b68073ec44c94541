// Copyright 2025 Tempo Developers
// SPDX-License-Identifier: Apache-2.0

//! Listener interfaces and asynchronous notification
//!
//! Notifications are delivered in order on a single events thread, never on
//! an update worker or the cycle driver, so a slow listener cannot stall a
//! cycle. Listener lists are copy-on-write: registration during delivery is
//! safe and takes effect for the next notification.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{error, warn};

use crate::completion::PartFailure;
use crate::component::ComponentId;
use crate::error::{panic_message, UpdaterResult};
use crate::executor::SerialExecutor;

/// One update part, as seen by component listeners
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentUpdateEvent {
    pub component: ComponentId,
    pub component_name: String,
    pub part: usize,
    /// Cycle number the part belongs to
    pub time: u64,
    /// 1-based update worker number
    pub thread: usize,
}

pub trait ComponentUpdateListener: Send + Sync {
    fn starting_component_update(&self, event: &ComponentUpdateEvent) {
        let _ = event;
    }

    fn finished_component_update(&self, event: &ComponentUpdateEvent) {
        let _ = event;
    }

    fn component_update_failed(&self, failure: &PartFailure, time: u64) {
        let _ = (failure, time);
    }
}

pub trait WorkspaceUpdaterListener: Send + Sync {
    fn updating_started(&self) {}

    fn updating_finished(&self) {}

    fn updated_couplings(&self, time: u64) {
        let _ = time;
    }

    fn workspace_updated(&self, time: u64) {
        let _ = time;
    }

    fn changed_num_threads(&self, num_threads: usize) {
        let _ = num_threads;
    }

    fn changed_update_controller(&self, controller_name: &str) {
        let _ = controller_name;
    }
}

/// Copy-on-write listener list
pub struct ListenerList<T: ?Sized> {
    listeners: RwLock<Arc<Vec<Arc<T>>>>,
}

impl<T: ?Sized> Default for ListenerList<T> {
    fn default() -> Self {
        Self {
            listeners: RwLock::new(Arc::new(Vec::new())),
        }
    }
}

impl<T: ?Sized> ListenerList<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Arc<T>) {
        let mut listeners = self.listeners.write();
        let mut updated = Vec::with_capacity(listeners.len() + 1);
        updated.extend(listeners.iter().cloned());
        updated.push(listener);
        *listeners = Arc::new(updated);
    }

    /// Remove by identity; returns false if the listener was not registered
    pub fn remove(&self, listener: &Arc<T>) -> bool {
        let mut listeners = self.listeners.write();
        let target = Arc::as_ptr(listener) as *const ();
        let Some(index) = listeners
            .iter()
            .position(|l| Arc::as_ptr(l) as *const () == target)
        else {
            return false;
        };
        let mut updated: Vec<Arc<T>> = listeners.iter().cloned().collect();
        updated.remove(index);
        *listeners = Arc::new(updated);
        true
    }

    pub fn snapshot(&self) -> Arc<Vec<Arc<T>>> {
        self.listeners.read().clone()
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }
}

/// Delivers updater and component notifications on the events thread
pub struct Notifier {
    events: SerialExecutor,
    component_listeners: Arc<ListenerList<dyn ComponentUpdateListener>>,
    updater_listeners: Arc<ListenerList<dyn WorkspaceUpdaterListener>>,
}

impl Notifier {
    pub fn new(thread_name: &str) -> UpdaterResult<Self> {
        Ok(Self {
            events: SerialExecutor::new(thread_name)?,
            component_listeners: Arc::new(ListenerList::new()),
            updater_listeners: Arc::new(ListenerList::new()),
        })
    }

    pub fn component_listeners(&self) -> &ListenerList<dyn ComponentUpdateListener> {
        &self.component_listeners
    }

    pub fn updater_listeners(&self) -> &ListenerList<dyn WorkspaceUpdaterListener> {
        &self.updater_listeners
    }

    /// Wait until every notification queued so far has been delivered
    pub fn flush(&self) -> UpdaterResult<()> {
        self.events.flush()
    }

    pub fn shutdown(&self) {
        self.events.shutdown();
    }

    pub fn component_update_started(&self, event: ComponentUpdateEvent) {
        self.to_component_listeners(move |l| l.starting_component_update(&event));
    }

    pub fn component_update_finished(&self, event: ComponentUpdateEvent) {
        self.to_component_listeners(move |l| l.finished_component_update(&event));
    }

    pub fn component_update_failed(&self, failure: PartFailure, time: u64) {
        self.to_component_listeners(move |l| l.component_update_failed(&failure, time));
    }

    pub fn updating_started(&self) {
        self.to_updater_listeners(|l| l.updating_started());
    }

    pub fn updating_finished(&self) {
        self.to_updater_listeners(|l| l.updating_finished());
    }

    pub fn couplings_updated(&self, time: u64) {
        self.to_updater_listeners(move |l| l.updated_couplings(time));
    }

    pub fn workspace_updated(&self, time: u64) {
        self.to_updater_listeners(move |l| l.workspace_updated(time));
    }

    pub fn num_threads_changed(&self, num_threads: usize) {
        self.to_updater_listeners(move |l| l.changed_num_threads(num_threads));
    }

    pub fn update_controller_changed(&self, controller_name: String) {
        self.to_updater_listeners(move |l| l.changed_update_controller(&controller_name));
    }

    fn to_component_listeners<F>(&self, deliver: F)
    where
        F: Fn(&dyn ComponentUpdateListener) + Send + 'static,
    {
        let listeners = self.component_listeners.clone();
        let queued = self.events.execute(move || {
            for listener in listeners.snapshot().iter() {
                let delivered = catch_unwind(AssertUnwindSafe(|| deliver(listener.as_ref())));
                if let Err(payload) = delivered {
                    error!(
                        "[UPDATER] Component listener panicked: {}",
                        panic_message(&*payload)
                    );
                }
            }
        });
        if let Err(e) = queued {
            warn!("[UPDATER] Dropped component notification: {}", e);
        }
    }

    fn to_updater_listeners<F>(&self, deliver: F)
    where
        F: Fn(&dyn WorkspaceUpdaterListener) + Send + 'static,
    {
        let listeners = self.updater_listeners.clone();
        let queued = self.events.execute(move || {
            for listener in listeners.snapshot().iter() {
                let delivered = catch_unwind(AssertUnwindSafe(|| deliver(listener.as_ref())));
                if let Err(payload) = delivered {
                    error!(
                        "[UPDATER] Updater listener panicked: {}",
                        panic_message(&*payload)
                    );
                }
            }
        });
        if let Err(e) = queued {
            warn!("[UPDATER] Dropped updater notification: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::thread;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
        threads: Mutex<Vec<Option<String>>>,
    }

    impl WorkspaceUpdaterListener for Recorder {
        fn updating_started(&self) {
            self.calls.lock().push("started".to_string());
            self.threads
                .lock()
                .push(thread::current().name().map(str::to_string));
        }

        fn workspace_updated(&self, time: u64) {
            self.calls.lock().push(format!("updated {}", time));
        }

        fn changed_update_controller(&self, controller_name: &str) {
            self.calls.lock().push(format!("controller {}", controller_name));
        }
    }

    impl ComponentUpdateListener for Recorder {
        fn starting_component_update(&self, event: &ComponentUpdateEvent) {
            self.calls
                .lock()
                .push(format!("start {} part {}", event.component, event.part));
        }

        fn finished_component_update(&self, event: &ComponentUpdateEvent) {
            self.calls
                .lock()
                .push(format!("finish {} part {}", event.component, event.part));
        }
    }

    #[test]
    fn test_list_add_remove_by_identity() {
        let list: ListenerList<dyn WorkspaceUpdaterListener> = ListenerList::new();
        let a: Arc<dyn WorkspaceUpdaterListener> = Arc::new(Recorder::default());
        let b: Arc<dyn WorkspaceUpdaterListener> = Arc::new(Recorder::default());
        list.add(a.clone());
        list.add(b.clone());

        assert!(list.remove(&a));
        assert!(!list.remove(&a));
        assert_eq!(list.len(), 1);
        assert!(Arc::ptr_eq(&list.snapshot()[0], &b));
    }

    #[test]
    fn test_snapshot_unaffected_by_later_changes() {
        let list: ListenerList<dyn WorkspaceUpdaterListener> = ListenerList::new();
        list.add(Arc::new(Recorder::default()));
        let snapshot = list.snapshot();
        list.add(Arc::new(Recorder::default()));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_notifications_delivered_in_order_on_events_thread() {
        let notifier = Notifier::new("test-events").unwrap();
        let recorder = Arc::new(Recorder::default());
        notifier.updater_listeners().add(recorder.clone());

        notifier.updating_started();
        notifier.workspace_updated(1);
        notifier.update_controller_changed("Buffered".to_string());
        notifier.flush().unwrap();

        assert_eq!(
            *recorder.calls.lock(),
            vec!["started", "updated 1", "controller Buffered"]
        );
        assert_eq!(*recorder.threads.lock(), vec![Some("test-events".to_string())]);
    }

    #[test]
    fn test_component_events_reach_component_listeners() {
        let notifier = Notifier::new("test-component-events").unwrap();
        let recorder = Arc::new(Recorder::default());
        notifier.component_listeners().add(recorder.clone());

        notifier.component_update_started(ComponentUpdateEvent {
            component: ComponentId(9),
            component_name: "n".to_string(),
            part: 2,
            time: 1,
            thread: 1,
        });
        notifier.flush().unwrap();

        assert_eq!(*recorder.calls.lock(), vec!["start component-9 part 2"]);
    }

    #[test]
    fn test_panicking_listener_does_not_stop_delivery() {
        struct Exploding;
        impl WorkspaceUpdaterListener for Exploding {
            fn workspace_updated(&self, _time: u64) {
                panic!("listener failure");
            }
        }

        let notifier = Notifier::new("test-sturdy-events").unwrap();
        let recorder = Arc::new(Recorder::default());
        notifier.updater_listeners().add(Arc::new(Exploding));
        notifier.updater_listeners().add(recorder.clone());

        notifier.workspace_updated(1);
        notifier.workspace_updated(2);
        notifier.flush().unwrap();

        assert_eq!(*recorder.calls.lock(), vec!["updated 1", "updated 2"]);
    }

    #[test]
    fn test_listener_added_before_delivery_gets_start_and_finish() {
        let notifier = Notifier::new("test-late-listener").unwrap();
        let event = ComponentUpdateEvent {
            component: ComponentId(4),
            component_name: "late".to_string(),
            part: 0,
            time: 1,
            thread: 1,
        };

        // Hold the events thread so the start notification is still queued
        let (release_tx, release_rx) = crossbeam::channel::bounded::<()>(1);
        notifier
            .events
            .execute(move || {
                let _ = release_rx.recv();
            })
            .unwrap();

        notifier.component_update_started(event.clone());
        let recorder = Arc::new(Recorder::default());
        notifier.component_listeners().add(recorder.clone());
        notifier.component_update_finished(event);

        release_tx.send(()).unwrap();
        notifier.flush().unwrap();

        assert_eq!(
            *recorder.calls.lock(),
            vec!["start component-4 part 0", "finish component-4 part 0"]
        );
    }
}
