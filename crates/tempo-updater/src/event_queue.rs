// Copyright 2025 Tempo Developers
// SPDX-License-Identifier: Apache-2.0

//! Coordination between update cycles and UI events
//!
//! While the workspace updates, invocation events posted to the dispatcher
//! are buffered instead of run. Between cycles the buffer is drained: each
//! event runs on the dispatch thread with exclusive access to every
//! component, and the cycle driver waits until all of them finish. UI code
//! therefore never observes a half-updated workspace.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use crate::completion::{CompletionSignal, LatchCompletionSignal, LatchWait, NoopCompletionSignal};
use crate::dispatcher::{DispatcherCore, DispatcherLink, InvocationEvent, ToolkitEvent};
use crate::error::{panic_message, UpdaterError, UpdaterResult};
use crate::sync::ComponentSynchronizer;

/// Hooks the cycle driver calls around each update cycle
pub trait TaskSynchronizationManager: Send + Sync {
    /// Start buffering tasks
    fn queue_tasks(&self);

    /// Stop buffering; new tasks flow directly
    fn release_tasks(&self);

    /// Run every buffered task and wait for them
    fn run_tasks(&self);
}

/// Synchronization manager that does nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoActionSynchronizationManager;

impl TaskSynchronizationManager for NoActionSynchronizationManager {
    fn queue_tasks(&self) {}

    fn release_tasks(&self) {}

    fn run_tasks(&self) {}
}

/// Invocation event that runs under whole-workspace synchronization
///
/// Signals its completion signal after the wrapped event ran, even if it
/// panicked.
pub struct SynchronizingInvocationEvent {
    event: InvocationEvent,
    synchronizer: Arc<ComponentSynchronizer>,
    signal: Arc<dyn CompletionSignal>,
}

impl SynchronizingInvocationEvent {
    pub fn new(event: InvocationEvent, synchronizer: Arc<ComponentSynchronizer>) -> Self {
        Self {
            event,
            synchronizer,
            signal: Arc::new(NoopCompletionSignal),
        }
    }

    pub fn with_signal(mut self, signal: Arc<dyn CompletionSignal>) -> Self {
        self.signal = signal;
        self
    }

    pub fn source(&self) -> &str {
        self.event.source()
    }

    pub fn dispatch(self) {
        let Self {
            event,
            synchronizer,
            signal,
        } = self;
        let source = event.source().to_string();
        let ran = catch_unwind(AssertUnwindSafe(|| {
            synchronizer.sync_on_all_components(|| event.dispatch())
        }));
        if let Err(payload) = ran {
            error!(
                "[EVENT-QUEUE] Event from {} panicked: {}",
                source,
                panic_message(&*payload)
            );
        }
        signal.done();
    }

    /// Plain invocation event for the dispatch thread
    pub fn into_invocation(self) -> InvocationEvent {
        let source = self.event.source().to_string();
        let when = self.event.when();
        InvocationEvent::posted_at(source, when, Box::new(move || self.dispatch()))
    }
}

#[derive(Default)]
struct QueueState {
    paused: bool,
    buffered: VecDeque<SynchronizingInvocationEvent>,
}

/// Event queue that intercepts invocation events for the updater
///
/// Install it on an [`EventDispatcher`](crate::EventDispatcher) and hand it
/// to the updater as its task synchronization manager.
pub struct InterceptingEventQueue {
    synchronizer: Arc<ComponentSynchronizer>,
    state: Mutex<QueueState>,
    dispatcher: Mutex<Option<DispatcherLink>>,
    drain_timeout: Option<Duration>,
}

impl InterceptingEventQueue {
    pub fn new(synchronizer: Arc<ComponentSynchronizer>) -> Self {
        Self {
            synchronizer,
            state: Mutex::new(QueueState::default()),
            dispatcher: Mutex::new(None),
            drain_timeout: None,
        }
    }

    /// Bound the wait for drained events; `None` waits forever
    pub fn with_drain_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    /// Number of buffered invocation events
    pub fn pending_events(&self) -> usize {
        self.state.lock().buffered.len()
    }

    pub(crate) fn attach(&self, link: DispatcherLink) -> UpdaterResult<()> {
        let mut dispatcher = self.dispatcher.lock();
        if dispatcher.as_ref().is_some_and(|d| d.strong_count() > 0) {
            return Err(UpdaterError::InterceptorAlreadyInstalled);
        }
        *dispatcher = Some(link);
        Ok(())
    }

    /// Stop intercepting and hand buffered events to the dispatcher
    pub(crate) fn detach(&self) {
        let drained: Vec<_> = {
            let mut state = self.state.lock();
            state.paused = false;
            state.buffered.drain(..).collect()
        };
        let core = self.dispatcher.lock().take().and_then(|d| d.upgrade());
        if drained.is_empty() {
            return;
        }
        debug!("[EVENT-QUEUE] Releasing {} buffered events on removal", drained.len());
        for event in drained {
            Self::post_or_run(core.as_deref(), event);
        }
    }

    fn core(&self) -> Option<Arc<DispatcherCore>> {
        self.dispatcher.lock().as_ref().and_then(|d| d.upgrade())
    }

    /// Accept an event posted to the dispatcher
    ///
    /// Invocation events are wrapped so they run under whole-workspace
    /// synchronization, and buffered while paused. Other events pass
    /// straight through.
    pub fn intercept(&self, event: ToolkitEvent) -> UpdaterResult<()> {
        let core = self.core().ok_or(UpdaterError::DispatcherShutDown)?;
        let event = match event {
            ToolkitEvent::Invocation(invocation) => {
                let wrapped = SynchronizingInvocationEvent::new(invocation, self.synchronizer.clone());
                let mut state = self.state.lock();
                if state.paused {
                    trace!("[EVENT-QUEUE] Buffering event from {}", wrapped.source());
                    state.buffered.push_back(wrapped);
                    return Ok(());
                }
                drop(state);
                ToolkitEvent::Invocation(wrapped.into_invocation())
            }
            other => other,
        };
        core.post(event).map_err(|_| UpdaterError::DispatcherShutDown)
    }

    fn post_or_run(core: Option<&DispatcherCore>, event: SynchronizingInvocationEvent) {
        let Some(core) = core else {
            warn!("[EVENT-QUEUE] Dispatcher gone; running event from {} inline", event.source());
            event.dispatch();
            return;
        };
        if let Err(rejected) = core.post(ToolkitEvent::Invocation(event.into_invocation())) {
            warn!("[EVENT-QUEUE] Dispatcher closed; running event inline");
            rejected.dispatch();
        }
    }
}

impl TaskSynchronizationManager for InterceptingEventQueue {
    fn queue_tasks(&self) {
        self.state.lock().paused = true;
    }

    fn release_tasks(&self) {
        self.state.lock().paused = false;
    }

    fn run_tasks(&self) {
        // Events arriving after this point wait for the next drain
        let drained: Vec<_> = self.state.lock().buffered.drain(..).collect();
        if drained.is_empty() {
            return;
        }

        let count = drained.len();
        let latch = Arc::new(LatchCompletionSignal::new(count));
        let core = self.core();

        if core.as_ref().is_some_and(|c| c.is_dispatch_thread()) {
            for event in drained {
                let signal: Arc<dyn CompletionSignal> = latch.clone();
                event.with_signal(signal).dispatch();
            }
            return;
        }

        trace!("[EVENT-QUEUE] Draining {} buffered events", count);
        for event in drained {
            let signal: Arc<dyn CompletionSignal> = latch.clone();
            Self::post_or_run(core.as_deref(), event.with_signal(signal));
        }

        match latch.latch().await_for(self.drain_timeout) {
            LatchWait::Completed => trace!("[EVENT-QUEUE] Drained {} events", count),
            LatchWait::TimedOut => warn!(
                "[EVENT-QUEUE] {} of {} drained events still running after {:?}",
                latch.latch().count(),
                count,
                self.drain_timeout
            ),
            LatchWait::Interrupted => debug!("[EVENT-QUEUE] Event drain interrupted"),
        }
    }
}
