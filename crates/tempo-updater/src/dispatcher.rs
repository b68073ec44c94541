// Copyright 2025 Tempo Developers
// SPDX-License-Identifier: Apache-2.0

//! UI event dispatch thread
//!
//! A minimal toolkit event loop: events are posted from any thread and run
//! one at a time, in posting order, on a single dispatch thread. An
//! [`InterceptingEventQueue`] may be installed to hold invocation events
//! back while the workspace updates.
//!
//! A dispatcher accepts one interceptor at a time, and an interceptor
//! serves one dispatcher.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Instant;

use crossbeam::channel::{bounded, unbounded, Sender};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::error::{panic_message, UpdaterError, UpdaterResult};
use crate::event_queue::InterceptingEventQueue;

type Runnable = Box<dyn FnOnce() + Send + 'static>;

/// Deferred work posted to the dispatch thread
pub struct InvocationEvent {
    source: String,
    when: Instant,
    runnable: Runnable,
}

impl InvocationEvent {
    pub fn new<F>(source: impl Into<String>, runnable: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::posted_at(source.into(), Instant::now(), Box::new(runnable))
    }

    pub(crate) fn posted_at(source: String, when: Instant, runnable: Runnable) -> Self {
        Self {
            source,
            when,
            runnable,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// When the event was created
    pub fn when(&self) -> Instant {
        self.when
    }

    pub fn dispatch(self) {
        (self.runnable)()
    }
}

impl fmt::Debug for InvocationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationEvent")
            .field("source", &self.source)
            .field("when", &self.when)
            .finish_non_exhaustive()
    }
}

/// Any non-invocation event (input, paint, ...); never intercepted
pub struct OtherEvent {
    kind: String,
    handler: Runnable,
}

impl OtherEvent {
    pub fn new<F>(kind: impl Into<String>, handler: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            kind: kind.into(),
            handler: Box::new(handler),
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }
}

impl fmt::Debug for OtherEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OtherEvent")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub enum ToolkitEvent {
    Invocation(InvocationEvent),
    Other(OtherEvent),
}

impl ToolkitEvent {
    pub fn invocation<F>(source: impl Into<String>, runnable: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        ToolkitEvent::Invocation(InvocationEvent::new(source, runnable))
    }

    pub fn other<F>(kind: impl Into<String>, handler: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        ToolkitEvent::Other(OtherEvent::new(kind, handler))
    }

    pub fn dispatch(self) {
        match self {
            ToolkitEvent::Invocation(event) => event.dispatch(),
            ToolkitEvent::Other(event) => (event.handler)(),
        }
    }
}

/// Posting side of the dispatch thread, shared with interceptors
pub(crate) struct DispatcherCore {
    sender: Mutex<Option<Sender<ToolkitEvent>>>,
    thread_id: ThreadId,
}

impl DispatcherCore {
    /// Post straight to the dispatch thread, bypassing any interceptor
    pub(crate) fn post(&self, event: ToolkitEvent) -> Result<(), ToolkitEvent> {
        match self.sender.lock().as_ref() {
            Some(sender) => sender.send(event).map_err(|e| e.into_inner()),
            None => Err(event),
        }
    }

    pub(crate) fn is_dispatch_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }
}

pub struct EventDispatcher {
    name: String,
    core: Arc<DispatcherCore>,
    handle: Mutex<Option<JoinHandle<()>>>,
    interceptor: RwLock<Option<Arc<InterceptingEventQueue>>>,
}

impl EventDispatcher {
    /// Start a dispatch thread named `name`
    pub fn new(name: &str) -> UpdaterResult<Self> {
        let (sender, receiver) = unbounded::<ToolkitEvent>();
        let thread_name = name.to_string();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                for event in receiver.iter() {
                    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| event.dispatch())) {
                        error!(
                            "[EVENT-QUEUE] Event handler panicked on {}: {}",
                            thread_name,
                            panic_message(&*payload)
                        );
                    }
                }
                debug!("[EVENT-QUEUE] Dispatch thread {} exiting", thread_name);
            })
            .map_err(|e| UpdaterError::ThreadSpawn(e.to_string()))?;

        Ok(Self {
            name: name.to_string(),
            core: Arc::new(DispatcherCore {
                sender: Mutex::new(Some(sender)),
                thread_id: handle.thread().id(),
            }),
            handle: Mutex::new(Some(handle)),
            interceptor: RwLock::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Post an event, routing it through the installed interceptor if any
    pub fn post_event(&self, event: ToolkitEvent) -> UpdaterResult<()> {
        let interceptor = self.interceptor.read().clone();
        match interceptor {
            Some(queue) => queue.intercept(event),
            None => self
                .core
                .post(event)
                .map_err(|_| UpdaterError::DispatcherShutDown),
        }
    }

    /// Run `runnable` later on the dispatch thread
    pub fn invoke_later<F>(&self, source: &str, runnable: F) -> UpdaterResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.post_event(ToolkitEvent::invocation(source, runnable))
    }

    /// Run `task` on the dispatch thread and wait for its result
    ///
    /// Runs inline when called from the dispatch thread. While an
    /// interceptor is paused this blocks until the current update cycle
    /// drains the event.
    pub fn invoke_and_wait<R, F>(&self, source: &str, task: F) -> UpdaterResult<R>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        if self.is_dispatch_thread() {
            return Ok(task());
        }
        let (tx, rx) = bounded(1);
        self.invoke_later(source, move || {
            let _ = tx.send(task());
        })?;
        rx.recv().map_err(|_| UpdaterError::DispatcherShutDown)
    }

    pub fn is_dispatch_thread(&self) -> bool {
        self.core.is_dispatch_thread()
    }

    /// Route future posts through `queue`
    ///
    /// # Errors
    ///
    /// [`UpdaterError::InterceptorAlreadyInstalled`] if this dispatcher
    /// already has an interceptor or `queue` serves another dispatcher.
    pub fn install(&self, queue: Arc<InterceptingEventQueue>) -> UpdaterResult<()> {
        let mut slot = self.interceptor.write();
        if slot.is_some() {
            return Err(UpdaterError::InterceptorAlreadyInstalled);
        }
        queue.attach(Arc::downgrade(&self.core))?;
        *slot = Some(queue);
        info!("[EVENT-QUEUE] Intercepting event queue installed on {}", self.name);
        Ok(())
    }

    /// Remove the interceptor; events it still buffers are posted normally
    pub fn uninstall(&self) -> UpdaterResult<Arc<InterceptingEventQueue>> {
        let queue = self
            .interceptor
            .write()
            .take()
            .ok_or(UpdaterError::InterceptorNotInstalled)?;
        queue.detach();
        info!("[EVENT-QUEUE] Intercepting event queue removed from {}", self.name);
        Ok(queue)
    }

    pub fn has_interceptor(&self) -> bool {
        self.interceptor.read().is_some()
    }

    /// Remove any interceptor, run queued events, and join the thread
    pub fn shutdown(&self) {
        if self.has_interceptor() {
            if let Err(e) = self.uninstall() {
                warn!("[EVENT-QUEUE] Failed to remove interceptor: {}", e);
            }
        }
        if self.core.sender.lock().take().is_none() {
            return;
        }
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if self.is_dispatch_thread() {
                return;
            }
            if handle.join().is_err() {
                error!("[EVENT-QUEUE] Dispatch thread {} panicked", self.name);
            }
        }
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Weak handle an interceptor keeps to its dispatcher
pub(crate) type DispatcherLink = Weak<DispatcherCore>;
