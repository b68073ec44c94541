// Copyright 2025 Tempo Developers
// SPDX-License-Identifier: Apache-2.0

//! Unit of work run on an update worker: one part of one component

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{trace, warn};

use crate::completion::{CompletionSignal, PartFailure};
use crate::component::WorkspaceComponent;
use crate::error::{panic_message, ComponentError};
use crate::listener::{ComponentUpdateEvent, Notifier};
use crate::thread_pool::UpdateThread;

pub struct ComponentUpdate {
    component: Arc<dyn WorkspaceComponent>,
    part: usize,
    time: u64,
    signal: Arc<dyn CompletionSignal>,
    notifier: Arc<Notifier>,
}

impl ComponentUpdate {
    pub fn new(
        component: Arc<dyn WorkspaceComponent>,
        part: usize,
        time: u64,
        signal: Arc<dyn CompletionSignal>,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            component,
            part,
            time,
            signal,
            notifier,
        }
    }

    /// Update the part under its component's shared lock
    ///
    /// Listeners hear `starting` before `finished`, and the completion signal
    /// fires last, exactly once, whether the update succeeded, returned an
    /// error, or panicked.
    pub fn run(self, thread: &UpdateThread) {
        let event = ComponentUpdateEvent {
            component: self.component.id(),
            component_name: self.component.name(),
            part: self.part,
            time: self.time,
            thread: thread.index(),
        };
        self.notifier.component_update_started(event.clone());

        let outcome = {
            let _shared = self.component.lock().acquire_shared();
            match catch_unwind(AssertUnwindSafe(|| self.component.update_part(self.part))) {
                Ok(result) => result,
                Err(payload) => Err(ComponentError::Panicked(panic_message(&*payload))),
            }
        };
        trace!(
            "[UPDATER] {} part {} updated on {} (time {})",
            event.component_name,
            event.part,
            thread.name(),
            event.time
        );

        self.notifier.component_update_finished(event);

        match outcome {
            Ok(()) => self.signal.done(),
            Err(error) => {
                warn!(
                    "[UPDATER] {} part {} failed at time {}: {}",
                    self.component.name(),
                    self.part,
                    self.time,
                    error
                );
                let failure = PartFailure {
                    component: self.component.id(),
                    component_name: self.component.name(),
                    part: self.part,
                    error,
                };
                self.notifier.component_update_failed(failure.clone(), self.time);
                self.signal.failed(failure);
            }
        }
    }
}
