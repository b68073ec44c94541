// Copyright 2025 Tempo Developers
// SPDX-License-Identifier: Apache-2.0

//! Single-threaded task executor
//!
//! Tasks run one at a time in submission order on a dedicated, named
//! thread. The updater uses one for the cycle driver and one for listener
//! notifications.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use crossbeam::channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;
use tracing::{debug, error};

use crate::error::{panic_message, UpdaterError, UpdaterResult};

type Task = Box<dyn FnOnce() + Send + 'static>;

pub struct SerialExecutor {
    name: String,
    sender: Mutex<Option<Sender<Task>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
}

impl SerialExecutor {
    pub fn new(name: &str) -> UpdaterResult<Self> {
        let (sender, receiver) = unbounded::<Task>();
        let thread_name = name.to_string();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                for task in receiver.iter() {
                    if let Err(payload) = catch_unwind(AssertUnwindSafe(task)) {
                        error!(
                            "[UPDATER] Task on {} panicked: {}",
                            thread_name,
                            panic_message(&*payload)
                        );
                    }
                }
                debug!("[UPDATER] Executor {} exiting", thread_name);
            })
            .map_err(|e| UpdaterError::ThreadSpawn(e.to_string()))?;

        Ok(Self {
            name: name.to_string(),
            thread_id: handle.thread().id(),
            sender: Mutex::new(Some(sender)),
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue a task and return a handle to await it
    pub fn submit<F>(&self, task: F) -> UpdaterResult<TaskHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        let (done_tx, done_rx) = bounded(1);
        self.execute(move || {
            let outcome = catch_unwind(AssertUnwindSafe(task))
                .map_err(|payload| panic_message(&*payload));
            let _ = done_tx.send(outcome);
        })?;
        Ok(TaskHandle {
            receiver: done_rx,
            outcome: Mutex::new(None),
        })
    }

    /// Queue a task without tracking it
    pub fn execute<F>(&self, task: F) -> UpdaterResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = self.sender.lock();
        let sender = sender
            .as_ref()
            .ok_or_else(|| UpdaterError::ExecutorShutDown(self.name.clone()))?;
        sender
            .send(Box::new(task))
            .map_err(|_| UpdaterError::ExecutorShutDown(self.name.clone()))
    }

    /// Block until every task queued before this call has run
    pub fn flush(&self) -> UpdaterResult<()> {
        if self.is_current_thread() {
            return Ok(());
        }
        self.submit(|| {})?.wait()
    }

    pub fn is_current_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Run queued tasks to completion and join the thread
    pub fn shutdown(&self) {
        if self.sender.lock().take().is_none() {
            return;
        }
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if self.is_current_thread() {
                return;
            }
            if handle.join().is_err() {
                error!("[UPDATER] Executor {} panicked during shutdown", self.name);
            }
        }
    }
}

impl Drop for SerialExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Handle to a submitted task
pub struct TaskHandle {
    receiver: Receiver<Result<(), String>>,
    outcome: Mutex<Option<Result<(), String>>>,
}

impl TaskHandle {
    /// Block until the task finishes
    ///
    /// A panicking task yields [`UpdaterError::TaskFailed`].
    pub fn wait(&self) -> UpdaterResult<()> {
        let mut outcome = self.outcome.lock();
        if outcome.is_none() {
            *outcome = Some(
                self.receiver
                    .recv()
                    .unwrap_or_else(|_| Err("task dropped before running".to_string())),
            );
        }
        Self::to_result(outcome.as_ref())
    }

    /// Wait for at most `timeout`; `None` if the task is still running
    pub fn wait_timeout(&self, timeout: Duration) -> Option<UpdaterResult<()>> {
        let mut outcome = self.outcome.lock();
        if outcome.is_none() {
            match self.receiver.recv_timeout(timeout) {
                Ok(result) => *outcome = Some(result),
                Err(RecvTimeoutError::Timeout) => return None,
                Err(RecvTimeoutError::Disconnected) => {
                    *outcome = Some(Err("task dropped before running".to_string()))
                }
            }
        }
        Some(Self::to_result(outcome.as_ref()))
    }

    pub fn is_finished(&self) -> bool {
        let mut outcome = self.outcome.lock();
        if outcome.is_some() {
            return true;
        }
        match self.receiver.try_recv() {
            Ok(result) => {
                *outcome = Some(result);
                true
            }
            Err(TryRecvError::Empty) => false,
            Err(TryRecvError::Disconnected) => {
                *outcome = Some(Err("task dropped before running".to_string()));
                true
            }
        }
    }

    fn to_result(outcome: Option<&Result<(), String>>) -> UpdaterResult<()> {
        match outcome {
            Some(Ok(())) => Ok(()),
            Some(Err(message)) => Err(UpdaterError::TaskFailed(message.clone())),
            None => Err(UpdaterError::TaskFailed("task outcome unavailable".to_string())),
        }
    }
}
