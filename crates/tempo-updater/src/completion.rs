// Copyright 2025 Tempo Developers
// SPDX-License-Identifier: Apache-2.0

//! Completion signalling between update workers and the cycle driver
//!
//! Every scheduled update part signals exactly once, success or failure, so
//! a latch sized to the number of scheduled parts always reaches zero.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::component::ComponentId;
use crate::error::ComponentError;

/// Record of one failed update part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartFailure {
    pub component: ComponentId,
    pub component_name: String,
    pub part: usize,
    pub error: ComponentError,
}

/// Receives completion of update parts
pub trait CompletionSignal: Send + Sync {
    /// The part finished normally
    fn done(&self);

    /// The part failed; still counts as finished
    fn failed(&self, failure: PartFailure) {
        let _ = failure;
        self.done();
    }
}

/// Signal that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCompletionSignal;

impl CompletionSignal for NoopCompletionSignal {
    fn done(&self) {}
}

/// Outcome of waiting on a [`CountDownLatch`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatchWait {
    Completed,
    TimedOut,
    Interrupted,
}

#[derive(Debug)]
struct LatchState {
    count: usize,
    interrupted: bool,
}

/// One-shot countdown barrier
#[derive(Debug)]
pub struct CountDownLatch {
    state: Mutex<LatchState>,
    zero: Condvar,
}

impl CountDownLatch {
    pub fn new(count: usize) -> Self {
        Self {
            state: Mutex::new(LatchState {
                count,
                interrupted: false,
            }),
            zero: Condvar::new(),
        }
    }

    /// Decrement the count; saturates at zero
    pub fn count_down(&self) {
        let mut state = self.state.lock();
        if state.count > 0 {
            state.count -= 1;
            if state.count == 0 {
                self.zero.notify_all();
            }
        }
    }

    pub fn count(&self) -> usize {
        self.state.lock().count
    }

    /// Wake all waiters with [`LatchWait::Interrupted`] unless already complete
    pub fn interrupt(&self) {
        let mut state = self.state.lock();
        state.interrupted = true;
        self.zero.notify_all();
    }

    /// Block until the count reaches zero or the latch is interrupted
    pub fn await_done(&self) -> LatchWait {
        let mut state = self.state.lock();
        loop {
            if state.count == 0 {
                return LatchWait::Completed;
            }
            if state.interrupted {
                return LatchWait::Interrupted;
            }
            self.zero.wait(&mut state);
        }
    }

    /// Block for at most `timeout`
    pub fn await_timeout(&self, timeout: Duration) -> LatchWait {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if state.count == 0 {
                return LatchWait::Completed;
            }
            if state.interrupted {
                return LatchWait::Interrupted;
            }
            if self.zero.wait_until(&mut state, deadline).timed_out() {
                return if state.count == 0 {
                    LatchWait::Completed
                } else {
                    LatchWait::TimedOut
                };
            }
        }
    }

    /// Wait with an optional bound
    pub fn await_for(&self, timeout: Option<Duration>) -> LatchWait {
        match timeout {
            Some(timeout) => self.await_timeout(timeout),
            None => self.await_done(),
        }
    }
}

/// Completion signal backed by a latch that also collects part failures
#[derive(Debug)]
pub struct LatchCompletionSignal {
    latch: CountDownLatch,
    failures: Mutex<Vec<PartFailure>>,
}

impl LatchCompletionSignal {
    pub fn new(parts: usize) -> Self {
        Self {
            latch: CountDownLatch::new(parts),
            failures: Mutex::new(Vec::new()),
        }
    }

    pub fn latch(&self) -> &CountDownLatch {
        &self.latch
    }

    /// Failures recorded so far
    pub fn failures(&self) -> Vec<PartFailure> {
        self.failures.lock().clone()
    }
}

impl CompletionSignal for LatchCompletionSignal {
    fn done(&self) {
        self.latch.count_down();
    }

    fn failed(&self, failure: PartFailure) {
        self.failures.lock().push(failure);
        self.latch.count_down();
    }
}
