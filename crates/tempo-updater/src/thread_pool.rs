// Copyright 2025 Tempo Developers
// SPDX-License-Identifier: Apache-2.0

//! Fixed-size pool of update worker threads
//!
//! Workers are numbered from 1 and carry that number in their thread name
//! and in a thread-local, so listeners can tell which worker ran an update.

use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{unbounded, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::error::{panic_message, UpdaterError, UpdaterResult};

thread_local! {
    static CURRENT_UPDATE_THREAD: Cell<Option<usize>> = const { Cell::new(None) };
}

/// Identity of an update worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateThread {
    index: usize,
    name: String,
}

impl UpdateThread {
    /// 1-based worker number
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Worker number of the calling thread, if it is an update worker
    pub fn current_index() -> Option<usize> {
        CURRENT_UPDATE_THREAD.with(|current| current.get())
    }
}

type Job = Box<dyn FnOnce(&UpdateThread) + Send + 'static>;

/// How long dropping a pool waits for busy workers before detaching them
pub const SHUTDOWN_GRACE: Duration = Duration::from_millis(250);

const JOIN_POLL: Duration = Duration::from_millis(5);

pub struct UpdateThreadPool {
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    num_threads: usize,
    name_prefix: String,
}

impl UpdateThreadPool {
    /// Spawn `threads` workers (at least one)
    pub fn new(threads: usize, name_prefix: &str) -> UpdaterResult<Self> {
        let threads = threads.max(1);
        let (sender, receiver) = unbounded::<Job>();

        let mut workers = Vec::with_capacity(threads);
        for index in 1..=threads {
            let receiver = receiver.clone();
            let identity = UpdateThread {
                index,
                name: format!("{}-{}", name_prefix, index),
            };
            let handle = thread::Builder::new()
                .name(identity.name.clone())
                .spawn(move || {
                    CURRENT_UPDATE_THREAD.with(|current| current.set(Some(identity.index)));
                    for job in receiver.iter() {
                        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| job(&identity))) {
                            error!(
                                "[UPDATE-POOL] Job panicked on {}: {}",
                                identity.name,
                                panic_message(&*payload)
                            );
                        }
                    }
                    debug!("[UPDATE-POOL] {} exiting", identity.name);
                })
                .map_err(|e| UpdaterError::ThreadSpawn(e.to_string()))?;
            workers.push(handle);
        }

        debug!("[UPDATE-POOL] Started {} workers ({})", threads, name_prefix);
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            num_threads: threads,
            name_prefix: name_prefix.to_string(),
        })
    }

    /// Queue a job for the next idle worker
    pub fn submit<F>(&self, job: F) -> UpdaterResult<()>
    where
        F: FnOnce(&UpdateThread) + Send + 'static,
    {
        let sender = self.sender.lock();
        let sender = sender
            .as_ref()
            .ok_or_else(|| UpdaterError::ExecutorShutDown(self.name_prefix.clone()))?;
        sender
            .send(Box::new(job))
            .map_err(|_| UpdaterError::ExecutorShutDown(self.name_prefix.clone()))
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Finish queued jobs and join the workers
    pub fn shutdown(&self) {
        self.close(None);
    }

    /// Close the pool, joining workers for at most `grace`
    ///
    /// Workers still busy after `grace` are detached: they drain the jobs
    /// already queued and exit on their own. Returns how many were detached.
    pub fn shutdown_within(&self, grace: Duration) -> usize {
        self.close(Some(grace))
    }

    fn close(&self, grace: Option<Duration>) -> usize {
        if self.sender.lock().take().is_none() {
            return 0;
        }
        let workers = std::mem::take(&mut *self.workers.lock());
        let deadline = grace.map(|grace| Instant::now() + grace);
        let current = thread::current().id();
        let mut detached = 0;

        for worker in workers {
            if worker.thread().id() == current {
                continue;
            }
            if let Some(deadline) = deadline {
                while !worker.is_finished() && Instant::now() < deadline {
                    thread::sleep(JOIN_POLL);
                }
                if !worker.is_finished() {
                    warn!(
                        "[UPDATE-POOL] Detaching busy worker {}",
                        worker.thread().name().unwrap_or("unnamed")
                    );
                    detached += 1;
                    continue;
                }
            }
            if worker.join().is_err() {
                error!("[UPDATE-POOL] Worker thread panicked during shutdown");
            }
        }
        debug!("[UPDATE-POOL] {} pool shut down", self.name_prefix);
        detached
    }
}

impl Drop for UpdateThreadPool {
    fn drop(&mut self) {
        self.shutdown_within(SHUTDOWN_GRACE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::bounded;
    use std::collections::BTreeSet;
    use std::sync::{Arc, Barrier};

    #[test]
    fn test_threads_numbered_from_one() {
        let pool = UpdateThreadPool::new(3, "test-pool").unwrap();
        assert_eq!(pool.num_threads(), 3);

        // Park every worker on a barrier so each one reports exactly once
        let barrier = Arc::new(Barrier::new(3));
        let (tx, rx) = bounded(3);
        for _ in 0..3 {
            let barrier = barrier.clone();
            let tx = tx.clone();
            pool.submit(move |thread| {
                barrier.wait();
                tx.send((thread.index(), UpdateThread::current_index(), thread.name().to_string()))
                    .unwrap();
            })
            .unwrap();
        }

        let mut indices = BTreeSet::new();
        for _ in 0..3 {
            let (index, current, name) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
            assert_eq!(Some(index), current);
            assert_eq!(name, format!("test-pool-{}", index));
            indices.insert(index);
        }
        assert_eq!(indices, BTreeSet::from([1, 2, 3]));
    }

    #[test]
    fn test_zero_threads_means_one() {
        let pool = UpdateThreadPool::new(0, "tiny").unwrap();
        assert_eq!(pool.num_threads(), 1);
    }

    #[test]
    fn test_non_worker_has_no_index() {
        assert_eq!(UpdateThread::current_index(), None);
    }

    #[test]
    fn test_panicking_job_keeps_worker_alive() {
        let pool = UpdateThreadPool::new(1, "sturdy").unwrap();
        pool.submit(|_| panic!("bad job")).unwrap();

        let (tx, rx) = bounded(1);
        pool.submit(move |_| tx.send(()).unwrap()).unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn test_submit_after_shutdown_fails() {
        let pool = UpdateThreadPool::new(2, "closed").unwrap();
        pool.shutdown();
        assert!(matches!(
            pool.submit(|_| {}),
            Err(UpdaterError::ExecutorShutDown(_))
        ));
    }

    #[test]
    fn test_shutdown_within_detaches_busy_worker() {
        let pool = UpdateThreadPool::new(2, "busy").unwrap();
        let (started_tx, started_rx) = bounded(1);
        let (release_tx, release_rx) = bounded::<()>(1);
        pool.submit(move |_| {
            started_tx.send(()).unwrap();
            let _ = release_rx.recv_timeout(Duration::from_secs(5));
        })
        .unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let begun = Instant::now();
        let detached = pool.shutdown_within(Duration::from_millis(50));

        assert_eq!(detached, 1);
        assert!(begun.elapsed() < Duration::from_secs(2));
        assert!(matches!(
            pool.submit(|_| {}),
            Err(UpdaterError::ExecutorShutDown(_))
        ));
        let _ = release_tx.send(());
    }

    #[test]
    fn test_shutdown_within_joins_idle_workers() {
        let pool = UpdateThreadPool::new(3, "idle").unwrap();
        assert_eq!(pool.shutdown_within(Duration::from_secs(5)), 0);
        assert_eq!(pool.shutdown_within(Duration::from_secs(5)), 0);
    }
}
