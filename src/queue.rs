//! The dual job queue: a global FIFO any worker may drain and a FIFO
//! reserved for worker 0.
//!
//! Consumers spin on the lock-free queues before falling back to a
//! condition-variable wait, so the condvar is only touched when producers
//! fall behind. Producers signal under the condvar's lock, which closes the
//! window between a consumer's last failed pop and its wait.

use crate::job::Job;
use crossbeam::queue::SegQueue;
use std::sync::{Condvar, Mutex};

/// Failed pops before a consumer gives up spinning and waits.
const SPIN_COUNT: u32 = 10_000;

struct Signal {
    lock: Mutex<()>,
    cv: Condvar,
}

impl Signal {
    fn new() -> Signal {
        Signal {
            lock: Mutex::new(()),
            cv: Condvar::new(),
        }
    }

    fn notify_one(&self) {
        let _guard = self.lock.lock().unwrap();
        self.cv.notify_one();
    }

    fn notify_all(&self) {
        let _guard = self.lock.lock().unwrap();
        self.cv.notify_all();
    }
}

pub(crate) struct JobQueue {
    global: SegQueue<Job>,
    main: SegQueue<Job>,
    global_signal: Signal,
    main_signal: Signal,
}

impl JobQueue {
    pub(crate) fn new() -> JobQueue {
        JobQueue {
            global: SegQueue::new(),
            main: SegQueue::new(),
            global_signal: Signal::new(),
            main_signal: Signal::new(),
        }
    }

    /// Blocking pop for an ordinary worker: global queue only.
    pub(crate) fn pop(&self) -> Job {
        let mut spins = 0;
        loop {
            if let Some(job) = self.global.pop() {
                return job;
            }
            spins += 1;
            if spins > SPIN_COUNT {
                spins = 0;
                let guard = self.global_signal.lock.lock().unwrap();
                // Recheck under the lock; producers notify under it too.
                if let Some(job) = self.global.pop() {
                    return job;
                }
                drop(self.global_signal.cv.wait(guard).unwrap());
            }
        }
    }

    /// Blocking pop for worker 0: the main queue first, so work that must
    /// land on thread 0 (resume edges of from-main calls included) is never
    /// starved behind ordinary jobs, then the global queue.
    pub(crate) fn pop_main(&self) -> Job {
        let mut spins = 0;
        loop {
            if let Some(job) = self.main.pop().or_else(|| self.global.pop()) {
                return job;
            }
            spins += 1;
            if spins > SPIN_COUNT {
                spins = 0;
                let guard = self.main_signal.lock.lock().unwrap();
                if let Some(job) = self.main.pop().or_else(|| self.global.pop()) {
                    return job;
                }
                drop(self.main_signal.cv.wait(guard).unwrap());
            }
        }
    }

    /// Pushes one job. `to_main` restricts it to worker 0. Global pushes
    /// also nudge worker 0, which consumes both queues.
    pub(crate) fn push(&self, to_main: bool, job: Job) {
        if to_main {
            self.main.push(job);
            self.main_signal.notify_one();
        } else {
            self.global.push(job);
            self.global_signal.notify_one();
            self.main_signal.notify_one();
        }
    }

    /// Pushes a group of jobs, then wakes every waiter on the target queue.
    pub(crate) fn push_bulk(&self, to_main: bool, jobs: Vec<Job>) {
        if jobs.is_empty() {
            return;
        }
        if to_main {
            for job in jobs {
                self.main.push(job);
            }
            self.main_signal.notify_all();
        } else {
            for job in jobs {
                self.global.push(job);
            }
            self.global_signal.notify_all();
            self.main_signal.notify_one();
        }
    }
}
