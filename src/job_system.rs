//! The scheduler front-end: pool lifecycle and the push / call surface.

use crate::fiber::{self, Fiber, Switch};
use crate::job::{Job, Payload};
use crate::queue::JobQueue;
use crate::runnable::{bind, bind_batch, Kind, Runnable};
use crate::token::DependencyToken;
use crate::worker;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

/// State shared by every worker of one pool.
pub(crate) struct Shared {
    pub(crate) queue: JobQueue,
    pub(crate) worker_count: usize,
    /// Fibers created over the pool's lifetime; bounded by the worker
    /// count plus the peak number of simultaneously suspended calls.
    pub(crate) fibers_created: AtomicUsize,
}

/// Handle to a running scheduler pool.
///
/// Cheap to clone: jobs that submit further work capture a clone. The pool
/// itself is booted with [`start_async`](JobSystem::start_async) or
/// [`start_sync`](JobSystem::start_sync); the entry closure receives the
/// first handle.
///
/// ```no_run
/// use weft::{bind, JobSystem};
///
/// JobSystem::start_sync(4, |sys| {
///     let follow_up = sys.clone();
///     sys.call([bind(move || {
///         follow_up.push([bind(|| println!("chained"))]);
///     })]);
/// });
/// ```
#[derive(Clone)]
pub struct JobSystem {
    pub(crate) shared: Arc<Shared>,
}

impl JobSystem {
    // ---- lifecycle ------------------------------------------------------

    /// Boots a pool of `threads` workers (the calling thread becomes worker
    /// 0) and runs `entry` as its first job. Returns once
    /// [`kill_all_workers`](Self::kill_all_workers) has stopped every
    /// worker.
    pub fn start_async<F>(threads: usize, entry: F)
    where
        F: FnOnce(&JobSystem) + Send + 'static,
    {
        Self::start_async_inner(threads, false, entry);
    }

    /// As [`start_async`](Self::start_async), with each worker pinned to a
    /// core.
    pub fn start_async_with_affinity<F>(threads: usize, entry: F)
    where
        F: FnOnce(&JobSystem) + Send + 'static,
    {
        Self::start_async_inner(threads, true, entry);
    }

    /// Boots a pool of `threads` workers and performs a synchronous call on
    /// `entry`: the function returns on the calling thread once `entry`
    /// (and everything it chained via dependent pushes) has returned. The
    /// remaining workers are stopped and joined before returning.
    pub fn start_sync<F>(threads: usize, entry: F)
    where
        F: FnOnce(&JobSystem) + Send + 'static,
    {
        Self::start_sync_inner(threads, false, entry);
    }

    /// As [`start_sync`](Self::start_sync), with each worker pinned to a
    /// core.
    pub fn start_sync_with_affinity<F>(threads: usize, entry: F)
    where
        F: FnOnce(&JobSystem) + Send + 'static,
    {
        Self::start_sync_inner(threads, true, entry);
    }

    /// Worker count matching the machine's available parallelism.
    pub fn default_threads() -> usize {
        thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
    }

    fn start_async_inner<F>(threads: usize, pin: bool, entry: F)
    where
        F: FnOnce(&JobSystem) + Send + 'static,
    {
        let (system, handles) = Self::boot(threads, pin);
        let seed = {
            let sys = system.clone();
            Job::new(move || entry(&sys))
        };
        system.shared.queue.push(true, seed);
        worker::run(0, &system.shared, worker::fresh_fiber(&system.shared));
        Self::join(handles);
    }

    fn start_sync_inner<F>(threads: usize, pin: bool, entry: F)
    where
        F: FnOnce(&JobSystem) + Send + 'static,
    {
        let (system, handles) = Self::boot(threads, pin);
        system.shared.fibers_created.fetch_add(1, Ordering::Relaxed);
        let driver = {
            let system = system.clone();
            Fiber::with_entry(move || {
                let sys = system.clone();
                system.call_impl(true, true, vec![bind(move || entry(&sys))]);
                // The entry has returned; stop the spawned workers before
                // handing the thread back.
                for _ in 1..system.shared.worker_count {
                    system.shared.queue.push(false, Job::new(worker::stop_current));
                }
            })
        };
        worker::run(0, &system.shared, driver);
        Self::join(handles);
    }

    fn boot(threads: usize, pin: bool) -> (JobSystem, Vec<thread::JoinHandle<()>>) {
        assert!(threads >= 1, "the pool needs at least one worker");
        log::debug!("starting pool with {threads} workers");

        let shared = Arc::new(Shared {
            queue: JobQueue::new(),
            worker_count: threads,
            fibers_created: AtomicUsize::new(0),
        });

        let cores = if pin {
            core_affinity::get_core_ids().unwrap_or_default()
        } else {
            Vec::new()
        };
        if let Some(&core) = cores.first() {
            core_affinity::set_for_current(core);
        }

        let handles = (1..threads)
            .map(|id| {
                let shared = Arc::clone(&shared);
                let core = cores.get(id % cores.len().max(1)).copied();
                thread::Builder::new()
                    .name(format!("weft-worker-{id}"))
                    .spawn(move || {
                        if let Some(core) = core {
                            core_affinity::set_for_current(core);
                        }
                        worker::run(id, &shared, worker::fresh_fiber(&shared));
                    })
                    .expect("failed to spawn worker thread")
            })
            .collect();

        (JobSystem { shared }, handles)
    }

    fn join(handles: Vec<thread::JoinHandle<()>>) {
        for handle in handles {
            handle.join().expect("worker thread panicked");
        }
    }

    /// Stops every worker: each kill job stops the worker that runs it,
    /// after the job it is currently executing. Work queued before this
    /// call still runs; nothing submitted after it is guaranteed to.
    pub fn kill_all_workers(&self) {
        log::debug!("stopping {} workers", self.shared.worker_count);
        for _ in 0..self.shared.worker_count {
            self.shared.queue.push(false, Job::new(worker::stop_current));
        }
    }

    // ---- introspection --------------------------------------------------

    /// Number of workers in the pool.
    pub fn worker_count(&self) -> usize {
        self.shared.worker_count
    }

    /// Id of the worker thread executing the caller; worker 0 is the main
    /// worker.
    pub fn thread_id(&self) -> usize {
        worker::thread_id()
    }

    // ---- fire-and-forget submission -------------------------------------

    /// Submits runnables for asynchronous execution on any worker. Each
    /// callable is invoked exactly once; ownership is taken.
    pub fn push<I>(&self, runnables: I)
    where
        I: IntoIterator<Item = Runnable>,
    {
        self.submit(false, None, runnables.into_iter().collect());
    }

    /// As [`push`](Self::push), pinned to worker 0.
    pub fn push_to_main<I>(&self, runnables: I)
    where
        I: IntoIterator<Item = Runnable>,
    {
        self.submit(true, None, runnables.into_iter().collect());
    }

    /// Submits runnables that also join the current job's completion: if
    /// that job was invoked through a `call`, the call does not return
    /// until these runnables finish too. From an untracked job this is an
    /// ordinary [`push`](Self::push).
    pub fn push_dependent<I>(&self, runnables: I)
    where
        I: IntoIterator<Item = Runnable>,
    {
        self.submit(false, worker::dependent_token(), runnables.into_iter().collect());
    }

    /// As [`push_dependent`](Self::push_dependent), pinned to worker 0.
    pub fn push_dependent_to_main<I>(&self, runnables: I)
    where
        I: IntoIterator<Item = Runnable>,
    {
        self.submit(true, worker::dependent_token(), runnables.into_iter().collect());
    }

    fn submit(&self, to_main: bool, token: Option<DependencyToken>, runnables: Vec<Runnable>) {
        let (mut jobs, mut batch_jobs) = pack_owned(runnables, self.shared.worker_count);
        if let Some(token) = token {
            for job in jobs.iter_mut().chain(batch_jobs.iter_mut()) {
                job.set_token(token.clone());
            }
        }
        self.shared.queue.push_bulk(to_main, jobs);
        self.shared.queue.push_bulk(to_main, batch_jobs);
    }

    // ---- synchronous calls ----------------------------------------------

    /// Runs the runnables and returns once all of them, plus anything they
    /// chain via [`push_dependent`](Self::push_dependent), have finished.
    ///
    /// The calling fiber is suspended, not the thread: the worker keeps
    /// draining the queue, so nested calls cannot starve the pool. Only
    /// valid from inside the pool (a job, or the sync entry).
    pub fn call<I>(&self, runnables: I)
    where
        I: IntoIterator<Item = Runnable>,
    {
        self.call_impl(false, false, runnables.into_iter().collect());
    }

    /// As [`call`](Self::call), with the runnables pinned to worker 0.
    pub fn call_on_main<I>(&self, runnables: I)
    where
        I: IntoIterator<Item = Runnable>,
    {
        self.call_impl(true, false, runnables.into_iter().collect());
    }

    /// As [`call`](Self::call), returning on worker 0 no matter where it
    /// was invoked.
    pub fn call_from_main<I>(&self, runnables: I)
    where
        I: IntoIterator<Item = Runnable>,
    {
        self.call_impl(false, true, runnables.into_iter().collect());
    }

    /// Moves the current call stack to worker 0, then returns.
    pub fn switch_to_main(&self) {
        self.call_impl(false, true, Vec::new());
    }

    /// Invokes `f(i)` for every `i` in `[start, end)`, split across the
    /// workers. Returns when the whole range has been visited.
    pub fn parallel_for<F>(&self, start: usize, end: usize, f: F)
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.call([bind_batch(
            move |lo, hi| {
                for i in lo..hi {
                    f(i);
                }
            },
            start,
            end,
        )]);
    }

    fn call_impl(&self, to_main: bool, from_main: bool, mut runnables: Vec<Runnable>) {
        debug_assert!(
            !runnables.is_empty() || to_main || from_main,
            "call with no runnables and no main transition suspends for nothing"
        );
        let caller = fiber::current().expect("call is only valid from inside the job system");

        // When the last job holding the token finishes, requeue the
        // suspended caller. From-main resumes go through the main queue so
        // worker 0 picks them up.
        let continuation = {
            let shared = Arc::clone(&self.shared);
            move || {
                let resume = Job::new(move || fiber::suspend(Switch::Resume(caller)));
                shared.queue.push(from_main, resume);
            }
        };
        let arming = DependencyToken::new(continuation);

        // The runnables stay in this frame; the jobs borrow them. The frame
        // is suspended until every borrowing job has been destroyed, which
        // is exactly when the token can fire.
        let (mut jobs, mut batch_jobs) = pack_borrowed(&mut runnables, self.shared.worker_count);
        for job in jobs.iter_mut().chain(batch_jobs.iter_mut()) {
            job.set_token(arming.clone());
        }

        // Everything is enqueued before the arming reference is released.
        // The release itself is done by the switch loop once this fiber is
        // off the thread, so the resume job cannot target a live stack.
        self.shared.queue.push_bulk(to_main, jobs);
        self.shared.queue.push_bulk(to_main, batch_jobs);
        fiber::suspend(Switch::Call { arming });
    }
}

// ---- packing ------------------------------------------------------------

/// Partitions runnables into standalone jobs and expanded batch sections,
/// taking ownership of every closure.
fn pack_owned(runnables: Vec<Runnable>, workers: usize) -> (Vec<Job>, Vec<Job>) {
    let batches = runnables
        .iter()
        .filter(|r| matches!(r.kind, Kind::Batch(_)))
        .count();
    let mut jobs = Vec::with_capacity(runnables.len() - batches);
    let mut batch_jobs = Vec::with_capacity(batches * 4);
    for runnable in runnables {
        match runnable.kind {
            Kind::Single(f) => {
                let f = f.expect("runnable already consumed");
                jobs.push(Job::from_payload(Payload::Owned(f)));
            }
            Kind::Batch(batch) => {
                let sections = batch.prepare(workers);
                let shared = Arc::new(batch);
                for _ in 0..sections {
                    batch_jobs.push(Job::from_payload(Payload::Batch(Arc::clone(&shared))));
                }
            }
        }
    }
    (jobs, batch_jobs)
}

/// Partitions runnables without copying them off the caller's stack. The
/// caller must stay suspended until every returned job is destroyed.
fn pack_borrowed(runnables: &mut [Runnable], workers: usize) -> (Vec<Job>, Vec<Job>) {
    let batches = runnables
        .iter()
        .filter(|r| matches!(r.kind, Kind::Batch(_)))
        .count();
    let mut jobs = Vec::with_capacity(runnables.len() - batches);
    let mut batch_jobs = Vec::with_capacity(batches * 4);
    for runnable in runnables.iter_mut() {
        match &mut runnable.kind {
            Kind::Single(slot) => {
                jobs.push(Job::from_payload(Payload::BorrowedSingle(slot as *mut _)));
            }
            Kind::Batch(batch) => {
                let sections = batch.prepare(workers);
                for _ in 0..sections {
                    batch_jobs.push(Job::from_payload(Payload::BorrowedBatch(batch as *const _)));
                }
            }
        }
    }
    (jobs, batch_jobs)
}
