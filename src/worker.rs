//! Worker threads: the per-thread scheduler state, the job loop, and the
//! switch loop that performs fiber hand-offs.
//!
//! The thread's top level is the switch loop. A fiber runs until it either
//! finishes (worker stopped) or suspends with a [`Switch`] directive, and
//! the loop carries the directive out: park the fiber for a pending call,
//! or recycle it and jump into a suspended one. Fibers migrate: a resumed
//! call stack continues on whichever worker dequeued its resume job, so
//! the job loop re-reads thread state every iteration.

use crate::fiber::{Fiber, FiberInput, FiberState, Switch};
use crate::job_system::Shared;
use crate::token::DependencyToken;
use std::cell::{Cell, RefCell};
use std::sync::atomic::Ordering;
use std::sync::Arc;

struct WorkerContext {
    thread_id: Cell<usize>,
    running: Cell<bool>,
    /// Fibers this thread parked after handing their call stacks back;
    /// reused before any new fiber is created.
    recycled: RefCell<Vec<Box<Fiber>>>,
    /// Token of the job currently executing on this thread, cloned into
    /// jobs submitted with `push_dependent`.
    dependent: RefCell<Option<DependencyToken>>,
}

thread_local! {
    static CONTEXT: WorkerContext = WorkerContext {
        thread_id: Cell::new(0),
        running: Cell::new(true),
        recycled: RefCell::new(Vec::new()),
        dependent: RefCell::new(None),
    };
}

pub(crate) fn thread_id() -> usize {
    CONTEXT.with(|c| c.thread_id.get())
}

fn running() -> bool {
    CONTEXT.with(|c| c.running.get())
}

/// Stops the worker executing this job once the job completes. Pushed by
/// `kill_all_workers` and the sync driver, one per worker to stop.
pub(crate) fn stop_current() {
    CONTEXT.with(|c| c.running.set(false));
}

pub(crate) fn dependent_token() -> Option<DependencyToken> {
    CONTEXT.with(|c| c.dependent.borrow().clone())
}

/// Restores this thread's scheduler state for a new pool. Fibers parked by
/// a previous pool on the same thread are dropped, unwinding their stacks.
fn reset(id: usize) {
    CONTEXT.with(|c| {
        c.thread_id.set(id);
        c.running.set(true);
        c.recycled.borrow_mut().clear();
        *c.dependent.borrow_mut() = None;
    });
}

/// Scope guard exposing the running job's token to `push_dependent`.
struct DependentGuard;

impl DependentGuard {
    fn set(token: Option<DependencyToken>) -> DependentGuard {
        CONTEXT.with(|c| *c.dependent.borrow_mut() = token);
        DependentGuard
    }
}

impl Drop for DependentGuard {
    fn drop(&mut self) {
        // try_with: this guard also unwinds inside parked fibers dropped
        // during thread teardown, after the thread-local is gone.
        let _ = CONTEXT.try_with(|c| c.dependent.borrow_mut().take());
    }
}

/// Creates a fiber that enters the job loop and counts it toward the
/// pool's created-fiber total.
pub(crate) fn fresh_fiber(shared: &Arc<Shared>) -> Box<Fiber> {
    shared.fibers_created.fetch_add(1, Ordering::Relaxed);
    let shared = Arc::clone(shared);
    Fiber::with_entry(move || job_loop(&shared))
}

/// Pops and executes jobs until this thread's worker is stopped.
///
/// Runs inside a fiber. Worker 0 consumes the main queue ahead of the
/// global one; everyone else consumes the global queue only. Dropping the
/// finished job releases its dependency token, which is what fires call
/// continuations.
pub(crate) fn job_loop(shared: &Shared) {
    while running() {
        let mut job = if thread_id() == 0 {
            shared.queue.pop_main()
        } else {
            shared.queue.pop()
        };
        let _dependent = DependentGuard::set(job.token().cloned());
        job.invoke();
    }
    log::trace!("worker {} stopping", thread_id());
}

/// The switch loop: hosts `entry` and every fiber it hands off to, until
/// one of them finishes.
pub(crate) fn run(id: usize, shared: &Arc<Shared>, entry: Box<Fiber>) {
    reset(id);
    log::trace!("worker {id} online");

    let mut current = entry;
    let mut input = FiberInput::Start(current.handle());
    loop {
        match current.resume(input) {
            FiberState::Suspended(Switch::Call { arming }) => {
                // The resume job enqueued when the token fires owns the
                // parked fiber from here on.
                let parked = Box::into_raw(current);
                debug_assert!(!parked.is_null());
                // Release the arming reference only now that the caller's
                // stack is off this thread. The continuation may fire
                // immediately, on this very line.
                drop(arming);

                match CONTEXT.with(|c| c.recycled.borrow_mut().pop()) {
                    Some(fiber) => {
                        current = fiber;
                        input = FiberInput::Resume;
                    }
                    None => {
                        current = fresh_fiber(shared);
                        input = FiberInput::Start(current.handle());
                    }
                }
            }
            FiberState::Suspended(Switch::Resume(handle)) => {
                CONTEXT.with(|c| c.recycled.borrow_mut().push(current));
                // SAFETY: the handle was minted when that fiber was parked
                // by a call; the resume job that carried it here is its
                // sole owner.
                current = unsafe { Box::from_raw(handle.0) };
                input = FiberInput::Resume;
            }
            FiberState::Finished => break,
        }
    }

    // Drop parked fibers while the thread-locals they unwind through are
    // still alive.
    CONTEXT.with(|c| c.recycled.borrow_mut().clear());
    log::trace!("worker {id} offline");
}
