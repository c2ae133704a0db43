//! Fibers: stackful execution contexts hosted on worker threads.
//!
//! Every worker thread runs exactly one fiber at a time. Suspending user
//! code never blocks the OS thread: the fiber yields a [`Switch`] directive
//! to the worker's switch loop, which parks or recycles it and hands the
//! thread to another fiber. A resumed fiber continues at the exact point it
//! suspended, on whichever worker performed the resume.

use corosensei::stack::DefaultStack;
use corosensei::{Coroutine, CoroutineResult, Yielder};
use std::cell::Cell;
use std::ptr;

use crate::token::DependencyToken;

/// Stack size for worker fibers.
const FIBER_STACK_SIZE: usize = 2 * 1024 * 1024;

/// Raw handle to a fiber, used to resume it from another thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct FiberHandle(pub(crate) *mut Fiber);

// SAFETY: a handle is only dereferenced by the single worker that resumes
// the fiber, and only once the fiber has suspended on its previous host.
unsafe impl Send for FiberHandle {}
unsafe impl Sync for FiberHandle {}

/// Input delivered when a worker activates a fiber.
pub(crate) enum FiberInput {
    /// First activation. Carries the fiber's own boxed address so the entry
    /// point can record its yielder.
    Start(FiberHandle),
    /// Reactivation of a fiber that suspended earlier.
    Resume,
}

/// Directive yielded to the hosting worker when a fiber suspends.
pub(crate) enum Switch {
    /// Park this fiber for the resume job that `arming`'s continuation will
    /// enqueue. The worker must release `arming` only after the suspension
    /// completes, then hand the thread to a fresh or recycled fiber.
    Call { arming: DependencyToken },
    /// Recycle this fiber and jump into the suspended fiber behind the
    /// handle.
    Resume(FiberHandle),
}

/// Outcome of running a fiber until it suspends or finishes.
pub(crate) enum FiberState {
    Suspended(Switch),
    Finished,
}

thread_local! {
    static CURRENT_FIBER: Cell<Option<FiberHandle>> = const { Cell::new(None) };
}

/// A stackful execution context. Always boxed: handles and the recorded
/// yielder rely on a stable address.
pub(crate) struct Fiber {
    coroutine: Coroutine<FiberInput, Switch, ()>,
    /// Recorded by the entry point on first activation; valid for the
    /// coroutine's whole life.
    yielder: Cell<*const Yielder<FiberInput, Switch>>,
}

// SAFETY: a fiber is owned by exactly one worker (or one in-flight resume
// job) at a time; the switch protocol never resumes it concurrently.
unsafe impl Send for Fiber {}

impl Fiber {
    /// Creates a fiber that runs `entry` on first activation. Stack
    /// allocation failure is fatal.
    pub(crate) fn with_entry<F>(entry: F) -> Box<Fiber>
    where
        F: FnOnce() + 'static,
    {
        let stack = DefaultStack::new(FIBER_STACK_SIZE).expect("failed to allocate fiber stack");
        let coroutine = Coroutine::with_stack(stack, move |yielder, input: FiberInput| {
            let FiberInput::Start(handle) = input else {
                // Started fibers resume inside `suspend`, never here.
                return;
            };
            // SAFETY: the handle is this fiber's own boxed address, pinned
            // while the coroutine exists.
            unsafe { (*handle.0).yielder.set(yielder as *const _) };
            entry();
        });
        Box::new(Fiber {
            coroutine,
            yielder: Cell::new(ptr::null()),
        })
    }

    pub(crate) fn handle(&mut self) -> FiberHandle {
        FiberHandle(self as *mut Fiber)
    }

    /// Runs the fiber until it suspends or finishes. Panics from the
    /// fiber's code propagate to the hosting worker.
    pub(crate) fn resume(&mut self, input: FiberInput) -> FiberState {
        CURRENT_FIBER.set(Some(self.handle()));
        let result = self.coroutine.resume(input);
        CURRENT_FIBER.set(None);
        match result {
            CoroutineResult::Yield(switch) => FiberState::Suspended(switch),
            CoroutineResult::Return(()) => FiberState::Finished,
        }
    }
}

/// Handle of the fiber running on the current thread, if any.
pub(crate) fn current() -> Option<FiberHandle> {
    CURRENT_FIBER.get()
}

/// Suspends the current fiber, yielding `switch` to the hosting worker.
/// Returns when some worker resumes the fiber again.
pub(crate) fn suspend(switch: Switch) {
    let handle = current().expect("suspend called outside a worker fiber");
    // SAFETY: CURRENT_FIBER is set only while the fiber behind it runs on
    // this thread, and the yielder was recorded at first activation.
    unsafe {
        let yielder = (*handle.0).yielder.get();
        debug_assert!(!yielder.is_null(), "fiber suspended before its entry ran");
        (*yielder).suspend(switch);
    }
}
