//! The envelope around a unit of work: a type-erased payload plus an
//! optional dependency token released when the envelope is destroyed.

use crate::batch::BatchJob;
use crate::token::DependencyToken;
use std::mem;
use std::sync::Arc;

pub(crate) type BoxedRun = Box<dyn FnOnce() + Send>;

/// What a job runs when invoked.
///
/// Owned payloads carry their closure to the heap; borrowed payloads point
/// into the stack frame of a `call` that stays suspended until every
/// borrowing job has been destroyed, so no copy is needed.
pub(crate) enum Payload {
    /// Already run, or never filled. Invoking is a no-op.
    Vacant,
    Owned(BoxedRun),
    /// One section claim against a batch shared with its sibling jobs. The
    /// last sibling dropped frees the batch.
    Batch(Arc<BatchJob>),
    BorrowedSingle(*mut Option<BoxedRun>),
    BorrowedBatch(*const BatchJob),
}

/// A unit of work in flight between submission and execution.
///
/// Padded to a cache line so queue slots touched by different workers do
/// not interfere.
#[repr(align(64))]
pub(crate) struct Job {
    // Declared before `token`: the payload is dropped first, so a fired
    // continuation observes the job's work fully released.
    payload: Payload,
    token: Option<DependencyToken>,
}

// SAFETY: borrowed payload pointers target a call frame that outlives every
// job borrowing from it (the call does not resume until they are all
// destroyed), each `BorrowedSingle` pointer is held by exactly one job, and
// borrowed batches are only reached through `&self` methods. Sync holds as
// well: the payload is only touched through `invoke(&mut self)`, and the
// shared accessors never mutate.
unsafe impl Send for Job {}
unsafe impl Sync for Job {}

impl Job {
    pub(crate) fn new<F>(f: F) -> Job
    where
        F: FnOnce() + Send + 'static,
    {
        Job::from_payload(Payload::Owned(Box::new(f)))
    }

    pub(crate) fn from_payload(payload: Payload) -> Job {
        Job { payload, token: None }
    }

    /// Runs the payload, at most once. Re-invoking is benign: the payload
    /// is gone after the first run.
    pub(crate) fn invoke(&mut self) {
        match mem::replace(&mut self.payload, Payload::Vacant) {
            Payload::Vacant => {}
            Payload::Owned(f) => f(),
            Payload::Batch(batch) => batch.run_section(),
            Payload::BorrowedSingle(slot) => {
                // SAFETY: the slot lives on a suspended call stack and no
                // other job points at it.
                let f = unsafe { (*slot).take() }.expect("borrowed runnable already consumed");
                f();
            }
            Payload::BorrowedBatch(batch) => {
                // SAFETY: the batch lives on a suspended call stack; section
                // claims go through its atomics only.
                unsafe { (*batch).run_section() }
            }
        }
    }

    /// Attaches `token`, releasing any token held before.
    pub(crate) fn set_token(&mut self, token: DependencyToken) {
        self.token = Some(token);
    }

    pub(crate) fn token(&self) -> Option<&DependencyToken> {
        self.token.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn invoke_runs_the_payload_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let sink = hits.clone();
        let mut job = Job::new(move || {
            sink.fetch_add(1, Ordering::SeqCst);
        });

        job.invoke();
        job.invoke(); // vacant now, must not run again
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_releases_the_token() {
        let fired = Arc::new(AtomicUsize::new(0));
        let sink = fired.clone();
        let token = DependencyToken::new(move || {
            sink.fetch_add(1, Ordering::SeqCst);
        });

        let mut first = Job::new(|| {});
        let mut second = Job::new(|| {});
        first.set_token(token.clone());
        second.set_token(token.clone());
        token.open();

        first.invoke();
        drop(first);
        assert_eq!(fired.load(Ordering::SeqCst), 0, "one job still holds the token");

        second.invoke();
        drop(second);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
