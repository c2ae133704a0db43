//! Runnable values accepted by the push and call front-ends.

use crate::batch::BatchJob;
use crate::job::BoxedRun;

/// A bound unit of work, ready for submission.
///
/// Produced by [`bind`] and [`bind_batch`], consumed by the `push` and
/// `call` families on [`JobSystem`](crate::JobSystem). Groups of runnables
/// are submitted together as anything iterable:
///
/// ```no_run
/// use weft::{bind, bind_batch, JobSystem};
///
/// JobSystem::start_sync(4, |sys| {
///     sys.call([
///         bind(|| println!("standalone")),
///         bind_batch(|lo, hi| println!("section [{lo}, {hi})"), 0, 100),
///     ]);
/// });
/// ```
pub struct Runnable {
    pub(crate) kind: Kind,
}

pub(crate) enum Kind {
    /// A plain callable. The `Option` lets a borrowing submission take the
    /// closure out in place.
    Single(Option<BoxedRun>),
    Batch(BatchJob),
}

/// Binds a callable into a [`Runnable`]. Arguments are captured by the
/// closure itself:
///
/// ```
/// let name = String::from("weft");
/// let runnable = weft::bind(move || drop(name));
/// ```
pub fn bind<F>(f: F) -> Runnable
where
    F: FnOnce() + Send + 'static,
{
    Runnable {
        kind: Kind::Single(Some(Box::new(f))),
    }
}

/// Binds a callable over the half-open range `[start, end)` into a batch
/// [`Runnable`].
///
/// At submission the range is split into at most `worker_count` sections;
/// the callable is invoked once per section with that section's subrange
/// and must therefore be callable repeatedly. Extra arguments are captured
/// by the closure, as with [`bind`]. An empty range is never invoked.
pub fn bind_batch<F>(f: F, start: usize, end: usize) -> Runnable
where
    F: Fn(usize, usize) + Send + Sync + 'static,
{
    Runnable {
        kind: Kind::Batch(BatchJob::new(Box::new(f), start, end)),
    }
}
