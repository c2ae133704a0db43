//! # weft: a fiber-based job scheduler
//!
//! A fixed pool of worker threads executes jobs from a pair of queues: a
//! global queue any worker drains and a queue reserved for worker 0 (the
//! "main" worker). The distinctive feature is the synchronous
//! [`call`](JobSystem::call): it waits for a group of jobs **without
//! blocking the worker thread**. The caller's stack is suspended as a
//! fiber, the thread switches to another fiber that keeps draining the
//! queue, and when the last job of the group finishes a dependency token
//! requeues the suspended stack on whichever worker gets there first.
//!
//! ## Components
//!
//! - **Jobs**: type-erased envelopes around closures, built with [`bind`].
//! - **Batch jobs**: a callable over `[start, end)` built with
//!   [`bind_batch`]; the range is split into sections claimed by workers
//!   with an interlocked counter.
//! - **Dependency tokens**: reference-counted latches; the last released
//!   handle fires a continuation. They implement `call`'s completion
//!   tracking and [`push_dependent`](JobSystem::push_dependent) chaining.
//! - **Fibers**: stackful contexts (via `corosensei`) hosted by the worker
//!   threads; suspended call stacks migrate between workers.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use weft::JobSystem;
//!
//! JobSystem::start_sync(4, |sys| {
//!     let hits = Arc::new(AtomicUsize::new(0));
//!     let sink = Arc::clone(&hits);
//!     sys.parallel_for(0, 100, move |_i| {
//!         sink.fetch_add(1, Ordering::Relaxed);
//!     });
//!     // parallel_for is a synchronous call: the range is fully visited.
//!     assert_eq!(hits.load(Ordering::Relaxed), 100);
//! });
//! ```

mod batch;
mod fiber;
mod job;
mod job_system;
mod queue;
mod runnable;
mod token;
mod worker;

pub use job_system::JobSystem;
pub use runnable::{bind, bind_batch, Runnable};
pub use token::DependencyToken;

#[cfg(test)]
mod tests;
