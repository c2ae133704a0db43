//! Dependency tokens: reference-counted latches that run a continuation
//! when the last handle is released.

use crate::job::Job;
use std::sync::Arc;

/// Shared handle to a continuation that runs once every handle is gone.
///
/// Each job in a tracked group owns a clone of the token; when the last
/// clone is dropped (on whichever thread that happens) the continuation is
/// invoked exactly once and then destroyed. The synchronous `call`
/// protocol uses a token whose continuation requeues the suspended caller.
#[derive(Clone)]
pub struct DependencyToken {
    shared: Arc<SharedToken>,
}

struct SharedToken {
    continuation: Job,
}

impl DependencyToken {
    /// Wraps `continuation` in a token. It runs when the last handle (this
    /// one included) is released.
    pub fn new<F>(continuation: F) -> DependencyToken
    where
        F: FnOnce() + Send + 'static,
    {
        DependencyToken::from_job(Job::new(continuation))
    }

    pub(crate) fn from_job(continuation: Job) -> DependencyToken {
        DependencyToken {
            shared: Arc::new(SharedToken { continuation }),
        }
    }

    /// Releases this handle, firing the continuation if it was the last.
    pub fn open(self) {}
}

impl Drop for SharedToken {
    fn drop(&mut self) {
        self.continuation.invoke();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn fires_after_the_last_handle() {
        let fired = Arc::new(AtomicUsize::new(0));
        let sink = fired.clone();
        let token = DependencyToken::new(move || {
            sink.fetch_add(1, Ordering::SeqCst);
        });

        let clones: Vec<_> = (0..4).map(|_| token.clone()).collect();
        token.open();
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        for clone in clones {
            clone.open();
        }
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn fires_exactly_once_across_threads() {
        let fired = Arc::new(AtomicUsize::new(0));
        let sink = fired.clone();
        let token = DependencyToken::new(move || {
            sink.fetch_add(1, Ordering::SeqCst);
        });

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let clone = token.clone();
                thread::spawn(move || clone.open())
            })
            .collect();
        token.open();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn continuation_may_release_its_own_token() {
        // A continuation that itself holds a token, as when chained work is
        // tracked by an enclosing call.
        let fired = Arc::new(AtomicUsize::new(0));
        let sink = fired.clone();
        let outer = DependencyToken::new(move || {
            sink.fetch_add(1, Ordering::SeqCst);
        });

        let mut continuation = Job::new(|| {});
        continuation.set_token(outer.clone());
        let inner = DependencyToken::from_job(continuation);
        outer.open();

        assert_eq!(fired.load(Ordering::SeqCst), 0);
        inner.open();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
