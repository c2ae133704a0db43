//! Batch jobs: a callable over a half-open index range, executed once per
//! section by whichever workers claim them.
//!
//! A batch is split into at most `worker_count` sections at submission
//! time. Every envelope emitted for the batch points at the same shared
//! batch object; executing an envelope claims the next section with an
//! interlocked increment and runs the callable on that section's subrange.

use crossbeam::utils::CachePadded;
use std::sync::atomic::{AtomicUsize, Ordering};

pub(crate) type BatchFn = Box<dyn Fn(usize, usize) + Send + Sync>;

pub(crate) struct BatchJob {
    callable: BatchFn,
    start: usize,
    end: usize,
    /// Section count, fixed at submission to `min(end - start, workers)`.
    sections: AtomicUsize,
    /// Next section to claim. Padded so concurrent claims from sibling
    /// envelopes do not contend with the rest of the batch state.
    current: CachePadded<AtomicUsize>,
}

impl BatchJob {
    pub(crate) fn new(callable: BatchFn, start: usize, end: usize) -> BatchJob {
        BatchJob {
            callable,
            start,
            end,
            sections: AtomicUsize::new(0),
            current: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Fixes the section count for a pool of `workers` threads and returns
    /// it. An empty range has zero sections and is never invoked.
    pub(crate) fn prepare(&self, workers: usize) -> usize {
        let span = self.end.saturating_sub(self.start);
        let sections = span.min(workers);
        self.sections.store(sections, Ordering::Relaxed);
        sections
    }

    /// Claims the next section and runs the callable on its subrange.
    ///
    /// Section `k` of `n` covers `[start + span·(k-1)/n, start + span·k/n)`,
    /// so the `n` subranges partition `[start, end)` exactly.
    pub(crate) fn run_section(&self) {
        let sections = self.sections.load(Ordering::Relaxed);
        debug_assert!(sections > 0, "batch executed before submission fixed its sections");
        let span = self.end - self.start;
        let k = self.current.fetch_add(1, Ordering::Relaxed) + 1;
        debug_assert!(k <= sections, "batch executed more often than it has sections");
        let lo = self.start + span * (k - 1) / sections;
        let hi = self.start + span * k / sections;
        (self.callable)(lo, hi);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn collect_sections(start: usize, end: usize, workers: usize) -> Vec<(usize, usize)> {
        let ranges = std::sync::Arc::new(Mutex::new(Vec::new()));
        let sink = ranges.clone();
        let batch = BatchJob::new(
            Box::new(move |lo, hi| sink.lock().unwrap().push((lo, hi))),
            start,
            end,
        );
        let sections = batch.prepare(workers);
        for _ in 0..sections {
            batch.run_section();
        }
        let mut out = ranges.lock().unwrap().clone();
        out.sort_unstable();
        out
    }

    #[test]
    fn sections_partition_the_range() {
        for &(start, end, workers) in &[(0, 10, 4), (0, 100, 8), (3, 17, 5), (0, 7, 16), (5, 6, 4)] {
            let ranges = collect_sections(start, end, workers);
            assert_eq!(ranges.len(), (end - start).min(workers));
            // Contiguous, non-overlapping, covering [start, end).
            let mut cursor = start;
            for (lo, hi) in ranges {
                assert_eq!(lo, cursor);
                assert!(hi > lo);
                cursor = hi;
            }
            assert_eq!(cursor, end);
        }
    }

    #[test]
    fn more_workers_than_items_caps_sections() {
        let batch = BatchJob::new(Box::new(|_, _| {}), 0, 3);
        assert_eq!(batch.prepare(8), 3);
    }

    #[test]
    fn empty_range_has_no_sections() {
        let batch = BatchJob::new(Box::new(|_, _| panic!("must not run")), 5, 5);
        assert_eq!(batch.prepare(4), 0);
        let inverted = BatchJob::new(Box::new(|_, _| panic!("must not run")), 9, 2);
        assert_eq!(inverted.prepare(4), 0);
    }
}
