//! Data-parallel `do_all` loops.

use rayon::iter::{IndexedParallelIterator, IntoParallelIterator, ParallelIterator};

use super::pool;

/// Options controlling a [`do_all`] invocation.
///
/// The defaults match the common analytics loop: static block partitioning
/// and a modest chunk size. Irregular loops opt into work stealing.
#[derive(Clone, Copy, Debug)]
pub struct DoAllOptions {
    steal: bool,
    chunk_size: usize,
    name: &'static str,
}

impl Default for DoAllOptions {
    fn default() -> Self {
        Self {
            steal: false,
            chunk_size: 32,
            name: "do_all",
        }
    }
}

impl DoAllOptions {
    /// Creates the default option set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Partitions the range into chunks stolen between workers instead of
    /// static blocks.
    #[must_use]
    pub const fn steal(mut self) -> Self {
        self.steal = true;
        self
    }

    /// Sets the chunk granularity used when stealing.
    #[must_use]
    pub const fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Names the loop for tracing output.
    #[must_use]
    pub const fn name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }
}

/// Applies `body` to every item of `items`, exactly once each, concurrently.
///
/// Order is unspecified. The call returns once every invocation has
/// finished; this implicit barrier is the only suspension point. Errors are
/// surfaced by pairing the body with a [`crate::CombinedError`] reducer.
pub fn do_all<I, F>(items: I, body: F, options: DoAllOptions)
where
    I: IntoParallelIterator + Send,
    I::Iter: IndexedParallelIterator,
    I::Item: Send,
    F: Fn(I::Item) + Send + Sync,
{
    let pool = pool();
    let span = tracing::trace_span!("do_all", name = options.name);
    span.in_scope(|| {
        pool.install(|| {
            let iter = items.into_par_iter();
            let min_len = if options.steal {
                options.chunk_size.max(1)
            } else {
                // Static block partition: one contiguous block per worker.
                iter.len().div_ceil(pool.current_num_threads()).max(1)
            };
            iter.with_min_len(min_len).for_each(&body);
        });
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    #[test]
    fn every_item_is_visited_exactly_once() {
        let visits: Vec<AtomicUsize> = (0..1000).map(|_| AtomicUsize::new(0)).collect();
        do_all(
            0..1000usize,
            |i| {
                visits[i].fetch_add(1, Ordering::Relaxed);
            },
            DoAllOptions::new().steal().chunk_size(16),
        );
        assert!(visits.iter().all(|v| v.load(Ordering::Relaxed) == 1));
    }

    #[test]
    fn static_partition_visits_everything_too() {
        let sum = AtomicU64::new(0);
        do_all(
            1..101u32,
            |i| {
                sum.fetch_add(u64::from(i), Ordering::Relaxed);
            },
            DoAllOptions::new(),
        );
        assert_eq!(sum.load(Ordering::Relaxed), 5050);
    }
}
