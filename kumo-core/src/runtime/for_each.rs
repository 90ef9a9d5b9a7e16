//! Data-driven `for_each` loops.

use std::sync::atomic::{AtomicUsize, Ordering};

use super::{Worklist, pool};

/// The per-invocation context handed to a `for_each` operator.
///
/// The only capability it grants is [`UserContext::push`], enqueuing more
/// work into the loop's worklist.
pub struct UserContext<'a, T, W: Worklist<T>> {
    worklist: &'a W,
    pending: &'a AtomicUsize,
    worker: usize,
    _items: std::marker::PhantomData<fn(T)>,
}

impl<T, W: Worklist<T>> UserContext<'_, T, W> {
    /// Enqueues `item` for a later operator invocation in this loop.
    pub fn push(&self, item: T) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.worklist.push(self.worker, item);
    }
}

/// Runs `body` on every item of `init` and on every item pushed by `body`
/// itself, until the worklist is globally empty.
///
/// Each initial element becomes one work item. Termination is detected with
/// a distributed pending-items counter: a worker retires only when it sees
/// no work and no item is in flight anywhere. Ordering between items is
/// whatever `worklist` provides.
pub fn for_each<T, W, I, F>(init: I, worklist: &W, body: F)
where
    T: Send,
    W: Worklist<T>,
    I: IntoIterator<Item = T>,
    F: Fn(T, &UserContext<'_, T, W>) + Sync,
{
    let pending = AtomicUsize::new(0);
    for item in init {
        pending.fetch_add(1, Ordering::SeqCst);
        worklist.push(0, item);
    }
    if pending.load(Ordering::SeqCst) == 0 {
        return;
    }

    let pool = pool();
    let span = tracing::trace_span!("for_each");
    span.in_scope(|| {
        pool.broadcast(|broadcast| {
            let worker = broadcast.index();
            let ctx = UserContext {
                worklist,
                pending: &pending,
                worker,
                _items: std::marker::PhantomData,
            };
            let mut idle_rounds = 0u32;
            loop {
                if let Some(item) = worklist.pop(worker) {
                    idle_rounds = 0;
                    body(item, &ctx);
                    pending.fetch_sub(1, Ordering::SeqCst);
                } else {
                    if pending.load(Ordering::SeqCst) == 0 {
                        break;
                    }
                    // Work is in flight on another worker; probe again after
                    // a short pause.
                    idle_rounds = idle_rounds.saturating_add(1);
                    if idle_rounds < 64 {
                        std::hint::spin_loop();
                    } else {
                        std::thread::yield_now();
                    }
                }
            }
        });
    });
}

#[cfg(test)]
mod tests {
    use super::super::{BulkSynchronous, ChunkedFifo, ChunkedLifo};
    use super::*;
    use std::sync::atomic::AtomicU64;

    #[test]
    fn processes_initial_and_pushed_items() {
        // Count down from each seed; every push adds one more invocation.
        let wl = ChunkedFifo::new(16);
        let invocations = AtomicU64::new(0);
        for_each([4u32, 2, 1], &wl, |item, ctx| {
            invocations.fetch_add(1, Ordering::Relaxed);
            if item > 0 {
                ctx.push(item - 1);
            }
        });
        // 4->0, 2->0 and 1->0 chains: (4+1) + (2+1) + (1+1) invocations.
        assert_eq!(invocations.load(Ordering::Relaxed), 10);
    }

    #[test]
    fn lifo_worklist_drains_completely() {
        let wl = ChunkedLifo::new(4);
        let sum = AtomicU64::new(0);
        for_each(0..100u64, &wl, |item, _| {
            sum.fetch_add(item, Ordering::Relaxed);
        });
        assert_eq!(sum.load(Ordering::Relaxed), 4950);
    }

    #[test]
    fn bulk_synchronous_round_trip_terminates() {
        let wl = BulkSynchronous::new();
        let generations = AtomicU64::new(0);
        for_each([3u32], &wl, |item, ctx| {
            generations.fetch_add(1, Ordering::Relaxed);
            if item > 0 {
                ctx.push(item - 1);
            }
        });
        assert_eq!(generations.load(Ordering::Relaxed), 4);
    }

    #[test]
    fn empty_initial_range_returns_immediately() {
        let wl = ChunkedFifo::new(4);
        for_each(std::iter::empty::<u32>(), &wl, |_, _| {});
    }
}
