//! Shared-memory execution substrate.
//!
//! A single fixed-size worker pool backs every parallel region. The pool is
//! sized once via [`set_active_threads`] (clamped to the host parallelism,
//! minimum one) and no parallel call spawns threads of its own. Worker ids
//! are dense in `0..active_threads()` and index per-thread storage slots.

mod bag;
mod deterministic;
mod do_all;
mod for_each;
mod per_thread;
mod worklist;

use std::sync::{Arc, OnceLock, RwLock};

use rayon::{ThreadPool, ThreadPoolBuilder};

pub use self::{
    bag::Bag,
    deterministic::{DeterministicContext, for_each_deterministic},
    do_all::{DoAllOptions, do_all},
    for_each::{UserContext, for_each},
    per_thread::PerThreadStorage,
    worklist::{BulkSynchronous, ChunkedFifo, ChunkedLifo, OrderedByIntegerMetric, Worklist},
};

static POOL: OnceLock<RwLock<Arc<ThreadPool>>> = OnceLock::new();

fn max_usable_threads() -> usize {
    std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

fn build_pool(num_threads: usize) -> Option<Arc<ThreadPool>> {
    ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .thread_name(|index| format!("kumo-worker-{index}"))
        .build()
        .map(Arc::new)
        .map_err(|error| {
            tracing::warn!(%error, num_threads, "failed to build worker pool");
            error
        })
        .ok()
}

fn pool_slot() -> &'static RwLock<Arc<ThreadPool>> {
    POOL.get_or_init(|| {
        let pool = build_pool(max_usable_threads())
            .or_else(|| build_pool(1))
            .expect("a single-threaded worker pool can always be built");
        RwLock::new(pool)
    })
}

pub(crate) fn pool() -> Arc<ThreadPool> {
    Arc::clone(&pool_slot().read().expect("worker pool lock poisoned"))
}

/// Sets the number of worker threads used by subsequent parallel regions.
///
/// The request is clamped to the host's usable parallelism and to a minimum
/// of one. Returns the count actually in effect. Calling this while a
/// parallel region is in flight on another thread does not affect that
/// region; it drains on the pool it started with.
pub fn set_active_threads(requested: usize) -> usize {
    let num = requested.clamp(1, max_usable_threads());
    let mut slot = pool_slot().write().expect("worker pool lock poisoned");
    if slot.current_num_threads() != num {
        if let Some(pool) = build_pool(num) {
            *slot = pool;
        }
    }
    slot.current_num_threads()
}

/// Returns the number of workers in the active pool.
#[must_use]
pub fn active_threads() -> usize {
    pool().current_num_threads()
}

/// Returns the dense id of the calling worker, or 0 outside a parallel
/// region.
#[must_use]
pub fn current_worker() -> usize {
    rayon::current_thread_index().unwrap_or(0)
}

/// Runs `body` exactly once on every worker of the pool.
///
/// `body` receives `(worker_id, num_workers)`. Returns once every worker has
/// finished.
pub fn on_each(body: impl Fn(usize, usize) + Sync) {
    let pool = pool();
    let workers = pool.current_num_threads();
    pool.broadcast(|ctx| body(ctx.index(), workers));
}

/// A reusable rendezvous point for the workers of one parallel phase.
///
/// Each call to [`PhaseBarrier::wait`] blocks until `parties` workers have
/// arrived, then releases them all and resets for the next phase.
pub struct PhaseBarrier {
    inner: std::sync::Barrier,
}

impl PhaseBarrier {
    /// Creates a barrier for `parties` workers.
    #[must_use]
    pub fn new(parties: usize) -> Self {
        Self {
            inner: std::sync::Barrier::new(parties),
        }
    }

    /// Blocks the calling worker until every party has called `wait`.
    pub fn wait(&self) {
        self.inner.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn set_active_threads_clamps_to_minimum_one() {
        assert!(set_active_threads(0) >= 1);
    }

    #[test]
    fn set_active_threads_clamps_to_host_parallelism() {
        let granted = set_active_threads(1 << 20);
        assert!(granted <= max_usable_threads());
    }

    #[test]
    fn on_each_visits_every_worker_once() {
        let visits = AtomicUsize::new(0);
        let reported = AtomicUsize::new(0);
        on_each(|worker, workers| {
            assert!(worker < workers);
            reported.store(workers, Ordering::Relaxed);
            visits.fetch_add(1, Ordering::Relaxed);
        });
        assert_eq!(visits.load(Ordering::Relaxed), reported.load(Ordering::Relaxed));
    }

    #[test]
    fn phase_barrier_releases_all_parties() {
        let barrier = PhaseBarrier::new(2);
        let arrived = AtomicUsize::new(0);
        std::thread::scope(|scope| {
            for _ in 0..2 {
                scope.spawn(|| {
                    arrived.fetch_add(1, Ordering::SeqCst);
                    barrier.wait();
                    // Every party observes the full count after the rendezvous.
                    assert_eq!(arrived.load(Ordering::SeqCst), 2);
                });
            }
        });
    }
}
