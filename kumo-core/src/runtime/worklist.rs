//! Worklists backing data-driven `for_each` loops.
//!
//! A worklist is a concurrent multiset of work items with per-worker entry
//! points. The chunked queues cache items in the pushing worker's chunk and
//! steal whole chunks at a time; the ordered worklist is a *soft* priority
//! queue over integer buckets; the bulk-synchronous worklist defers pushed
//! items to the next round.

use std::{
    collections::{BTreeMap, VecDeque},
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use dashmap::DashMap;

use super::active_threads;

/// Default number of items per chunk, the unit of stealing and caching.
pub const DEFAULT_CHUNK_SIZE: usize = 64;

/// A concurrent multiset of work items consumed by `for_each`.
pub trait Worklist<T>: Sync {
    /// Enqueues an item on behalf of `worker`.
    fn push(&self, worker: usize, item: T);

    /// Dequeues an item on behalf of `worker`, or `None` when the worker
    /// cannot currently see any work. Items held by other workers'
    /// in-flight operations do not count as visible.
    fn pop(&self, worker: usize) -> Option<T>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Discipline {
    Fifo,
    Lifo,
}

struct ChunkLocal<T> {
    fill: Vec<T>,
    current: VecDeque<T>,
}

/// Shared state of the chunked queues.
struct ChunkedQueue<T> {
    discipline: Discipline,
    chunk_size: usize,
    global: Mutex<VecDeque<Vec<T>>>,
    locals: Vec<Mutex<ChunkLocal<T>>>,
}

impl<T> ChunkedQueue<T> {
    fn new(discipline: Discipline, chunk_size: usize) -> Self {
        let workers = active_threads().max(1);
        Self {
            discipline,
            chunk_size: chunk_size.max(1),
            global: Mutex::new(VecDeque::new()),
            locals: (0..workers)
                .map(|_| {
                    Mutex::new(ChunkLocal {
                        fill: Vec::new(),
                        current: VecDeque::new(),
                    })
                })
                .collect(),
        }
    }

    fn local(&self, worker: usize) -> &Mutex<ChunkLocal<T>> {
        &self.locals[worker.min(self.locals.len() - 1)]
    }

    fn push(&self, worker: usize, item: T) {
        let mut local = self.local(worker).lock().expect("worklist lock poisoned");
        local.fill.push(item);
        if local.fill.len() >= self.chunk_size {
            let chunk = std::mem::take(&mut local.fill);
            drop(local);
            self.global
                .lock()
                .expect("worklist lock poisoned")
                .push_back(chunk);
        }
    }

    fn take_from_chunk(&self, current: &mut VecDeque<T>) -> Option<T> {
        match self.discipline {
            Discipline::Fifo => current.pop_front(),
            Discipline::Lifo => current.pop_back(),
        }
    }

    fn pop(&self, worker: usize) -> Option<T> {
        {
            let mut local = self.local(worker).lock().expect("worklist lock poisoned");
            if let Some(item) = self.take_from_chunk(&mut local.current) {
                return Some(item);
            }
            // Refill from the shared pool one chunk at a time, falling back
            // to the worker's own fill chunk.
            let refill = {
                let mut global = self.global.lock().expect("worklist lock poisoned");
                match self.discipline {
                    Discipline::Fifo => global.pop_front(),
                    Discipline::Lifo => global.pop_back(),
                }
            };
            if let Some(chunk) = refill {
                local.current = chunk.into();
                if let Some(item) = self.take_from_chunk(&mut local.current) {
                    return Some(item);
                }
            }
            if !local.fill.is_empty() {
                local.current = std::mem::take(&mut local.fill).into();
                if let Some(item) = self.take_from_chunk(&mut local.current) {
                    return Some(item);
                }
            }
        }
        self.steal(worker)
    }

    /// Steals one victim chunk. Victims are tried in worker order; `try_lock`
    /// keeps thieves from serialising behind a busy owner.
    fn steal(&self, worker: usize) -> Option<T> {
        let workers = self.locals.len();
        for offset in 1..workers {
            let victim = (worker + offset) % workers;
            let Ok(mut remote) = self.locals[victim].try_lock() else {
                continue;
            };
            let stolen = if remote.current.is_empty() {
                std::mem::take(&mut remote.fill).into()
            } else {
                std::mem::take(&mut remote.current)
            };
            drop(remote);
            if stolen.is_empty() {
                continue;
            }
            let mut chunk = stolen;
            let item = self.take_from_chunk(&mut chunk);
            if !chunk.is_empty() {
                let mut local = self.local(worker).lock().expect("worklist lock poisoned");
                local.current = chunk;
            }
            return item;
        }
        None
    }
}

/// Chunked worklist with FIFO order inside each worker's own chunk.
pub struct ChunkedFifo<T> {
    queue: ChunkedQueue<T>,
}

impl<T> ChunkedFifo<T> {
    /// Creates an empty worklist with the given chunk size.
    #[must_use]
    pub fn new(chunk_size: usize) -> Self {
        Self {
            queue: ChunkedQueue::new(Discipline::Fifo, chunk_size),
        }
    }
}

impl<T> Default for ChunkedFifo<T> {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl<T: Send> Worklist<T> for ChunkedFifo<T> {
    fn push(&self, worker: usize, item: T) {
        self.queue.push(worker, item);
    }

    fn pop(&self, worker: usize) -> Option<T> {
        self.queue.pop(worker)
    }
}

/// Chunked worklist with LIFO order inside each worker's own chunk.
pub struct ChunkedLifo<T> {
    queue: ChunkedQueue<T>,
}

impl<T> ChunkedLifo<T> {
    /// Creates an empty worklist with the given chunk size.
    #[must_use]
    pub fn new(chunk_size: usize) -> Self {
        Self {
            queue: ChunkedQueue::new(Discipline::Lifo, chunk_size),
        }
    }
}

impl<T> Default for ChunkedLifo<T> {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl<T: Send> Worklist<T> for ChunkedLifo<T> {
    fn push(&self, worker: usize, item: T) {
        self.queue.push(worker, item);
    }

    fn pop(&self, worker: usize) -> Option<T> {
        self.queue.pop(worker)
    }
}

struct ObimLocal<T> {
    /// Partially filled chunks, keyed by bucket.
    fills: BTreeMap<usize, Vec<T>>,
    /// The chunk currently being drained and its bucket.
    in_hand: VecDeque<T>,
    in_hand_bucket: usize,
}

/// An ordered-by-integer-metric worklist: a soft priority queue.
///
/// Items are hashed into integer buckets by the indexer; workers drain the
/// lowest bucket they can see. The global minimum is advanced by periodic
/// scans, so a worker may briefly process an item from a higher bucket while
/// a lower one sits in another worker's cache. This is deliberate: a strict
/// concurrent heap costs more than the stale work it avoids.
pub struct OrderedByIntegerMetric<T, I> {
    indexer: I,
    chunk_size: usize,
    buckets: DashMap<usize, VecDeque<Vec<T>>>,
    min_hint: AtomicUsize,
    locals: Vec<Mutex<ObimLocal<T>>>,
}

impl<T, I: Fn(&T) -> usize> OrderedByIntegerMetric<T, I> {
    /// Creates an empty worklist with the given bucket indexer.
    #[must_use]
    pub fn new(indexer: I) -> Self {
        Self::with_chunk_size(indexer, DEFAULT_CHUNK_SIZE)
    }

    /// Creates an empty worklist with an explicit chunk size.
    #[must_use]
    pub fn with_chunk_size(indexer: I, chunk_size: usize) -> Self {
        let workers = active_threads().max(1);
        Self {
            indexer,
            chunk_size: chunk_size.max(1),
            buckets: DashMap::new(),
            min_hint: AtomicUsize::new(usize::MAX),
            locals: (0..workers)
                .map(|_| {
                    Mutex::new(ObimLocal {
                        fills: BTreeMap::new(),
                        in_hand: VecDeque::new(),
                        in_hand_bucket: usize::MAX,
                    })
                })
                .collect(),
        }
    }

    fn local(&self, worker: usize) -> &Mutex<ObimLocal<T>> {
        &self.locals[worker.min(self.locals.len() - 1)]
    }

    fn publish_chunk(&self, bucket: usize, chunk: Vec<T>) {
        if chunk.is_empty() {
            return;
        }
        self.buckets.entry(bucket).or_default().push_back(chunk);
        self.min_hint.fetch_min(bucket, Ordering::Relaxed);
    }

    /// Scans the shared buckets for the lowest non-empty one and refreshes
    /// the hint.
    fn lowest_shared_bucket(&self) -> Option<usize> {
        let mut lowest = None;
        for entry in &self.buckets {
            if !entry.value().is_empty() {
                let bucket = *entry.key();
                lowest = Some(lowest.map_or(bucket, |low: usize| low.min(bucket)));
            }
        }
        self.min_hint
            .store(lowest.unwrap_or(usize::MAX), Ordering::Relaxed);
        lowest
    }

    fn take_shared_chunk(&self, bucket: usize) -> Option<Vec<T>> {
        self.buckets
            .get_mut(&bucket)
            .and_then(|mut chunks| chunks.pop_front())
    }
}

impl<T: Send + Sync, I: Fn(&T) -> usize + Sync> Worklist<T> for OrderedByIntegerMetric<T, I> {
    fn push(&self, worker: usize, item: T) {
        let bucket = (self.indexer)(&item);
        let chunk = {
            let mut local = self.local(worker).lock().expect("worklist lock poisoned");
            let fill = local.fills.entry(bucket).or_default();
            fill.push(item);
            if fill.len() >= self.chunk_size {
                Some(std::mem::take(fill))
            } else {
                None
            }
        };
        if let Some(chunk) = chunk {
            self.publish_chunk(bucket, chunk);
        }
        self.min_hint.fetch_min(bucket, Ordering::Relaxed);
    }

    fn pop(&self, worker: usize) -> Option<T> {
        loop {
            let mut local = self.local(worker).lock().expect("worklist lock poisoned");

            let own_fill = local
                .fills
                .iter()
                .find(|(_, chunk)| !chunk.is_empty())
                .map(|(&bucket, _)| bucket);
            let in_hand = (!local.in_hand.is_empty()).then_some(local.in_hand_bucket);
            // Scan the shared directory only when the hint suggests lower
            // work elsewhere or this worker has nothing in hand.
            let hint = self.min_hint.load(Ordering::Relaxed);
            let shared = if in_hand.is_none_or(|bucket| hint < bucket) {
                self.lowest_shared_bucket()
            } else {
                None
            };

            let best = [own_fill, in_hand, shared].into_iter().flatten().min()?;

            if in_hand == Some(best) {
                return local.in_hand.pop_front();
            }

            // Park the chunk in hand; a strictly lower bucket takes over.
            if !local.in_hand.is_empty() {
                let parked: Vec<T> = std::mem::take(&mut local.in_hand).into();
                let parked_bucket = local.in_hand_bucket;
                drop(local);
                self.publish_chunk(parked_bucket, parked);
                continue;
            }

            if own_fill == Some(best) {
                let chunk = local.fills.get_mut(&best).map(std::mem::take).unwrap_or_default();
                local.in_hand = chunk.into();
                local.in_hand_bucket = best;
                return local.in_hand.pop_front();
            }

            drop(local);
            if let Some(chunk) = self.take_shared_chunk(best) {
                let mut local = self.local(worker).lock().expect("worklist lock poisoned");
                local.in_hand = chunk.into();
                local.in_hand_bucket = best;
                if let Some(item) = local.in_hand.pop_front() {
                    return Some(item);
                }
            }
            // Lost the race for that bucket; rescan.
        }
    }
}

/// A two-bucket round worklist: pops drain the current round, pushes land in
/// the next one. The buckets swap when the current round empties, so an item
/// pushed during round `r` executes no earlier than round `r + 1`.
pub struct BulkSynchronous<T> {
    sides: [Mutex<VecDeque<T>>; 2],
    counts: [AtomicUsize; 2],
    round: AtomicUsize,
}

impl<T> BulkSynchronous<T> {
    /// Creates an empty worklist positioned at round zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sides: [Mutex::new(VecDeque::new()), Mutex::new(VecDeque::new())],
            counts: [AtomicUsize::new(0), AtomicUsize::new(0)],
            round: AtomicUsize::new(0),
        }
    }

    /// Returns the current round number.
    #[must_use]
    pub fn round(&self) -> usize {
        self.round.load(Ordering::Acquire)
    }
}

impl<T> Default for BulkSynchronous<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> Worklist<T> for BulkSynchronous<T> {
    fn push(&self, _worker: usize, item: T) {
        let next = (self.round.load(Ordering::Acquire) + 1) % 2;
        self.sides[next].lock().expect("worklist lock poisoned").push_back(item);
        self.counts[next].fetch_add(1, Ordering::AcqRel);
    }

    fn pop(&self, _worker: usize) -> Option<T> {
        loop {
            let round = self.round.load(Ordering::Acquire);
            let side = round % 2;
            if self.counts[side].load(Ordering::Acquire) > 0 {
                let item = self.sides[side].lock().expect("worklist lock poisoned").pop_front();
                if let Some(item) = item {
                    self.counts[side].fetch_sub(1, Ordering::AcqRel);
                    return Some(item);
                }
                // A pusher has bumped the count but not yet stored the item.
                std::hint::spin_loop();
                continue;
            }
            if self.counts[(side + 1) % 2].load(Ordering::Acquire) > 0 {
                // Current round drained: elect one worker to swap.
                let _ = self.round.compare_exchange(
                    round,
                    round + 1,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                continue;
            }
            return None;
        }
    }
}
