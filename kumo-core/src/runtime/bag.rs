//! Concurrent insert-only bags.

use std::sync::Mutex;

use super::{active_threads, current_worker};

/// An unordered container supporting concurrent pushes from any worker.
///
/// Items land in the pushing worker's slot, so pushes are uncontended in the
/// steady state. Iteration order is unspecified.
pub struct Bag<T> {
    slots: Vec<Mutex<Vec<T>>>,
}

impl<T> Bag<T> {
    /// Creates an empty bag sized to the active pool.
    #[must_use]
    pub fn new() -> Self {
        let slots = (0..active_threads().max(1)).map(|_| Mutex::new(Vec::new())).collect();
        Self { slots }
    }

    /// Appends an item to the calling worker's slot.
    pub fn push(&self, item: T) {
        let index = current_worker().min(self.slots.len() - 1);
        self.slots[index].lock().expect("bag slot poisoned").push(item);
    }

    /// Returns the total number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .map(|slot| slot.lock().expect("bag slot poisoned").len())
            .sum()
    }

    /// Returns whether the bag holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots
            .iter()
            .all(|slot| slot.lock().expect("bag slot poisoned").is_empty())
    }

    /// Moves every item out, leaving the bag empty.
    pub fn drain(&mut self) -> Vec<T> {
        let mut items = Vec::new();
        for slot in &mut self.slots {
            items.append(slot.get_mut().expect("bag slot poisoned"));
        }
        items
    }

    /// Consumes the bag, returning its items.
    #[must_use]
    pub fn into_vec(mut self) -> Vec<T> {
        self.drain()
    }
}

impl<T> Default for Bag<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_then_drain_returns_all_items() {
        let mut bag = Bag::new();
        for i in 0..10 {
            bag.push(i);
        }
        let mut items = bag.drain();
        items.sort_unstable();
        assert_eq!(items, (0..10).collect::<Vec<_>>());
        assert!(bag.is_empty());
    }
}
