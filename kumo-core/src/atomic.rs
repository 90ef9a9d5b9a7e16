//! Atomic cells for analytics scratch storage.

use std::sync::atomic::{AtomicU64, Ordering};

/// An `f64` cell supporting atomic read-modify-write.
///
/// Backed by the bit pattern in an [`AtomicU64`]; `fetch_add` loops on
/// compare-and-exchange, which is the sanctioned way to update shared
/// floating-point state inside a parallel region.
pub struct AtomicF64 {
    bits: AtomicU64,
}

impl AtomicF64 {
    /// Creates a cell holding `value`.
    #[must_use]
    pub fn new(value: f64) -> Self {
        Self {
            bits: AtomicU64::new(value.to_bits()),
        }
    }

    /// Reads the current value.
    #[must_use]
    pub fn load(&self, order: Ordering) -> f64 {
        f64::from_bits(self.bits.load(order))
    }

    /// Replaces the current value.
    pub fn store(&self, value: f64, order: Ordering) {
        self.bits.store(value.to_bits(), order);
    }

    /// Adds `delta`, returning the previous value.
    pub fn fetch_add(&self, delta: f64, order: Ordering) -> f64 {
        let mut current = self.bits.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + delta).to_bits();
            match self
                .bits
                .compare_exchange_weak(current, next, order, Ordering::Relaxed)
            {
                Ok(prior) => return f64::from_bits(prior),
                Err(actual) => current = actual,
            }
        }
    }

    /// Consumes the cell, returning its value.
    #[must_use]
    pub fn into_inner(self) -> f64 {
        f64::from_bits(self.bits.into_inner())
    }
}

impl Default for AtomicF64 {
    fn default() -> Self {
        Self::new(0.0)
    }
}
