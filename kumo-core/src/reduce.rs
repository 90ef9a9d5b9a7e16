//! Combining accumulators with per-worker slots.
//!
//! A reducer accepts concurrent `update` calls, each folding into the
//! calling worker's private slot, and a single-threaded `reduce` that
//! combines every slot with the operation's identity. Calling `reduce` or
//! `reset` concurrently with `update` violates the contract.

use crate::{
    error::{CopyableError, Error},
    runtime::PerThreadStorage,
};

/// A combining operation with an identity element.
pub trait Combine<T>: Send + Sync {
    /// Returns the identity of the operation.
    fn identity(&self) -> T;

    /// Folds `value` into `acc`.
    fn combine(&self, acc: &mut T, value: T);
}

/// A reducer: per-worker slots plus a combine operation.
///
/// Reducers are movable but deliberately not clonable; a copy would fork the
/// accumulated state.
pub struct Reducible<T, C: Combine<T>> {
    slots: PerThreadStorage<T>,
    op: C,
}

impl<T: Send, C: Combine<T>> Reducible<T, C> {
    /// Creates a reducer whose slots start at the operation's identity.
    #[must_use]
    pub fn with_op(op: C) -> Self {
        let slots = PerThreadStorage::from_fn(|| op.identity());
        Self { slots, op }
    }

    /// Folds `value` into the calling worker's slot.
    pub fn update(&self, value: T) {
        self.slots.with_local(|acc| self.op.combine(acc, value));
    }

    /// Combines every slot with the identity. Slots are preserved, so
    /// calling `reduce` twice without intervening updates yields the same
    /// value. Single-thread safe only.
    pub fn reduce(&self) -> T
    where
        T: Clone,
    {
        let mut acc = self.op.identity();
        for index in 0..self.slots.len() {
            let value = self.slots.with_slot(index, |slot| slot.clone());
            self.op.combine(&mut acc, value);
        }
        acc
    }

    /// Resets every slot to the identity. Single-thread safe only.
    pub fn reset(&self) {
        for index in 0..self.slots.len() {
            self.slots.with_slot(index, |slot| *slot = self.op.identity());
        }
    }
}

/// Addition with identity zero.
pub struct SumOp;

impl<T> Combine<T> for SumOp
where
    T: Copy + Default + std::ops::Add<Output = T>,
{
    fn identity(&self) -> T {
        T::default()
    }

    fn combine(&self, acc: &mut T, value: T) {
        *acc = *acc + value;
    }
}

/// Values with distinguished minimum and maximum identities.
pub trait BoundedValue {
    /// The smallest representable value (identity for max-reduction).
    const MIN_VALUE: Self;
    /// The largest representable value (identity for min-reduction).
    const MAX_VALUE: Self;
}

macro_rules! impl_bounded_int {
    ($($t:ty),*) => {
        $(impl BoundedValue for $t {
            const MIN_VALUE: Self = <$t>::MIN;
            const MAX_VALUE: Self = <$t>::MAX;
        })*
    };
}

impl_bounded_int!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize);

impl BoundedValue for f32 {
    const MIN_VALUE: Self = f32::NEG_INFINITY;
    const MAX_VALUE: Self = f32::INFINITY;
}

impl BoundedValue for f64 {
    const MIN_VALUE: Self = f64::NEG_INFINITY;
    const MAX_VALUE: Self = f64::INFINITY;
}

/// Maximum with identity `-inf`.
pub struct MaxOp;

impl<T> Combine<T> for MaxOp
where
    T: Copy + PartialOrd + BoundedValue,
{
    fn identity(&self) -> T {
        T::MIN_VALUE
    }

    fn combine(&self, acc: &mut T, value: T) {
        if value > *acc {
            *acc = value;
        }
    }
}

/// Minimum with identity `+inf`.
pub struct MinOp;

impl<T> Combine<T> for MinOp
where
    T: Copy + PartialOrd + BoundedValue,
{
    fn identity(&self) -> T {
        T::MAX_VALUE
    }

    fn combine(&self, acc: &mut T, value: T) {
        if value < *acc {
            *acc = value;
        }
    }
}

/// Logical or with identity `false`.
pub struct OrOp;

impl Combine<bool> for OrOp {
    fn identity(&self) -> bool {
        false
    }

    fn combine(&self, acc: &mut bool, value: bool) {
        *acc = *acc || value;
    }
}

/// Logical and with identity `true`.
pub struct AndOp;

impl Combine<bool> for AndOp {
    fn identity(&self) -> bool {
        true
    }

    fn combine(&self, acc: &mut bool, value: bool) {
        *acc = *acc && value;
    }
}

/// Sum reducer.
pub type Accumulator<T> = Reducible<T, SumOp>;

impl<T: Send + Copy + Default + std::ops::Add<Output = T>> Accumulator<T> {
    /// Creates a sum reducer starting at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::with_op(SumOp)
    }
}

impl<T: Send + Copy + Default + std::ops::Add<Output = T>> Default for Accumulator<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Maximum reducer.
pub type ReduceMax<T> = Reducible<T, MaxOp>;

impl<T: Send + Copy + PartialOrd + BoundedValue> ReduceMax<T> {
    /// Creates a max reducer starting at the smallest value.
    #[must_use]
    pub fn new() -> Self {
        Self::with_op(MaxOp)
    }
}

/// Minimum reducer.
pub type ReduceMin<T> = Reducible<T, MinOp>;

impl<T: Send + Copy + PartialOrd + BoundedValue> ReduceMin<T> {
    /// Creates a min reducer starting at the largest value.
    #[must_use]
    pub fn new() -> Self {
        Self::with_op(MinOp)
    }
}

/// Logical-or reducer.
pub type ReduceLogicalOr = Reducible<bool, OrOp>;

impl ReduceLogicalOr {
    /// Creates an or-reducer starting at `false`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_op(OrOp)
    }
}

/// Logical-and reducer.
pub type ReduceLogicalAnd = Reducible<bool, AndOp>;

impl ReduceLogicalAnd {
    /// Creates an and-reducer starting at `true`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_op(AndOp)
    }
}

/// Keeps the first reported value.
pub struct FirstOp;

impl<T: Send> Combine<Option<T>> for FirstOp {
    fn identity(&self) -> Option<T> {
        None
    }

    fn combine(&self, acc: &mut Option<T>, value: Option<T>) {
        if acc.is_none() {
            *acc = value;
        }
    }
}

/// Collects errors raised inside a parallel region.
///
/// Workers call [`CombinedError::update`]; after the region a single thread
/// calls [`CombinedError::check`] and receives one representative error (the
/// first each slot saw, combined in slot order).
pub struct CombinedError {
    inner: Reducible<Option<CopyableError>, FirstOp>,
}

impl CombinedError {
    /// Creates an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Reducible::with_op(FirstOp),
        }
    }

    /// Records an error from the calling worker.
    pub fn update(&self, error: impl Into<CopyableError>) {
        self.inner.update(Some(error.into()));
    }

    /// Returns `Err` with the representative error if any worker reported
    /// one. Single-thread safe only.
    pub fn check(&self) -> crate::Result<()> {
        match self.inner.reduce() {
            Some(snapshot) => Err(Error::from(snapshot)),
            None => Ok(()),
        }
    }
}

impl Default for CombinedError {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::runtime::{DoAllOptions, do_all};
    use proptest::prelude::*;

    #[test]
    fn accumulator_sums_concurrent_updates() {
        let sum = Accumulator::<u64>::new();
        do_all(
            1..1001u32,
            |i| sum.update(u64::from(i)),
            DoAllOptions::new().steal().chunk_size(16),
        );
        assert_eq!(sum.reduce(), 500_500);
    }

    #[test]
    fn reduce_preserves_slots() {
        let sum = Accumulator::<u32>::new();
        sum.update(5);
        assert_eq!(sum.reduce(), 5);
        assert_eq!(sum.reduce(), 5);
        sum.reset();
        assert_eq!(sum.reduce(), 0);
    }

    #[test]
    fn min_max_track_extremes() {
        let max = ReduceMax::<i64>::new();
        let min = ReduceMin::<i64>::new();
        for value in [3, -7, 12, 0] {
            max.update(value);
            min.update(value);
        }
        assert_eq!(max.reduce(), 12);
        assert_eq!(min.reduce(), -7);
    }

    #[test]
    fn logical_reducers_use_proper_identities() {
        let any = ReduceLogicalOr::new();
        let all = ReduceLogicalAnd::new();
        assert!(!any.reduce());
        assert!(all.reduce());
        any.update(true);
        all.update(false);
        assert!(any.reduce());
        assert!(!all.reduce());
    }

    #[test]
    fn combined_error_reports_a_representative() {
        let errors = CombinedError::new();
        assert!(errors.check().is_ok());
        do_all(
            0..100u32,
            |i| {
                if i % 10 == 0 {
                    errors.update(Error::new(ErrorCode::AssertionFailed));
                }
            },
            DoAllOptions::new().steal(),
        );
        let err = errors.check().expect_err("errors were reported");
        assert_eq!(err.code(), ErrorCode::AssertionFailed);
    }

    proptest! {
        #[test]
        fn sum_round_trips_any_sequence(values in proptest::collection::vec(0u32..1_000, 0..200)) {
            let sum = Accumulator::<u64>::new();
            for &v in &values {
                sum.update(u64::from(v));
            }
            prop_assert_eq!(sum.reduce(), values.iter().map(|&v| u64::from(v)).sum::<u64>());
        }

        #[test]
        fn max_round_trips_any_sequence(values in proptest::collection::vec(any::<i32>(), 0..200)) {
            let max = ReduceMax::<i32>::new();
            for &v in &values {
                max.update(v);
            }
            prop_assert_eq!(max.reduce(), values.iter().copied().max().unwrap_or(i32::MIN));
        }
    }
}
