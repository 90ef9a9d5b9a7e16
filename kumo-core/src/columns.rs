//! Zero-copy typed views over columnar arrays.
//!
//! A view borrows the value buffer and validity bitmap of an Arrow array
//! and exposes strongly-typed element access. Views never own storage: their
//! lifetime is bounded by the array (and hence by the graph the column is
//! attached to).

use arrow_array::{Array, FixedSizeListArray, LargeStringArray, PrimitiveArray};
use arrow_array::types::ArrowPrimitiveType;
use arrow_buffer::NullBuffer;

use crate::error::{Error, ErrorCode, Result};

/// A typed view over a fixed-width numeric column.
///
/// Construction fails with [`ErrorCode::TypeError`] when the array's element
/// type does not match `P`. A column without a validity buffer reports every
/// index valid.
#[derive(Debug)]
pub struct PodPropertyView<'a, P: ArrowPrimitiveType> {
    values: &'a [P::Native],
    nulls: Option<NullBuffer>,
}

impl<'a, P: ArrowPrimitiveType> PodPropertyView<'a, P> {
    /// Builds a view over `array`.
    pub fn make(array: &'a dyn Array) -> Result<Self> {
        let typed = array
            .as_any()
            .downcast_ref::<PrimitiveArray<P>>()
            .ok_or_else(|| {
                Error::new(ErrorCode::TypeError).with_context(format!(
                    "expected column of type {}, found {}",
                    P::DATA_TYPE,
                    array.data_type()
                ))
            })?;
        Ok(Self {
            values: typed.values(),
            nulls: typed.nulls().cloned(),
        })
    }

    /// Returns the element count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns whether the view covers zero elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns whether element `index` is in bounds and non-null.
    #[must_use]
    pub fn is_valid(&self, index: usize) -> bool {
        index < self.values.len()
            && self.nulls.as_ref().is_none_or(|nulls| nulls.is_valid(index))
    }

    /// Returns element `index`.
    #[must_use]
    pub fn value(&self, index: usize) -> P::Native {
        self.values[index]
    }

    /// Returns the whole value buffer.
    #[must_use]
    pub fn values(&self) -> &'a [P::Native] {
        self.values
    }

    /// Returns a view of `len` elements starting at `offset`, sharing the
    /// underlying buffers.
    #[must_use]
    pub fn slice(&self, offset: usize, len: usize) -> Self {
        Self {
            values: &self.values[offset..offset + len],
            nulls: self.nulls.as_ref().map(|nulls| nulls.slice(offset, len)),
        }
    }
}

/// A typed view over a large-string column.
///
/// Elements are `(pointer, length)` views into the shared variable-length
/// buffer; no string data is copied.
pub struct StringPropertyView<'a> {
    offsets: &'a [i64],
    data: &'a [u8],
    nulls: Option<NullBuffer>,
}

impl<'a> StringPropertyView<'a> {
    /// Builds a view over `array`.
    ///
    /// Only large (64-bit offset) string arrays are supported so offsets
    /// never overflow on large graphs.
    pub fn make(array: &'a dyn Array) -> Result<Self> {
        let typed = array
            .as_any()
            .downcast_ref::<LargeStringArray>()
            .ok_or_else(|| {
                Error::new(ErrorCode::TypeError).with_context(format!(
                    "expected large string column, found {}",
                    array.data_type()
                ))
            })?;
        Ok(Self {
            offsets: typed.value_offsets(),
            data: typed.value_data(),
            nulls: typed.nulls().cloned(),
        })
    }

    /// Returns the element count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    /// Returns whether the view covers zero elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns whether element `index` is in bounds and non-null.
    #[must_use]
    pub fn is_valid(&self, index: usize) -> bool {
        index < self.len()
            && self.nulls.as_ref().is_none_or(|nulls| nulls.is_valid(index))
    }

    /// Returns element `index` as a borrowed string.
    #[must_use]
    pub fn value(&self, index: usize) -> &'a str {
        let start = usize::try_from(self.offsets[index]).expect("non-negative offset");
        let end = usize::try_from(self.offsets[index + 1]).expect("non-negative offset");
        std::str::from_utf8(&self.data[start..end]).expect("string column holds valid UTF-8")
    }
}

/// A typed view over a fixed-size-list column of `K` numeric elements.
pub struct FixedSizeListView<'a, P: ArrowPrimitiveType> {
    values: &'a [P::Native],
    width: usize,
    start: usize,
    len: usize,
    nulls: Option<NullBuffer>,
}

impl<'a, P: ArrowPrimitiveType> FixedSizeListView<'a, P> {
    /// Builds a view over `array`, failing with
    /// [`ErrorCode::TypeError`] when the list's value type is not `P`.
    pub fn make(array: &'a dyn Array) -> Result<Self> {
        let typed = array
            .as_any()
            .downcast_ref::<FixedSizeListArray>()
            .ok_or_else(|| {
                Error::new(ErrorCode::TypeError).with_context(format!(
                    "expected fixed-size list column, found {}",
                    array.data_type()
                ))
            })?;
        let child = typed
            .values()
            .as_any()
            .downcast_ref::<PrimitiveArray<P>>()
            .ok_or_else(|| {
                Error::new(ErrorCode::TypeError).with_context(format!(
                    "expected list elements of type {}, found {}",
                    P::DATA_TYPE,
                    typed.values().data_type()
                ))
            })?;
        let width = usize::try_from(typed.value_length())
            .map_err(|_| Error::new(ErrorCode::TypeError))?;
        Ok(Self {
            values: child.values(),
            width,
            start: typed.offset(),
            len: typed.len(),
            nulls: typed.nulls().cloned(),
        })
    }

    /// Returns the element (list) count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns whether the view covers zero lists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the fixed list width `K`.
    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Returns whether element `index` is in bounds and non-null.
    #[must_use]
    pub fn is_valid(&self, index: usize) -> bool {
        index < self.len
            && self.nulls.as_ref().is_none_or(|nulls| nulls.is_valid(index))
    }

    /// Returns the `K`-length slice for element `index`.
    #[must_use]
    pub fn value(&self, index: usize) -> &'a [P::Native] {
        let begin = (self.start + index) * self.width;
        &self.values[begin..begin + self.width]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_array::types::{Float64Type, UInt32Type};
    use arrow_array::{Float64Array, UInt32Array};
    use arrow_schema::{DataType, Field};
    use proptest::prelude::*;
    use std::sync::Arc;

    #[test]
    fn pod_view_round_trips_values() {
        let array = UInt32Array::from(vec![7u32, 8, 9]);
        let view = PodPropertyView::<UInt32Type>::make(&array).expect("matching type");
        assert_eq!(view.len(), 3);
        assert_eq!(view.value(1), 8);
        assert!(view.is_valid(2));
        assert!(!view.is_valid(3));
    }

    #[test]
    fn pod_view_rejects_mismatched_type() {
        let array = Float64Array::from(vec![1.0]);
        let err = PodPropertyView::<UInt32Type>::make(&array).expect_err("type mismatch");
        assert_eq!(err.code(), ErrorCode::TypeError);
    }

    #[test]
    fn missing_bitmap_means_all_valid() {
        let array = UInt32Array::from(vec![1u32, 2]);
        let view = PodPropertyView::<UInt32Type>::make(&array).expect("matching type");
        assert!(view.is_valid(0));
        assert!(view.is_valid(1));
    }

    #[test]
    fn null_bitmap_is_honoured_across_slices() {
        let array = UInt32Array::from(vec![Some(1u32), None, Some(3), None]);
        let view = PodPropertyView::<UInt32Type>::make(&array).expect("matching type");
        assert!(view.is_valid(0));
        assert!(!view.is_valid(1));
        let sliced = view.slice(1, 3);
        assert!(!sliced.is_valid(0));
        assert!(sliced.is_valid(1));
        assert_eq!(sliced.value(1), 3);
    }

    #[test]
    fn fixed_size_list_view_exposes_rows() {
        let values = Float64Array::from(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let field = Arc::new(Field::new("item", DataType::Float64, true));
        let array = FixedSizeListArray::new(field, 3, Arc::new(values), None);
        let view = FixedSizeListView::<Float64Type>::make(&array).expect("matching type");
        assert_eq!(view.len(), 2);
        assert_eq!(view.width(), 3);
        assert_eq!(view.value(1), &[4.0, 5.0, 6.0]);
    }

    #[test]
    fn string_view_yields_borrowed_strings() {
        let array = LargeStringArray::from(vec!["alpha", "", "gamma"]);
        let view = StringPropertyView::make(&array).expect("matching type");
        assert_eq!(view.len(), 3);
        assert_eq!(view.value(0), "alpha");
        assert_eq!(view.value(1), "");
        assert_eq!(view.value(2), "gamma");
    }

    proptest! {
        #[test]
        fn pod_view_matches_array_for_every_index(values in proptest::collection::vec(any::<u32>(), 1..100)) {
            let array = UInt32Array::from(values.clone());
            let view = PodPropertyView::<UInt32Type>::make(&array).expect("matching type");
            for (index, expected) in values.iter().enumerate() {
                prop_assert!(view.is_valid(index));
                prop_assert_eq!(view.value(index), *expected);
            }
        }
    }
}
