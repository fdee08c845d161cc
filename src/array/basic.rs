// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{width::PackedView, Array, Kind, ParentSlot, Width, WriteType};
use crate::{Allocator, Ref, Result};
use std::marker::PhantomData;

/// Element type of a [`BasicArray`]
pub trait BasicType: Copy + PartialEq + std::fmt::Debug {
    #[doc(hidden)]
    const WIDTH: Width;

    #[doc(hidden)]
    fn to_packed(self) -> i64;

    #[doc(hidden)]
    fn from_packed(packed: i64) -> Self;
}

impl BasicType for f32 {
    const WIDTH: Width = Width::W32;

    fn to_packed(self) -> i64 {
        i64::from(self.to_bits() as i32)
    }

    fn from_packed(packed: i64) -> Self {
        Self::from_bits(packed as u32)
    }
}

impl BasicType for f64 {
    const WIDTH: Width = Width::W64;

    fn to_packed(self) -> i64 {
        self.to_bits() as i64
    }

    fn from_packed(packed: i64) -> Self {
        Self::from_bits(packed as u64)
    }
}

/// Fixed-width array of raw (non-packed) numeric elements.
///
/// A thin specialization of the generic array contract: elements are stored
/// at their natural width and the width never changes. Matching in
/// [`find_first`] uses the element type's equality, like everywhere else in
/// the engine.
///
/// [`find_first`]: BasicArray::find_first
pub struct BasicArray<T: BasicType> {
    arr: Array,
    phantom: PhantomData<T>,
}

impl<T: BasicType> BasicArray<T> {
    /// Creates a new empty array.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if the allocator cannot reserve the region.
    pub fn create(alloc: &mut dyn Allocator) -> Result<Self> {
        Ok(Self {
            arr: Array::create_raw(alloc, Kind::Normal, WriteType::Ignore, T::WIDTH)?,
            phantom: PhantomData,
        })
    }

    /// Attaches to an existing region.
    ///
    /// # Errors
    ///
    /// Returns `CorruptData` if the header is invalid.
    pub fn from_ref(alloc: &dyn Allocator, ref_: Ref, parent: Option<ParentSlot>) -> Result<Self> {
        Ok(Self {
            arr: Array::from_ref(alloc, ref_, parent)?,
            phantom: PhantomData,
        })
    }

    /// The ref of this array.
    #[must_use]
    pub fn get_ref(&self) -> Ref {
        self.arr.get_ref()
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.arr.len()
    }

    /// Whether the array holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.arr.is_empty()
    }

    /// The element at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    #[must_use]
    pub fn get(&self, alloc: &dyn Allocator, index: usize) -> T {
        T::from_packed(self.arr.get(alloc, index))
    }

    /// Overwrites the element at `index`.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if copy-on-write cannot allocate.
    pub fn set(&mut self, alloc: &mut dyn Allocator, index: usize, value: T) -> Result<()> {
        self.arr.set(alloc, index, value.to_packed())
    }

    /// Appends a value.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if the region cannot grow.
    pub fn add(&mut self, alloc: &mut dyn Allocator, value: T) -> Result<()> {
        self.arr.add(alloc, value.to_packed())
    }

    /// Inserts a value at `index`, shifting the suffix right.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if the region cannot grow.
    pub fn insert(&mut self, alloc: &mut dyn Allocator, index: usize, value: T) -> Result<()> {
        self.arr.insert(alloc, index, value.to_packed())
    }

    /// Removes the element at `index`, shifting the suffix left.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if copy-on-write cannot allocate.
    pub fn remove(&mut self, alloc: &mut dyn Allocator, index: usize) -> Result<()> {
        self.arr.remove(alloc, index)
    }

    /// Resets the length to zero.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if copy-on-write cannot allocate.
    pub fn clear(&mut self, alloc: &mut dyn Allocator) -> Result<()> {
        self.arr.clear(alloc)
    }

    /// Index of the first element in `[start, end)` equal to `value`.
    ///
    /// # Panics
    ///
    /// Panics if the range is out of bounds.
    #[must_use]
    pub fn find_first(
        &self,
        alloc: &dyn Allocator,
        value: T,
        start: usize,
        end: usize,
    ) -> Option<usize> {
        assert!(start <= end && end <= self.len(), "range out of bounds");

        let view = T::WIDTH.view();
        let payload = self.arr.payload(alloc);

        (start..end).find(|&i| T::from_packed(view.get(payload, i)) == value)
    }

    /// Frees the region.
    ///
    /// # Errors
    ///
    /// Returns `CorruptData` if the region is invalid.
    pub fn destroy(self, alloc: &mut dyn Allocator) -> Result<()> {
        self.arr.destroy(alloc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemAlloc;
    use test_log::test;

    const FLOAT_VALUES: [f32; 5] = [0.0, 1.0, 2.12345, 12_345.12, -12_345.12];
    const DOUBLE_VALUES: [f64; 5] = [0.0, 1.0, 2.12345, 12_345.12, -12_345.12];

    fn add_get<T: BasicType>(values: &[T]) -> crate::Result<()> {
        let mut alloc = MemAlloc::new();
        let mut arr = BasicArray::<T>::create(&mut alloc)?;

        for (i, v) in values.iter().enumerate() {
            arr.add(&mut alloc, *v)?;
            assert_eq!(i + 1, arr.len());

            for (j, w) in values.iter().enumerate().take(i) {
                assert_eq!(*w, arr.get(&alloc, j));
            }
        }

        arr.clear(&mut alloc)?;
        assert_eq!(0, arr.len());

        arr.destroy(&mut alloc)?;

        Ok(())
    }

    #[test]
    fn basic_array_add_get() -> crate::Result<()> {
        add_get(&FLOAT_VALUES)?;
        add_get(&DOUBLE_VALUES)
    }

    fn add_many<T: BasicType + From<u16>>() -> crate::Result<()> {
        let mut alloc = MemAlloc::new();
        let mut arr = BasicArray::<T>::create(&mut alloc)?;

        let repeats = 1_100;

        for i in 0..repeats {
            arr.add(&mut alloc, T::from(i))?;
            assert_eq!(T::from(i), arr.get(&alloc, usize::from(i)));
            assert_eq!(usize::from(i) + 1, arr.len());
        }

        for i in 0..repeats {
            assert_eq!(T::from(i), arr.get(&alloc, usize::from(i)));
        }

        arr.clear(&mut alloc)?;
        assert_eq!(0, arr.len());

        arr.destroy(&mut alloc)?;

        Ok(())
    }

    #[test]
    fn basic_array_add_many() -> crate::Result<()> {
        add_many::<f32>()?;
        add_many::<f64>()
    }

    #[test]
    fn basic_array_delete() -> crate::Result<()> {
        let mut alloc = MemAlloc::new();
        let mut arr = BasicArray::<f32>::create(&mut alloc)?;

        for i in 0..5 {
            arr.add(&mut alloc, i as f32)?;
        }

        // Delete first
        arr.remove(&mut alloc, 0)?;
        assert_eq!(4, arr.len());
        assert_eq!(1.0, arr.get(&alloc, 0));
        assert_eq!(4.0, arr.get(&alloc, 3));

        // Delete last
        arr.remove(&mut alloc, 3)?;
        assert_eq!(3, arr.len());
        assert_eq!(3.0, arr.get(&alloc, 2));

        // Delete middle
        arr.remove(&mut alloc, 1)?;
        assert_eq!(2, arr.len());
        assert_eq!(1.0, arr.get(&alloc, 0));
        assert_eq!(3.0, arr.get(&alloc, 1));

        arr.destroy(&mut alloc)?;

        Ok(())
    }

    #[test]
    fn basic_array_range_find() -> crate::Result<()> {
        let mut alloc = MemAlloc::new();
        let mut arr = BasicArray::<f32>::create(&mut alloc)?;

        for v in [1.1, 2.2, -1.0, 5.5, 1.1, 4.4] {
            arr.add(&mut alloc, v)?;
        }

        assert_eq!(None, arr.find_first(&alloc, 1.1, 1, 4));
        assert_eq!(Some(4), arr.find_first(&alloc, 1.1, 1, 5));
        assert_eq!(Some(0), arr.find_first(&alloc, 1.1, 0, 6));
        assert_eq!(Some(2), arr.find_first(&alloc, -1.0, 0, 6));
        assert_eq!(None, arr.find_first(&alloc, 9.9, 0, 6));

        arr.destroy(&mut alloc)?;

        Ok(())
    }
}
