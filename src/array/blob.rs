// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{Array, Kind, ParentSlot, Width, WriteType};
use crate::{Allocator, Ref, Result};

/// Byte-granular array for raw binary payloads.
///
/// Same region format as [`Array`], but the payload is a flat byte buffer
/// and the length counts bytes. [`replace`] is the fundamental primitive;
/// everything else is expressed through it.
///
/// [`replace`]: ArrayBlob::replace
pub struct ArrayBlob {
    arr: Array,
}

impl ArrayBlob {
    /// Creates a new empty blob.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if the allocator cannot reserve the region.
    pub fn create(alloc: &mut dyn Allocator) -> Result<Self> {
        Ok(Self {
            arr: Array::create_raw(alloc, Kind::Normal, WriteType::Ignore, Width::W8)?,
        })
    }

    /// Attaches to an existing blob region.
    ///
    /// # Errors
    ///
    /// Returns `CorruptData` if the header is invalid.
    pub fn from_ref(alloc: &dyn Allocator, ref_: Ref, parent: Option<ParentSlot>) -> Result<Self> {
        Ok(Self {
            arr: Array::from_ref(alloc, ref_, parent)?,
        })
    }

    /// The ref of this blob.
    #[must_use]
    pub fn get_ref(&self) -> Ref {
        self.arr.get_ref()
    }

    /// Length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.arr.len()
    }

    /// Whether the blob holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.arr.is_empty()
    }

    /// The stored bytes.
    #[must_use]
    pub fn bytes<'a>(&self, alloc: &'a dyn Allocator) -> &'a [u8] {
        self.arr
            .payload(alloc)
            .get(..self.arr.len())
            .expect("length should not exceed capacity")
    }

    /// The byte at `pos`.
    ///
    /// # Panics
    ///
    /// Panics if `pos` is out of range.
    #[must_use]
    pub fn byte(&self, alloc: &dyn Allocator, pos: usize) -> u8 {
        *self
            .bytes(alloc)
            .get(pos)
            .expect("position should be in bounds")
    }

    /// Appends bytes.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if the region cannot grow.
    pub fn add(&mut self, alloc: &mut dyn Allocator, data: &[u8]) -> Result<()> {
        self.replace(alloc, self.len(), self.len(), data)
    }

    /// Inserts bytes at `pos`.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if the region cannot grow.
    pub fn insert(&mut self, alloc: &mut dyn Allocator, pos: usize, data: &[u8]) -> Result<()> {
        self.replace(alloc, pos, pos, data)
    }

    /// Replaces the byte range `[start, end)` with `data`.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if the region cannot grow.
    ///
    /// # Panics
    ///
    /// Panics unless `start <= end <= len`.
    pub fn replace(
        &mut self,
        alloc: &mut dyn Allocator,
        start: usize,
        end: usize,
        data: &[u8],
    ) -> Result<()> {
        let len = self.len();
        assert!(start <= end, "range start should not exceed range end");
        assert!(end <= len, "range end should not exceed length");

        self.arr.ensure_writable(alloc)?;

        let gap = end - start;
        let new_len = (len - gap) + data.len();
        self.arr.ensure_capacity(alloc, new_len)?;

        {
            let payload = self.arr.payload_mut(alloc);

            // Move the suffix to its new position
            // (not needed when appending to the end)
            if start != len && gap != data.len() {
                payload.copy_within(end..len, start + data.len());
            }

            payload
                .get_mut(start..start + data.len())
                .expect("destination should be in bounds")
                .copy_from_slice(data);
        }

        self.arr.set_len(alloc, new_len);

        Ok(())
    }

    /// Removes the byte range `[start, end)`.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if copy-on-write cannot allocate.
    pub fn remove_range(
        &mut self,
        alloc: &mut dyn Allocator,
        start: usize,
        end: usize,
    ) -> Result<()> {
        self.replace(alloc, start, end, &[])
    }

    /// Removes all bytes.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if copy-on-write cannot allocate.
    pub fn clear(&mut self, alloc: &mut dyn Allocator) -> Result<()> {
        self.replace(alloc, 0, self.len(), &[])
    }

    /// Frees the blob region.
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

    #[test]
    fn blob_add_replace_delete() -> crate::Result<()> {
        let mut alloc = MemAlloc::new();
        let mut blob = ArrayBlob::create(&mut alloc)?;

        blob.add(&mut alloc, b"hello")?;
        assert_eq!(b"hello", blob.bytes(&alloc));

        blob.replace(&mut alloc, 1, 4, b"EY")?;
        assert_eq!(b"hEYo", blob.bytes(&alloc));
        assert_eq!(4, blob.len());

        blob.remove_range(&mut alloc, 0, 4)?;
        assert_eq!(0, blob.len());

        blob.destroy(&mut alloc)?;

        Ok(())
    }

    #[test]
    fn blob_insert_middle() -> crate::Result<()> {
        let mut alloc = MemAlloc::new();
        let mut blob = ArrayBlob::create(&mut alloc)?;

        blob.add(&mut alloc, b"ad")?;
        blob.insert(&mut alloc, 1, b"bc")?;
        assert_eq!(b"abcd", blob.bytes(&alloc));

        blob.clear(&mut alloc)?;
        assert!(blob.is_empty());

        blob.destroy(&mut alloc)?;

        Ok(())
    }

    #[test]
    fn blob_grow_and_shrink() -> crate::Result<()> {
        let mut alloc = MemAlloc::new();
        let mut blob = ArrayBlob::create(&mut alloc)?;

        let big = b"x".repeat(4_096);
        blob.add(&mut alloc, &big)?;
        assert_eq!(4_096, blob.len());

        blob.replace(&mut alloc, 0, 4_000, b"y")?;
        assert_eq!(97, blob.len());
        assert_eq!(b'y', blob.byte(&alloc, 0));
        assert_eq!(b'x', blob.byte(&alloc, 1));

        blob.destroy(&mut alloc)?;

        Ok(())
    }
}
