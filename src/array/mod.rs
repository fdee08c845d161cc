// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

pub(crate) mod basic;
pub(crate) mod blob;
pub(crate) mod header;
pub(crate) mod width;

pub use basic::{BasicArray, BasicType};
pub use blob::ArrayBlob;
pub use header::{Header, WriteType, HEADER_LEN};
pub use width::Width;

use crate::{alloc::round_up, Allocator, Error, Ref, Result};
use rustc_hash::FxHashSet;
use width::PackedView;

/// Byte size of a freshly created region (header + payload).
const INITIAL_REGION: usize = 128;

const MAX_LEN: usize = (1 << 24) - 1;

/// Node type of a new array
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Kind {
    /// Leaf holding plain values
    Normal,

    /// Leaf whose elements are refs to other arrays
    HasRefs,

    /// Inner B+-tree node
    Inner,
}

/// Back-link to the slot that holds this array's ref
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ParentSlot {
    /// Ref of the parent array
    pub array: Ref,

    /// Element index inside the parent that stores this array's ref
    pub index: usize,
}

/// The one-and-only persisted building block: a packed integer vector.
///
/// An array is a ref plus a cached copy of the 8-byte header stored at that
/// ref. Elements are bit-packed at a uniform width drawn from
/// {0,1,2,4,8,16,32,64}; writing a value that does not fit rebuilds the
/// payload at the next sufficient width. Widths only ever grow during the
/// lifetime of a ref.
///
/// Mutations go through copy-on-write: if the region lives in committed
/// space, it is copied into mutable space first and the array re-addresses
/// itself. The new ref is *not* written into the parent slot by the array
/// itself; tree-level code owns the parent chain and syncs child slots
/// top-down, so a parent is always writable by the time its child moves.
pub struct Array {
    ref_: Ref,
    header: Header,
    parent: Option<ParentSlot>,
}

impl Array {
    /// Creates a new empty array.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if the allocator cannot reserve the region.
    pub fn create(alloc: &mut dyn Allocator, kind: Kind) -> Result<Self> {
        Self::create_raw(alloc, kind, WriteType::Normal, Width::W0)
    }

    pub(crate) fn create_raw(
        alloc: &mut dyn Allocator,
        kind: Kind,
        wtype: WriteType,
        width: Width,
    ) -> Result<Self> {
        let ref_ = alloc.alloc(INITIAL_REGION)?;

        let header = Header {
            is_leaf: kind != Kind::Inner,
            has_refs: kind != Kind::Normal,
            wtype,
            width,
            len: 0,
            capacity: INITIAL_REGION - HEADER_LEN,
        };

        header.write_to(alloc.translate_mut(ref_));

        Ok(Self {
            ref_,
            header,
            parent: None,
        })
    }

    /// Attaches to an existing array region.
    ///
    /// # Errors
    ///
    /// Returns `CorruptData` if the header violates the format invariants
    /// or the region does not fit inside the arena.
    pub fn from_ref(alloc: &dyn Allocator, ref_: Ref, parent: Option<ParentSlot>) -> Result<Self> {
        let region = alloc.translate(ref_);
        let header = Header::read_from(region)?;

        if region.len() < HEADER_LEN + header.capacity {
            return Err(Error::CorruptData("array region exceeds arena"));
        }

        if header.width.byte_len(header.len) > header.capacity {
            return Err(Error::CorruptData("array length exceeds capacity"));
        }

        Ok(Self {
            ref_,
            header,
            parent,
        })
    }

    /// The ref (persistent identity) of this array.
    #[must_use]
    pub fn get_ref(&self) -> Ref {
        self.ref_
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.header.len
    }

    /// Whether the array holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.header.len == 0
    }

    /// Current element bit width.
    #[must_use]
    pub fn width(&self) -> Width {
        self.header.width
    }

    /// Whether this is a terminal (leaf) node.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.header.is_leaf
    }

    /// Whether elements are refs to other arrays.
    #[must_use]
    pub fn has_refs(&self) -> bool {
        self.header.has_refs
    }

    /// Installs the back-link to the slot holding this array's ref.
    pub fn set_parent(&mut self, parent: Option<ParentSlot>) {
        self.parent = parent;
    }

    /// The current back-link, if any.
    #[must_use]
    pub fn parent(&self) -> Option<ParentSlot> {
        self.parent
    }

    /// Region size in bytes (header + payload capacity).
    #[must_use]
    pub fn byte_size(&self) -> usize {
        HEADER_LEN + self.header.capacity
    }

    /// Unpacks the element at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    #[must_use]
    pub fn get(&self, alloc: &dyn Allocator, index: usize) -> i64 {
        assert!(index < self.header.len, "index out of range");
        self.header.width.view().get(self.payload(alloc), index)
    }

    /// Reads the element at `index` as a ref.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    #[must_use]
    pub fn get_as_ref(&self, alloc: &dyn Allocator, index: usize) -> Ref {
        Ref(self.get(alloc, index) as u64)
    }

    /// Overwrites the element at `index`, widening if needed.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if copy-on-write or widening cannot allocate.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn set(&mut self, alloc: &mut dyn Allocator, index: usize, value: i64) -> Result<()> {
        assert!(index < self.header.len, "index out of range");

        self.ensure_writable(alloc)?;

        if !self.header.width.fits(value) {
            self.widen_to(alloc, Width::for_value(value))?;
        }

        let view = self.header.width.view();
        view.set(self.payload_mut(alloc), index, value);

        Ok(())
    }

    /// Appends a value.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if the region cannot grow.
    pub fn add(&mut self, alloc: &mut dyn Allocator, value: i64) -> Result<()> {
        self.insert(alloc, self.header.len, value)
    }

    /// Inserts a value at `index`, shifting the suffix right.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if the region cannot grow.
    ///
    /// # Panics
    ///
    /// Panics if `index > len` or the 24-bit length field would overflow.
    pub fn insert(&mut self, alloc: &mut dyn Allocator, index: usize, value: i64) -> Result<()> {
        assert!(index <= self.header.len, "index out of range");
        assert!(self.header.len < MAX_LEN, "array length field overflow");

        self.ensure_writable(alloc)?;

        if !self.header.width.fits(value) {
            self.widen_to(alloc, Width::for_value(value))?;
        }

        let len = self.header.len;
        self.ensure_capacity(alloc, self.header.width.byte_len(len + 1))?;

        {
            let capacity = self.header.capacity;
            let view = self.header.width.view();

            let region = alloc.translate_mut(self.ref_);
            let payload = region
                .get_mut(HEADER_LEN..HEADER_LEN + capacity)
                .expect("payload should be in bounds");

            let mut i = len;
            while i > index {
                let v = view.get(payload, i - 1);
                view.set(payload, i, v);
                i -= 1;
            }

            view.set(payload, index, value);
        }

        self.header.len = len + 1;
        self.write_header(alloc);

        Ok(())
    }

    /// Removes the element at `index`, shifting the suffix left.
    ///
    /// The width never shrinks.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if copy-on-write cannot allocate.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn remove(&mut self, alloc: &mut dyn Allocator, index: usize) -> Result<()> {
        assert!(index < self.header.len, "index out of range");

        self.ensure_writable(alloc)?;

        let len = self.header.len;

        {
            let capacity = self.header.capacity;
            let view = self.header.width.view();

            let region = alloc.translate_mut(self.ref_);
            let payload = region
                .get_mut(HEADER_LEN..HEADER_LEN + capacity)
                .expect("payload should be in bounds");

            for i in index..len - 1 {
                let v = view.get(payload, i + 1);
                view.set(payload, i, v);
            }
        }

        self.header.len = len - 1;
        self.write_header(alloc);

        Ok(())
    }

    /// Resets the length to zero.
    ///
    /// Capacity and width are kept; the width of a ref never shrinks.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if copy-on-write cannot allocate.
    pub fn clear(&mut self, alloc: &mut dyn Allocator) -> Result<()> {
        self.ensure_writable(alloc)?;

        self.header.len = 0;
        self.write_header(alloc);

        Ok(())
    }

    /// Index of the first occurrence of `value` in `[start, end)`.
    ///
    /// # Panics
    ///
    /// Panics if the range is out of bounds.
    #[must_use]
    pub fn find_first(
        &self,
        alloc: &dyn Allocator,
        value: i64,
        start: usize,
        end: usize,
    ) -> Option<usize> {
        assert!(start <= end && end <= self.header.len, "range out of bounds");

        self.header
            .width
            .view()
            .find_first(self.payload(alloc), value, start, end)
    }

    /// Appends the index of every occurrence of `value` in `[start, end)`
    /// into `out`.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if `out` cannot grow.
    pub fn find_all(
        &self,
        alloc: &mut dyn Allocator,
        out: &mut Self,
        value: i64,
        start: usize,
        end: usize,
    ) -> Result<()> {
        let mut i = start;

        while let Some(idx) = self.find_first(alloc, value, i, end) {
            out.add(alloc, idx as i64)?;
            i = idx + 1;
        }

        Ok(())
    }

    /// Re-reads the parent slot to learn whether this array's ref moved
    /// (copy-on-write upstream). Returns true if it re-addressed itself.
    ///
    /// # Errors
    ///
    /// Returns `CorruptData` if the parent or the re-read header is invalid.
    pub fn update_from_parent(&mut self, alloc: &dyn Allocator) -> Result<bool> {
        let Some(slot) = self.parent else {
            return Ok(false);
        };

        let parent = Self::from_ref(alloc, slot.array, None)?;
        let current = parent.get_as_ref(alloc, slot.index);

        if current == self.ref_ {
            return Ok(false);
        }

        let fresh = Self::from_ref(alloc, current, Some(slot))?;
        self.ref_ = fresh.ref_;
        self.header = fresh.header;

        Ok(true)
    }

    /// Copies the region into mutable space if it is committed (read-only).
    ///
    /// Returns whether the ref changed. The caller owns writing the new ref
    /// into the parent slot.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if the copy cannot allocate.
    pub(crate) fn ensure_writable(&mut self, alloc: &mut dyn Allocator) -> Result<bool> {
        if !alloc.is_read_only(self.ref_) {
            return Ok(false);
        }

        let size = self.byte_size();
        let new_ref = alloc.realloc(self.ref_, size, size)?;

        log::trace!("array: copy-on-write {} -> {}", self.ref_, new_ref);

        self.ref_ = new_ref;

        Ok(true)
    }

    /// Grows the payload capacity to at least `needed` bytes.
    ///
    /// Must only be called on a writable array.
    pub(crate) fn ensure_capacity(
        &mut self,
        alloc: &mut dyn Allocator,
        needed: usize,
    ) -> Result<()> {
        if needed <= self.header.capacity {
            return Ok(());
        }

        let old_size = self.byte_size();
        let new_capacity =
            round_up(HEADER_LEN + (self.header.capacity * 2).max(needed)) - HEADER_LEN;

        let new_ref = alloc.realloc(self.ref_, old_size, HEADER_LEN + new_capacity)?;

        self.ref_ = new_ref;
        self.header.capacity = new_capacity;
        self.write_header(alloc);

        Ok(())
    }

    /// Rebuilds the payload at a wider element width, in place.
    ///
    /// Must only be called on a writable array.
    pub(crate) fn widen_to(&mut self, alloc: &mut dyn Allocator, new_width: Width) -> Result<()> {
        debug_assert!(new_width > self.header.width, "width only ever grows");

        let len = self.header.len;
        self.ensure_capacity(alloc, new_width.byte_len(len))?;

        log::trace!(
            "array: widen ref {} from {:?} to {new_width:?}",
            self.ref_,
            self.header.width,
        );

        {
            let capacity = self.header.capacity;
            let old_view = self.header.width.view();
            let new_view = new_width.view();

            let region = alloc.translate_mut(self.ref_);
            let payload = region
                .get_mut(HEADER_LEN..HEADER_LEN + capacity)
                .expect("payload should be in bounds");

            // Expanding back to front never overwrites an element that has
            // not been moved yet
            for i in (0..len).rev() {
                let v = old_view.get(payload, i);
                new_view.set(payload, i, v);
            }
        }

        self.header.width = new_width;
        self.write_header(alloc);

        Ok(())
    }

    /// Recursively frees this array and, if it holds refs, all children.
    ///
    /// # Errors
    ///
    /// Returns `CorruptData` if a child ref cannot be attached.
    pub fn destroy(self, alloc: &mut dyn Allocator) -> Result<()> {
        if self.header.has_refs {
            for i in 0..self.header.len {
                let child_ref = self.get_as_ref(alloc, i);

                if !child_ref.is_null() {
                    Self::from_ref(alloc, child_ref, None)?.destroy(alloc)?;
                }
            }
        }

        alloc.free(self.ref_, self.byte_size());

        Ok(())
    }

    /// Deep-copies the array at `src` (and, if it holds refs, every
    /// reachable child) into fresh regions. Returns the ref of the copy.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if allocation fails, `CorruptData` if a region
    /// is invalid.
    pub fn clone_deep(alloc: &mut dyn Allocator, src: Ref) -> Result<Ref> {
        let source = Self::from_ref(alloc, src, None)?;
        let size = source.byte_size();

        let bytes = alloc
            .translate(src)
            .get(..size)
            .expect("region should be in bounds")
            .to_vec();

        let new_ref = alloc.alloc(size)?;
        alloc
            .translate_mut(new_ref)
            .get_mut(..size)
            .expect("region should be in bounds")
            .copy_from_slice(&bytes);

        if !source.header.has_refs {
            return Ok(new_ref);
        }

        // Rewriting the slots may widen the copy and move it
        let mut copy = Self::from_ref(alloc, new_ref, None)?;

        for i in 0..source.header.len {
            let child_ref = source.get_as_ref(alloc, i);

            if child_ref.is_null() {
                continue;
            }

            let child_copy = Self::clone_deep(alloc, child_ref)?;
            copy.set(alloc, i, *child_copy as i64)?;
        }

        Ok(copy.get_ref())
    }

    /// Debug consistency check: validates the header against the arena and
    /// walks children, asserting every region is referenced at most once.
    ///
    /// # Errors
    ///
    /// Returns `CorruptData` on any violation.
    pub fn verify(&self, alloc: &dyn Allocator) -> Result<()> {
        let mut visited = FxHashSet::default();
        self.verify_into(alloc, &mut visited)
    }

    pub(crate) fn verify_into(
        &self,
        alloc: &dyn Allocator,
        visited: &mut FxHashSet<u64>,
    ) -> Result<()> {
        if !visited.insert(*self.ref_) {
            return Err(Error::CorruptData("region referenced twice"));
        }

        let fresh = Self::from_ref(alloc, self.ref_, self.parent)?;

        if fresh.header != self.header {
            return Err(Error::CorruptData("cached header is stale"));
        }

        if let Some(slot) = self.parent {
            let parent = Self::from_ref(alloc, slot.array, None)?;

            if parent.get_as_ref(alloc, slot.index) != self.ref_ {
                return Err(Error::CorruptData("parent slot does not point here"));
            }
        }

        if self.header.has_refs {
            for i in 0..self.header.len {
                let child_ref = self.get_as_ref(alloc, i);

                if child_ref.is_null() {
                    continue;
                }

                let child = Self::from_ref(
                    alloc,
                    child_ref,
                    Some(ParentSlot {
                        array: self.ref_,
                        index: i,
                    }),
                )?;

                child.verify_into(alloc, visited)?;
            }
        }

        Ok(())
    }

    /// Writes this node (and, recursively, its children) as graphviz dot
    /// statements.
    ///
    /// # Errors
    ///
    /// Returns an error if the writer fails.
    pub fn to_dot<W: std::io::Write>(&self, alloc: &dyn Allocator, writer: &mut W) -> Result<()> {
        writeln!(
            writer,
            "  n{} [label=\"ref {} | len {} | {:?}\"];",
            self.ref_, self.ref_, self.header.len, self.header.width,
        )?;

        if self.header.has_refs {
            for i in 0..self.header.len {
                let child_ref = self.get_as_ref(alloc, i);

                if child_ref.is_null() {
                    continue;
                }

                writeln!(writer, "  n{} -> n{};", self.ref_, child_ref)?;

                let child = Self::from_ref(alloc, child_ref, None)?;
                child.to_dot(alloc, writer)?;
            }
        }

        Ok(())
    }

    /// Truncates to `new_len` elements without freeing anything.
    ///
    /// Must only be called on a writable array.
    pub(crate) fn truncate(&mut self, alloc: &mut dyn Allocator, new_len: usize) {
        debug_assert!(new_len <= self.header.len);

        self.header.len = new_len;
        self.write_header(alloc);
    }

    /// Overwrites the element count; byte-granular variants bookkeep their
    /// own length.
    pub(crate) fn set_len(&mut self, alloc: &mut dyn Allocator, len: usize) {
        assert!(len <= MAX_LEN, "array length field overflow");

        self.header.len = len;
        self.write_header(alloc);
    }

    /// Rewrites the node-type bits, e.g. when an emptied inner root is
    /// reborn as a leaf.
    ///
    /// Must only be called on a writable array.
    pub(crate) fn morph(&mut self, alloc: &mut dyn Allocator, is_leaf: bool, has_refs: bool) {
        self.header.is_leaf = is_leaf;
        self.header.has_refs = has_refs;
        self.write_header(alloc);
    }

    pub(crate) fn payload<'a>(&self, alloc: &'a dyn Allocator) -> &'a [u8] {
        alloc
            .translate(self.ref_)
            .get(HEADER_LEN..HEADER_LEN + self.header.capacity)
            .expect("payload should be in bounds")
    }

    pub(crate) fn payload_mut<'a>(&self, alloc: &'a mut dyn Allocator) -> &'a mut [u8] {
        alloc
            .translate_mut(self.ref_)
            .get_mut(HEADER_LEN..HEADER_LEN + self.header.capacity)
            .expect("payload should be in bounds")
    }

    pub(crate) fn write_header(&self, alloc: &mut dyn Allocator) {
        self.header.write_to(alloc.translate_mut(self.ref_));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemAlloc;
    use test_log::test;

    #[test]
    fn array_add_get() -> crate::Result<()> {
        let mut alloc = MemAlloc::new();
        let mut arr = Array::create(&mut alloc, Kind::Normal)?;

        for v in [0, 1, -1, 127, -128, 1_000_000] {
            arr.add(&mut alloc, v)?;
        }

        assert_eq!(6, arr.len());
        assert_eq!(0, arr.get(&alloc, 0));
        assert_eq!(1, arr.get(&alloc, 1));
        assert_eq!(-1, arr.get(&alloc, 2));
        assert_eq!(127, arr.get(&alloc, 3));
        assert_eq!(-128, arr.get(&alloc, 4));
        assert_eq!(1_000_000, arr.get(&alloc, 5));

        arr.destroy(&mut alloc)?;

        Ok(())
    }

    #[test]
    fn array_width_widens_monotonically() -> crate::Result<()> {
        let mut alloc = MemAlloc::new();
        let mut arr = Array::create(&mut alloc, Kind::Normal)?;

        arr.add(&mut alloc, 0)?;
        assert_eq!(Width::W0, arr.width());

        arr.add(&mut alloc, 1)?;
        assert_eq!(Width::W1, arr.width());

        arr.add(&mut alloc, 2)?;
        assert_eq!(Width::W2, arr.width());

        arr.add(&mut alloc, 255)?;
        assert_eq!(Width::W8, arr.width());

        // Earlier values survive the rebuilds
        assert_eq!(0, arr.get(&alloc, 0));
        assert_eq!(1, arr.get(&alloc, 1));
        assert_eq!(2, arr.get(&alloc, 2));
        assert_eq!(255, arr.get(&alloc, 3));

        // Removing the wide value does not narrow the array
        arr.remove(&mut alloc, 3)?;
        assert_eq!(Width::W8, arr.width());

        arr.destroy(&mut alloc)?;

        Ok(())
    }

    #[test]
    fn array_insert_shifts() -> crate::Result<()> {
        let mut alloc = MemAlloc::new();
        let mut arr = Array::create(&mut alloc, Kind::Normal)?;

        arr.add(&mut alloc, 10)?;
        arr.add(&mut alloc, 30)?;
        arr.insert(&mut alloc, 1, 20)?;

        assert_eq!(3, arr.len());
        assert_eq!(10, arr.get(&alloc, 0));
        assert_eq!(20, arr.get(&alloc, 1));
        assert_eq!(30, arr.get(&alloc, 2));

        arr.remove(&mut alloc, 0)?;
        assert_eq!(20, arr.get(&alloc, 0));
        assert_eq!(30, arr.get(&alloc, 1));

        arr.destroy(&mut alloc)?;

        Ok(())
    }

    #[test]
    fn array_find() -> crate::Result<()> {
        let mut alloc = MemAlloc::new();
        let mut arr = Array::create(&mut alloc, Kind::Normal)?;

        for v in [5, 7, 5, 9, 5] {
            arr.add(&mut alloc, v)?;
        }

        assert_eq!(Some(0), arr.find_first(&alloc, 5, 0, 5));
        assert_eq!(Some(2), arr.find_first(&alloc, 5, 1, 5));
        assert_eq!(None, arr.find_first(&alloc, 5, 3, 4));
        assert_eq!(None, arr.find_first(&alloc, 1_234, 0, 5));

        let mut out = Array::create(&mut alloc, Kind::Normal)?;
        arr.find_all(&mut alloc, &mut out, 5, 0, 5)?;

        assert_eq!(3, out.len());
        assert_eq!(0, out.get(&alloc, 0));
        assert_eq!(2, out.get(&alloc, 2));

        out.destroy(&mut alloc)?;
        arr.destroy(&mut alloc)?;

        Ok(())
    }

    #[test]
    fn array_grows_past_initial_capacity() -> crate::Result<()> {
        let mut alloc = MemAlloc::new();
        let mut arr = Array::create(&mut alloc, Kind::Normal)?;

        for i in 0..10_000 {
            arr.add(&mut alloc, i)?;
        }

        for i in 0..10_000 {
            assert_eq!(i, arr.get(&alloc, i as usize));
        }

        arr.destroy(&mut alloc)?;

        Ok(())
    }

    #[test]
    fn array_clear_keeps_width() -> crate::Result<()> {
        let mut alloc = MemAlloc::new();
        let mut arr = Array::create(&mut alloc, Kind::Normal)?;

        arr.add(&mut alloc, 100_000)?;
        let width = arr.width();

        arr.clear(&mut alloc)?;
        assert!(arr.is_empty());
        assert_eq!(width, arr.width());

        arr.destroy(&mut alloc)?;

        Ok(())
    }

    #[test]
    fn array_update_from_parent() -> crate::Result<()> {
        let mut alloc = MemAlloc::new();

        let mut child = Array::create(&mut alloc, Kind::Normal)?;
        child.add(&mut alloc, 42)?;

        let mut parent = Array::create(&mut alloc, Kind::HasRefs)?;
        parent.add(&mut alloc, *child.get_ref() as i64)?;
        child.set_parent(Some(ParentSlot {
            array: parent.get_ref(),
            index: 0,
        }));

        assert!(!child.update_from_parent(&alloc)?);

        // Simulate an upstream remap: move the child and update the slot
        let mut moved = Array::create(&mut alloc, Kind::Normal)?;
        moved.add(&mut alloc, 43)?;
        parent.set(&mut alloc, 0, *moved.get_ref() as i64)?;

        assert!(child.update_from_parent(&alloc)?);
        assert_eq!(moved.get_ref(), child.get_ref());
        assert_eq!(43, child.get(&alloc, 0));

        Ok(())
    }

    #[test]
    fn array_verify_detects_sharing() -> crate::Result<()> {
        let mut alloc = MemAlloc::new();

        let mut child = Array::create(&mut alloc, Kind::Normal)?;
        child.add(&mut alloc, 1)?;

        let mut parent = Array::create(&mut alloc, Kind::HasRefs)?;
        parent.add(&mut alloc, *child.get_ref() as i64)?;
        parent.add(&mut alloc, *child.get_ref() as i64)?;

        assert!(matches!(
            parent.verify(&alloc),
            Err(crate::Error::CorruptData(_))
        ));

        Ok(())
    }
}
