// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

pub(crate) mod subtable;
pub(crate) mod subtable_map;

pub use subtable::SubtableColumn;

use crate::{
    array::{Array, Kind, ParentSlot},
    Allocator, Error, Ref, Result,
};
use rustc_hash::FxHashSet;

/// Maximum number of elements in a leaf, and children in an inner node.
pub(crate) const LEAF_MAX: usize = 1_000;

/// Result of an insert that overflowed a node
struct NodeSplit {
    right: Ref,
    right_count: usize,
}

/// An ordered sequence of signed 64-bit values (or refs) built atop arrays.
///
/// Small columns are a single leaf. Past [`LEAF_MAX`] elements the column
/// becomes a positional B+-tree: inner nodes are has-refs arrays whose
/// element 0 is the ref of a cumulative-counts array and whose remaining
/// elements are child refs. The tree balances by element counts, not value
/// order, so index lookup is a binary search over the counts.
///
/// Mutations make the root-to-leaf path writable top-down, so by the time a
/// leaf copies on write its parent slot is already mutable. Whether the
/// *root* ref changed is visible to the owner through [`get_ref`]; the
/// owner writes it into whatever slot holds the column.
///
/// [`get_ref`]: Column::get_ref
pub struct Column {
    root: Array,

    /// Whether leaves hold refs (subtable columns) or plain values
    refs: bool,
}

impl Column {
    /// Creates a new empty column of plain values.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if the allocator cannot reserve the root.
    pub fn new(alloc: &mut dyn Allocator) -> Result<Self> {
        Ok(Self {
            root: Array::create(alloc, Kind::Normal)?,
            refs: false,
        })
    }

    /// Creates a new empty column whose cells are refs.
    pub(crate) fn new_refs(alloc: &mut dyn Allocator) -> Result<Self> {
        Ok(Self {
            root: Array::create(alloc, Kind::HasRefs)?,
            refs: true,
        })
    }

    /// Attaches to an existing column root.
    ///
    /// # Errors
    ///
    /// Returns `CorruptData` if the structure is invalid.
    pub fn from_ref(alloc: &dyn Allocator, ref_: Ref, parent: Option<ParentSlot>) -> Result<Self> {
        let root = Array::from_ref(alloc, ref_, parent)?;
        let refs = Self::leaf_kind(alloc, &root)?;

        Ok(Self { root, refs })
    }

    /// Whether the leftmost leaf holds refs.
    fn leaf_kind(alloc: &dyn Allocator, root: &Array) -> Result<bool> {
        let mut node = Array::from_ref(alloc, root.get_ref(), None)?;

        while !node.is_leaf() {
            if node.len() < 2 {
                return Err(Error::CorruptData("inner node without children"));
            }

            node = Array::from_ref(alloc, node.get_as_ref(alloc, 1), None)?;
        }

        Ok(node.has_refs())
    }

    /// The ref of the root array.
    #[must_use]
    pub fn get_ref(&self) -> Ref {
        self.root.get_ref()
    }

    /// Installs the back-link to the slot holding the root ref.
    pub fn set_parent(&mut self, parent: Option<ParentSlot>) {
        self.root.set_parent(parent);
    }

    /// Number of values.
    ///
    /// # Errors
    ///
    /// Returns `CorruptData` if the tree is invalid.
    pub fn size(&self, alloc: &dyn Allocator) -> Result<usize> {
        Self::subtree_count(alloc, &self.root)
    }

    /// Whether the column holds no values.
    ///
    /// # Errors
    ///
    /// Returns `CorruptData` if the tree is invalid.
    pub fn is_empty(&self, alloc: &dyn Allocator) -> Result<bool> {
        Ok(self.size(alloc)? == 0)
    }

    /// Height of the tree (a single leaf has depth 1).
    ///
    /// # Errors
    ///
    /// Returns `CorruptData` if the tree is invalid.
    pub fn depth(&self, alloc: &dyn Allocator) -> Result<usize> {
        let mut node = Array::from_ref(alloc, self.root.get_ref(), None)?;
        let mut depth = 1;

        while !node.is_leaf() {
            if node.len() < 2 {
                return Err(Error::CorruptData("inner node without children"));
            }

            node = Array::from_ref(alloc, node.get_as_ref(alloc, 1), None)?;
            depth += 1;
        }

        Ok(depth)
    }

    /// The value at `index`.
    ///
    /// # Errors
    ///
    /// Returns `CorruptData` if the tree is invalid.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn get(&self, alloc: &dyn Allocator, index: usize) -> Result<i64> {
        let mut node = Array::from_ref(alloc, self.root.get_ref(), None)?;
        let mut index = index;

        loop {
            if node.is_leaf() {
                return Ok(node.get(alloc, index));
            }

            let (child, local, _, _) = Self::locate(alloc, &node, index)?;
            node = child;
            index = local;
        }
    }

    /// The value at `index`, read as a ref.
    ///
    /// # Errors
    ///
    /// Returns `CorruptData` if the tree is invalid.
    pub fn get_as_ref(&self, alloc: &dyn Allocator, index: usize) -> Result<Ref> {
        Ok(Ref(self.get(alloc, index)? as u64))
    }

    /// Overwrites the value at `index`.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if copy-on-write cannot allocate.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn set(&mut self, alloc: &mut dyn Allocator, index: usize, value: i64) -> Result<()> {
        Self::node_set(alloc, &mut self.root, index, value)
    }

    /// Appends a value.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if the tree cannot grow.
    pub fn add(&mut self, alloc: &mut dyn Allocator, value: i64) -> Result<()> {
        let size = self.size(alloc)?;
        self.insert(alloc, size, value)
    }

    /// Inserts a value at `index`, shifting the suffix.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if the tree cannot grow.
    ///
    /// # Panics
    ///
    /// Panics if `index > size`.
    pub fn insert(&mut self, alloc: &mut dyn Allocator, index: usize, value: i64) -> Result<()> {
        if let Some(split) = Self::node_insert(alloc, &mut self.root, index, value)? {
            self.grow_root(alloc, split)?;
        }

        Ok(())
    }

    /// Removes the value at `index`, shifting the suffix.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if copy-on-write cannot allocate.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn remove(&mut self, alloc: &mut dyn Allocator, index: usize) -> Result<()> {
        Self::node_remove(alloc, &mut self.root, index)?;
        self.maybe_collapse_root(alloc)
    }

    /// Removes all values.
    ///
    /// The root region survives; if the tree had grown, the root is reborn
    /// as an empty leaf of the column's cell kind.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if copy-on-write cannot allocate.
    pub fn clear(&mut self, alloc: &mut dyn Allocator) -> Result<()> {
        self.root.ensure_writable(alloc)?;

        if self.root.is_leaf() {
            return self.root.clear(alloc);
        }

        for i in 1..self.root.len() {
            Array::from_ref(alloc, self.root.get_as_ref(alloc, i), None)?.destroy(alloc)?;
        }

        Array::from_ref(alloc, self.root.get_as_ref(alloc, 0), None)?.destroy(alloc)?;

        self.root.clear(alloc)?;
        self.root.morph(alloc, true, self.refs);

        Ok(())
    }

    /// Appends `count` zeroes (or null refs).
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if the tree cannot grow.
    pub fn fill(&mut self, alloc: &mut dyn Allocator, count: usize) -> Result<()> {
        for _ in 0..count {
            self.add(alloc, 0)?;
        }

        Ok(())
    }

    /// Index of the first occurrence of `value` in `[start, end)`.
    ///
    /// # Errors
    ///
    /// Returns `CorruptData` if the tree is invalid.
    ///
    /// # Panics
    ///
    /// Panics if the range is out of bounds.
    pub fn find_first(
        &self,
        alloc: &dyn Allocator,
        value: i64,
        start: usize,
        end: usize,
    ) -> Result<Option<usize>> {
        assert!(
            start <= end && end <= self.size(alloc)?,
            "range out of bounds"
        );

        Self::walk(alloc, &self.root, 0, start, end, &mut |leaf, base, ls, le| {
            Ok(leaf.find_first(alloc, value, ls, le).map(|i| base + i))
        })
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
        out: &mut Array,
        value: i64,
        start: usize,
        end: usize,
    ) -> Result<()> {
        let mut i = start;

        while let Some(idx) = self.find_first(alloc, value, i, end)? {
            out.add(alloc, idx as i64)?;
            i = idx + 1;
        }

        Ok(())
    }

    /// Number of occurrences of `value` in `[start, end)`.
    ///
    /// # Errors
    ///
    /// Returns `CorruptData` if the tree is invalid.
    pub fn count(
        &self,
        alloc: &dyn Allocator,
        value: i64,
        start: usize,
        end: usize,
    ) -> Result<usize> {
        assert!(
            start <= end && end <= self.size(alloc)?,
            "range out of bounds"
        );

        let mut total = 0;

        Self::walk(alloc, &self.root, 0, start, end, &mut |leaf, _, ls, le| {
            for i in ls..le {
                if leaf.get(alloc, i) == value {
                    total += 1;
                }
            }

            Ok(None)
        })?;

        Ok(total)
    }

    /// Sum of the values in `[start, end)`.
    ///
    /// # Errors
    ///
    /// Returns `CorruptData` if the tree is invalid.
    pub fn sum(&self, alloc: &dyn Allocator, start: usize, end: usize) -> Result<i64> {
        assert!(
            start <= end && end <= self.size(alloc)?,
            "range out of bounds"
        );

        let mut total = 0i64;

        Self::walk(alloc, &self.root, 0, start, end, &mut |leaf, _, ls, le| {
            for i in ls..le {
                total += leaf.get(alloc, i);
            }

            Ok(None)
        })?;

        Ok(total)
    }

    /// Smallest value in `[start, end)`, or `None` if the range is empty.
    ///
    /// # Errors
    ///
    /// Returns `CorruptData` if the tree is invalid.
    pub fn minimum(&self, alloc: &dyn Allocator, start: usize, end: usize) -> Result<Option<i64>> {
        assert!(
            start <= end && end <= self.size(alloc)?,
            "range out of bounds"
        );

        let mut min: Option<i64> = None;

        Self::walk(alloc, &self.root, 0, start, end, &mut |leaf, _, ls, le| {
            for i in ls..le {
                let v = leaf.get(alloc, i);
                min = Some(min.map_or(v, |m| m.min(v)));
            }

            Ok(None)
        })?;

        Ok(min)
    }

    /// Largest value in `[start, end)`, or `None` if the range is empty.
    ///
    /// # Errors
    ///
    /// Returns `CorruptData` if the tree is invalid.
    pub fn maximum(&self, alloc: &dyn Allocator, start: usize, end: usize) -> Result<Option<i64>> {
        assert!(
            start <= end && end <= self.size(alloc)?,
            "range out of bounds"
        );

        let mut max: Option<i64> = None;

        Self::walk(alloc, &self.root, 0, start, end, &mut |leaf, _, ls, le| {
            for i in ls..le {
                let v = leaf.get(alloc, i);
                max = Some(max.map_or(v, |m| m.max(v)));
            }

            Ok(None)
        })?;

        Ok(max)
    }

    /// Whether two columns hold the same sequence of values.
    ///
    /// # Errors
    ///
    /// Returns `CorruptData` if either tree is invalid.
    pub fn compare(&self, alloc: &dyn Allocator, other: &Self) -> Result<bool> {
        let size = self.size(alloc)?;

        if size != other.size(alloc)? {
            return Ok(false);
        }

        for i in 0..size {
            if self.get(alloc, i)? != other.get(alloc, i)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Re-reads the parent slot to learn whether the root ref moved.
    ///
    /// # Errors
    ///
    /// Returns `CorruptData` if the parent is invalid.
    pub fn update_from_parent(&mut self, alloc: &dyn Allocator) -> Result<bool> {
        self.root.update_from_parent(alloc)
    }

    /// Recursively frees the whole tree (including, for ref columns, the
    /// structures its cells point to).
    ///
    /// # Errors
    ///
    /// Returns `CorruptData` if the tree is invalid.
    pub fn destroy(self, alloc: &mut dyn Allocator) -> Result<()> {
        self.root.destroy(alloc)
    }

    /// Debug consistency check of the whole tree.
    ///
    /// # Errors
    ///
    /// Returns `CorruptData` on any violation.
    pub fn verify(&self, alloc: &dyn Allocator) -> Result<()> {
        let mut visited = FxHashSet::default();
        self.root.verify_into(alloc, &mut visited)?;
        Self::verify_node(alloc, &self.root, self.refs)?;

        Ok(())
    }

    /// Structural check of the tree shape only (no region walking).
    pub(crate) fn verify_tree(&self, alloc: &dyn Allocator) -> Result<()> {
        Self::verify_node(alloc, &self.root, self.refs).map(|_| ())
    }

    /// Size of the column rooted at `root_ref` without building a handle
    /// chain; a cheap peek at the length bookkeeping.
    pub(crate) fn peek_size(alloc: &dyn Allocator, root_ref: Ref) -> Result<usize> {
        let root = Array::from_ref(alloc, root_ref, None)?;
        Self::subtree_count(alloc, &root)
    }

    /// Writes the tree as a graphviz digraph.
    ///
    /// # Errors
    ///
    /// Returns an error if the writer fails.
    pub fn to_dot<W: std::io::Write>(&self, alloc: &dyn Allocator, writer: &mut W) -> Result<()> {
        writeln!(writer, "digraph column {{")?;
        self.root.to_dot(alloc, writer)?;
        writeln!(writer, "}}")?;

        Ok(())
    }

    // --- tree internals ---

    fn offsets_of(alloc: &dyn Allocator, node: &Array) -> Result<Array> {
        debug_assert!(!node.is_leaf());

        Array::from_ref(
            alloc,
            node.get_as_ref(alloc, 0),
            Some(ParentSlot {
                array: node.get_ref(),
                index: 0,
            }),
        )
    }

    fn subtree_count(alloc: &dyn Allocator, node: &Array) -> Result<usize> {
        if node.is_leaf() {
            return Ok(node.len());
        }

        let offsets = Self::offsets_of(alloc, node)?;

        if offsets.is_empty() {
            return Ok(0);
        }

        Ok(offsets.get(alloc, offsets.len() - 1) as usize)
    }

    /// Child covering `index`; `index` must be strictly inside the node.
    ///
    /// Returns (child, local index, slot in node, child position).
    fn locate(
        alloc: &dyn Allocator,
        node: &Array,
        index: usize,
    ) -> Result<(Array, usize, usize, usize)> {
        let offsets = Self::offsets_of(alloc, node)?;
        let count = offsets.len();

        // Binary search for the first child whose cumulative count exceeds
        // the index
        let mut left = 0;
        let mut right = count;

        while left < right {
            let mid = (left + right) / 2;

            if offsets.get(alloc, mid) as usize <= index {
                left = mid + 1;
            } else {
                right = mid;
            }
        }

        assert!(left < count, "index out of range");

        let base = if left == 0 {
            0
        } else {
            offsets.get(alloc, left - 1) as usize
        };

        let child = Array::from_ref(alloc, node.get_as_ref(alloc, 1 + left), None)?;

        Ok((child, index - base, 1 + left, left))
    }

    /// Like [`Self::locate`], but an index one past the end maps into the
    /// last child (append goes into the rightmost leaf).
    fn locate_for_insert(
        alloc: &dyn Allocator,
        node: &Array,
        index: usize,
    ) -> Result<(Array, usize, usize, usize)> {
        let offsets = Self::offsets_of(alloc, node)?;
        let count = offsets.len();
        let total = if count == 0 {
            0
        } else {
            offsets.get(alloc, count - 1) as usize
        };

        if index < total {
            return Self::locate(alloc, node, index);
        }

        assert!(index == total, "index out of range");
        assert!(count > 0, "inner node without children");

        let base = if count == 1 {
            0
        } else {
            offsets.get(alloc, count - 2) as usize
        };

        let child = Array::from_ref(alloc, node.get_as_ref(alloc, count), None)?;

        Ok((child, index - base, count, count - 1))
    }

    fn sync_child(
        alloc: &mut dyn Allocator,
        node: &mut Array,
        slot: usize,
        child_ref: Ref,
    ) -> Result<()> {
        if node.get_as_ref(alloc, slot) != child_ref {
            node.set(alloc, slot, *child_ref as i64)?;
        }

        Ok(())
    }

    fn node_set(
        alloc: &mut dyn Allocator,
        node: &mut Array,
        index: usize,
        value: i64,
    ) -> Result<()> {
        node.ensure_writable(alloc)?;

        if node.is_leaf() {
            return node.set(alloc, index, value);
        }

        let (mut child, local, slot, _) = Self::locate(alloc, node, index)?;
        Self::node_set(alloc, &mut child, local, value)?;
        Self::sync_child(alloc, node, slot, child.get_ref())
    }

    fn node_insert(
        alloc: &mut dyn Allocator,
        node: &mut Array,
        index: usize,
        value: i64,
    ) -> Result<Option<NodeSplit>> {
        node.ensure_writable(alloc)?;

        if node.is_leaf() {
            return Self::leaf_insert(alloc, node, index, value);
        }

        let (mut child, local, slot, k) = Self::locate_for_insert(alloc, node, index)?;
        let child_split = Self::node_insert(alloc, &mut child, local, value)?;
        Self::sync_child(alloc, node, slot, child.get_ref())?;

        let mut offsets = Self::offsets_of(alloc, node)?;
        let count = offsets.len();

        for j in k..count {
            let v = offsets.get(alloc, j);
            offsets.set(alloc, j, v + 1)?;
        }

        if let Some(split) = child_split {
            let base = if k == 0 {
                0
            } else {
                offsets.get(alloc, k - 1) as usize
            };

            let left_count = Self::subtree_count(alloc, &child)?;

            offsets.set(alloc, k, (base + left_count) as i64)?;
            offsets.insert(alloc, k + 1, (base + left_count + split.right_count) as i64)?;
            node.insert(alloc, slot + 1, *split.right as i64)?;
        }

        let mut result = None;

        if node.len() - 1 > LEAF_MAX {
            result = Some(Self::split_inner(alloc, node, &mut offsets)?);
        }

        Self::sync_child(alloc, node, 0, offsets.get_ref())?;

        Ok(result)
    }

    fn leaf_insert(
        alloc: &mut dyn Allocator,
        leaf: &mut Array,
        index: usize,
        value: i64,
    ) -> Result<Option<NodeSplit>> {
        if leaf.len() < LEAF_MAX {
            leaf.insert(alloc, index, value)?;
            return Ok(None);
        }

        let kind = if leaf.has_refs() {
            Kind::HasRefs
        } else {
            Kind::Normal
        };

        let len = leaf.len();
        let mut right = Array::create(alloc, kind)?;

        if index == len {
            // Appending: the left leaf stays full, so append-only workloads
            // produce fully packed leaves
            right.add(alloc, value)?;
        } else {
            let half = len / 2;

            for i in half..len {
                let v = leaf.get(alloc, i);
                right.add(alloc, v)?;
            }

            leaf.truncate(alloc, half);

            if index <= half {
                leaf.insert(alloc, index, value)?;
            } else {
                right.insert(alloc, index - half, value)?;
            }
        }

        log::trace!(
            "column: leaf split, left {} ({}), right {} ({})",
            leaf.get_ref(),
            leaf.len(),
            right.get_ref(),
            right.len(),
        );

        Ok(Some(NodeSplit {
            right: right.get_ref(),
            right_count: right.len(),
        }))
    }

    fn split_inner(
        alloc: &mut dyn Allocator,
        node: &mut Array,
        offsets: &mut Array,
    ) -> Result<NodeSplit> {
        let count = node.len() - 1;
        let keep = count / 2;
        let total = offsets.get(alloc, count - 1) as usize;
        let cut = offsets.get(alloc, keep - 1) as usize;

        let mut right_offsets = Array::create(alloc, Kind::Normal)?;

        for j in keep..count {
            let v = offsets.get(alloc, j) - cut as i64;
            right_offsets.add(alloc, v)?;
        }

        let mut right = Array::create(alloc, Kind::Inner)?;
        right.add(alloc, *right_offsets.get_ref() as i64)?;

        for j in keep..count {
            let v = node.get(alloc, 1 + j);
            right.add(alloc, v)?;
        }

        node.truncate(alloc, 1 + keep);
        offsets.truncate(alloc, keep);

        log::trace!(
            "column: inner split, left {} children, right {} children",
            keep,
            count - keep,
        );

        Ok(NodeSplit {
            right: right.get_ref(),
            right_count: total - cut,
        })
    }

    fn grow_root(&mut self, alloc: &mut dyn Allocator, split: NodeSplit) -> Result<()> {
        let parent = self.root.parent();
        let left_ref = self.root.get_ref();
        let left_count = Self::subtree_count(alloc, &self.root)?;

        let mut offsets = Array::create(alloc, Kind::Normal)?;
        offsets.add(alloc, left_count as i64)?;
        offsets.add(alloc, (left_count + split.right_count) as i64)?;

        let mut new_root = Array::create(alloc, Kind::Inner)?;
        new_root.add(alloc, *offsets.get_ref() as i64)?;
        new_root.add(alloc, *left_ref as i64)?;
        new_root.add(alloc, *split.right as i64)?;
        new_root.set_parent(parent);

        log::trace!("column: root grows to {}", new_root.get_ref());

        self.root = new_root;

        Ok(())
    }

    fn node_remove(alloc: &mut dyn Allocator, node: &mut Array, index: usize) -> Result<()> {
        node.ensure_writable(alloc)?;

        if node.is_leaf() {
            return node.remove(alloc, index);
        }

        let (mut child, local, slot, k) = Self::locate(alloc, node, index)?;
        Self::node_remove(alloc, &mut child, local)?;
        Self::sync_child(alloc, node, slot, child.get_ref())?;

        let mut offsets = Self::offsets_of(alloc, node)?;
        let count = offsets.len();

        for j in k..count {
            let v = offsets.get(alloc, j);
            offsets.set(alloc, j, v - 1)?;
        }

        if Self::subtree_count(alloc, &child)? == 0 {
            child.destroy(alloc)?;
            node.remove(alloc, slot)?;
            offsets.remove(alloc, k)?;
        }

        Self::sync_child(alloc, node, 0, offsets.get_ref())
    }

    fn maybe_collapse_root(&mut self, alloc: &mut dyn Allocator) -> Result<()> {
        while !self.root.is_leaf() && self.root.len() == 2 {
            let parent = self.root.parent();
            let child_ref = self.root.get_as_ref(alloc, 1);

            let offsets = Self::offsets_of(alloc, &self.root)?;
            alloc.free(offsets.get_ref(), offsets.byte_size());
            alloc.free(self.root.get_ref(), self.root.byte_size());

            log::trace!("column: root collapses to {child_ref}");

            self.root = Array::from_ref(alloc, child_ref, parent)?;
        }

        Ok(())
    }

    fn walk<F>(
        alloc: &dyn Allocator,
        node: &Array,
        node_base: usize,
        start: usize,
        end: usize,
        f: &mut F,
    ) -> Result<Option<usize>>
    where
        F: FnMut(&Array, usize, usize, usize) -> Result<Option<usize>>,
    {
        if node.is_leaf() {
            return f(node, node_base, start, end);
        }

        let offsets = Self::offsets_of(alloc, node)?;
        let count = offsets.len();
        let mut prev = 0;

        for k in 0..count {
            let cum = offsets.get(alloc, k) as usize;

            if cum > start && prev < end {
                let child = Array::from_ref(alloc, node.get_as_ref(alloc, 1 + k), None)?;
                let local_start = start.saturating_sub(prev);
                let local_end = end.min(cum) - prev;

                if let Some(found) =
                    Self::walk(alloc, &child, node_base + prev, local_start, local_end, f)?
                {
                    return Ok(Some(found));
                }
            }

            if cum >= end {
                break;
            }

            prev = cum;
        }

        Ok(None)
    }

    fn verify_node(alloc: &dyn Allocator, node: &Array, refs: bool) -> Result<usize> {
        if node.is_leaf() {
            if node.len() > LEAF_MAX {
                return Err(Error::CorruptData("leaf exceeds fanout"));
            }

            if node.has_refs() != refs {
                return Err(Error::CorruptData("leaf cell kind mismatch"));
            }

            return Ok(node.len());
        }

        if !node.has_refs() {
            return Err(Error::CorruptData("inner node without refs flag"));
        }

        let offsets = Self::offsets_of(alloc, node)?;

        if offsets.len() != node.len() - 1 {
            return Err(Error::CorruptData("offsets out of sync with children"));
        }

        if node.len() - 1 > LEAF_MAX {
            return Err(Error::CorruptData("inner node exceeds fanout"));
        }

        let mut cum = 0;

        for k in 0..offsets.len() {
            let child = Array::from_ref(alloc, node.get_as_ref(alloc, 1 + k), None)?;
            cum += Self::verify_node(alloc, &child, refs)?;

            if offsets.get(alloc, k) as usize != cum {
                return Err(Error::CorruptData("cumulative counts do not add up"));
            }
        }

        Ok(cum)
    }
}
