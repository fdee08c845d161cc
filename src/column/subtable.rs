// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{subtable_map::SubtableMap, Column};
use crate::{
    array::{Array, ParentSlot},
    table::{create_columns_for_spec, read_spec, ColumnKind, Table, TableParent, TableRef},
    Allocator, Error, Ref, Result,
};
use std::{
    cell::RefCell,
    rc::{Rc, Weak},
};

/// A column whose cells are refs to child-table structures.
///
/// This is both a column (the persisted ref sequence) and a table parent:
/// child wrappers call back into it when their top ref moves and when their
/// last holder releases them. All children share one persisted spec.
///
/// The column keeps its owner table alive while any child wrapper is live:
/// the registry's empty→non-empty edge takes a bind on the owner, the
/// reverse edge releases it. The coupling is driven by the edges, not by
/// every insertion, so it is reentrancy-safe.
pub struct SubtableColumn {
    col: Column,

    /// Shared spec of all children
    spec_ref: Ref,

    /// Index of this column within its owner table
    col_index: usize,

    owner: Weak<Table>,

    map: RefCell<SubtableMap>,

    /// Bind on the owner table, held exactly while the registry is
    /// non-empty
    pin: RefCell<Option<TableRef>>,
}

impl SubtableColumn {
    /// Creates a new empty subtable column whose children share `spec_ref`.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if the allocator cannot reserve the root.
    pub fn new(alloc: &mut dyn Allocator, spec_ref: Ref) -> Result<Self> {
        Ok(Self {
            col: Column::new_refs(alloc)?,
            spec_ref,
            col_index: 0,
            owner: Weak::new(),
            map: RefCell::new(SubtableMap::default()),
            pin: RefCell::new(None),
        })
    }

    /// Attaches to an existing subtable column root.
    ///
    /// # Errors
    ///
    /// Returns `CorruptData` if the structure is invalid.
    pub fn from_ref(
        alloc: &dyn Allocator,
        ref_: Ref,
        parent: Option<ParentSlot>,
        spec_ref: Ref,
    ) -> Result<Self> {
        Ok(Self {
            col: Column::from_ref(alloc, ref_, parent)?,
            spec_ref,
            col_index: 0,
            owner: Weak::new(),
            map: RefCell::new(SubtableMap::default()),
            pin: RefCell::new(None),
        })
    }

    pub(crate) fn set_owner(&mut self, owner: Weak<Table>, col_index: usize) {
        self.owner = owner;
        self.col_index = col_index;
    }

    /// The ref of the root array.
    #[must_use]
    pub fn get_ref(&self) -> Ref {
        self.col.get_ref()
    }

    /// Installs the back-link to the slot holding the root ref.
    pub fn set_parent(&mut self, parent: Option<ParentSlot>) {
        self.col.set_parent(parent);
    }

    /// Number of cells.
    ///
    /// # Errors
    ///
    /// Returns `CorruptData` if the tree is invalid.
    pub fn size(&self, alloc: &dyn Allocator) -> Result<usize> {
        self.col.size(alloc)
    }

    /// Whether all children share one persisted spec.
    ///
    /// A mixed-typed variant of this column would answer `false` and carry
    /// a spec per child.
    #[must_use]
    pub fn has_shared_spec(&self) -> bool {
        true
    }

    /// Number of live wrappers currently cached.
    #[must_use]
    pub fn cached_wrapper_count(&self) -> usize {
        self.map.borrow().len()
    }

    /// The live wrapper for `row`, materialized from the persisted ref if
    /// absent.
    ///
    /// The handle is constructed in here; no unbound pointer ever escapes.
    /// Materializing into an empty registry takes a bind on the owner
    /// table, so the owner stays alive as long as any descendant wrapper
    /// does.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` or `CorruptData` on materialization failure.
    pub fn subtable(&mut self, alloc: &mut dyn Allocator, row: usize) -> Result<TableRef> {
        assert!(row < self.col.size(alloc)?, "row out of range");

        if let Some(table) = self.map.borrow().find(row) {
            return Ok(TableRef::bind(table.clone()));
        }

        let mut columns_ref = self.col.get_as_ref(alloc, row)?;

        if columns_ref.is_null() {
            // Cell was never written; give it a real (empty) structure
            columns_ref = create_columns_for_spec(alloc, self.spec_ref)?;
            self.col.set(alloc, row, *columns_ref as i64)?;
        }

        let table = Table::attach_subtable(
            alloc,
            self.spec_ref,
            columns_ref,
            TableParent {
                owner: self.owner.clone(),
                col: self.col_index,
                row: std::cell::Cell::new(row),
            },
        )?;

        log::trace!(
            "subtable: materialized wrapper for column {}, row {row}",
            self.col_index,
        );

        let mut map = self.map.borrow_mut();
        let was_empty = map.is_empty();
        map.insert(row, table.clone());
        drop(map);

        if was_empty {
            if let Some(owner) = self.owner.upgrade() {
                *self.pin.borrow_mut() = Some(TableRef::bind(owner));
            }
        }

        Ok(TableRef::bind(table))
    }

    /// Row count of the child at `row` without materializing a wrapper.
    ///
    /// # Errors
    ///
    /// Returns `CorruptData` if the structure is invalid.
    pub fn subtable_size(&self, alloc: &dyn Allocator, row: usize) -> Result<usize> {
        let cell = self.col.get_as_ref(alloc, row)?;

        if cell.is_null() {
            return Ok(0);
        }

        let cols_arr = Array::from_ref(alloc, cell, None)?;

        if cols_arr.is_empty() {
            return Ok(0);
        }

        Column::peek_size(alloc, cols_arr.get_as_ref(alloc, 0))
    }

    /// Appends a fresh, empty child.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if the structure cannot grow.
    pub fn add_new(&mut self, alloc: &mut dyn Allocator) -> Result<()> {
        let size = self.col.size(alloc)?;
        self.insert_new(alloc, size)
    }

    /// Inserts a fresh, empty child at `row`.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if the structure cannot grow.
    pub fn insert_new(&mut self, alloc: &mut dyn Allocator, row: usize) -> Result<()> {
        let columns_ref = create_columns_for_spec(alloc, self.spec_ref)?;
        self.insert_cell(alloc, row, columns_ref)
    }

    /// Inserts a pre-built child structure at `row`.
    pub(crate) fn insert_cell(
        &mut self,
        alloc: &mut dyn Allocator,
        row: usize,
        columns_ref: Ref,
    ) -> Result<()> {
        self.col.insert(alloc, row, *columns_ref as i64)?;
        self.map.borrow_mut().shift_up(row);

        Ok(())
    }

    /// Replaces the child structure at `row`, destroying the old one. Any
    /// wrapper viewing the old structure is invalidated.
    ///
    /// Returns the owner bind to release if the registry emptied; the
    /// caller drops it outside its own state borrow.
    pub(crate) fn set_cell(
        &mut self,
        alloc: &mut dyn Allocator,
        row: usize,
        columns_ref: Ref,
    ) -> Result<Option<TableRef>> {
        let old_ref = self.col.get_as_ref(alloc, row)?;
        destroy_cell(alloc, old_ref)?;
        self.col.set(alloc, row, *columns_ref as i64)?;

        let mut map = self.map.borrow_mut();

        if let Some(old) = map.remove(row) {
            old.invalidate();
        }

        drop(map);

        Ok(self.unpin_if_empty())
    }

    /// Removes the child at `row`, shifting the suffix. The row's wrapper
    /// is invalidated; wrappers behind it follow their rows down.
    ///
    /// Returns the owner bind to release if the registry emptied.
    pub(crate) fn erase(
        &mut self,
        alloc: &mut dyn Allocator,
        row: usize,
    ) -> Result<Option<TableRef>> {
        let old_ref = self.col.get_as_ref(alloc, row)?;
        destroy_cell(alloc, old_ref)?;
        self.col.remove(alloc, row)?;

        let mut map = self.map.borrow_mut();

        if let Some(old) = map.remove(row) {
            old.invalidate();
        }

        map.shift_down(row);
        drop(map);

        Ok(self.unpin_if_empty())
    }

    /// Overwrites `row` with the last cell and truncates, keeping wrapper
    /// back-links intact: the wrapper viewing the moved child is re-keyed
    /// to `row`, the wrapper viewing the overwritten child is invalidated.
    ///
    /// Returns the owner bind to release if the registry emptied.
    pub(crate) fn move_last_over(
        &mut self,
        alloc: &mut dyn Allocator,
        row: usize,
    ) -> Result<Option<TableRef>> {
        let size = self.col.size(alloc)?;
        assert!(row < size, "row out of range");

        let last = size - 1;

        let row_ref = self.col.get_as_ref(alloc, row)?;
        destroy_cell(alloc, row_ref)?;

        if row < last {
            let moved = self.col.get_as_ref(alloc, last)?;
            self.col.set(alloc, row, *moved as i64)?;
        }

        self.col.remove(alloc, last)?;

        let mut map = self.map.borrow_mut();

        if let Some(old) = map.remove(row) {
            old.invalidate();
        }

        if row < last {
            map.rekey(last, row);
        }

        drop(map);

        Ok(self.unpin_if_empty())
    }

    /// Destroys every child structure and resets the column to an empty
    /// ref leaf; every wrapper is invalidated.
    ///
    /// Returns the owner bind to release if the registry was non-empty.
    pub(crate) fn clear(&mut self, alloc: &mut dyn Allocator) -> Result<Option<TableRef>> {
        // A one-leaf column does not own its cells' structures through the
        // tree teardown, so free them first
        if self.col.depth(alloc)? == 1 {
            let size = self.col.size(alloc)?;

            for row in 0..size {
                let row_ref = self.col.get_as_ref(alloc, row)?;
                destroy_cell(alloc, row_ref)?;
            }
        }

        self.col.clear(alloc)?;

        self.map.borrow_mut().invalidate_subtables();

        Ok(self.pin.borrow_mut().take())
    }

    /// Appends a deep copy of `src`'s rows as a new child.
    ///
    /// The schemas must match; this is trusted, not checked.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if the copy cannot allocate.
    pub fn add_from(&mut self, alloc: &mut dyn Allocator, src: &Table) -> Result<()> {
        let size = self.col.size(alloc)?;
        self.insert_from(alloc, size, src)
    }

    /// Inserts a deep copy of `src`'s rows as a new child at `row`.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if the copy cannot allocate.
    pub fn insert_from(
        &mut self,
        alloc: &mut dyn Allocator,
        row: usize,
        src: &Table,
    ) -> Result<()> {
        let columns_ref = src.clone_columns(alloc)?;
        self.insert_cell(alloc, row, columns_ref)
    }

    /// Replaces the child at `row` with a deep copy of `src`'s rows. Any
    /// wrapper viewing the old child is invalidated.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if the copy cannot allocate.
    pub fn set_from(&mut self, alloc: &mut dyn Allocator, row: usize, src: &Table) -> Result<()> {
        let columns_ref = src.clone_columns(alloc)?;
        let pin = self.set_cell(alloc, row, columns_ref)?;
        drop(pin);

        Ok(())
    }

    /// Appends `count` fresh, empty children.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if the structure cannot grow.
    pub fn fill(&mut self, alloc: &mut dyn Allocator, count: usize) -> Result<()> {
        for _ in 0..count {
            self.add_new(alloc)?;
        }

        Ok(())
    }

    /// A child reports that copy-on-write moved its top ref; the new ref
    /// is written into the child's cell.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if the cell write cannot allocate.
    pub(crate) fn update_child_ref(
        &mut self,
        alloc: &mut dyn Allocator,
        row: usize,
        new_ref: Ref,
    ) -> Result<()> {
        self.col.set(alloc, row, *new_ref as i64)
    }

    /// The persisted ref of the child at `row`.
    ///
    /// # Errors
    ///
    /// Returns `CorruptData` if the tree is invalid.
    pub(crate) fn child_ref(&self, alloc: &dyn Allocator, row: usize) -> Result<Ref> {
        self.col.get_as_ref(alloc, row)
    }

    /// A child wrapper's last holder released it: the registry entry is
    /// evicted and, if the registry emptied, the owner bind is released.
    ///
    /// Both returned values must be dropped outside the owner's state
    /// borrow.
    pub(crate) fn child_destroyed(&self, row: usize) -> (Option<Rc<Table>>, Option<TableRef>) {
        let mut map = self.map.borrow_mut();

        let removed = map.remove(row);
        debug_assert!(removed.is_some(), "wrapper should have been registered");

        drop(map);

        (removed, self.unpin_if_empty())
    }

    /// Re-reads the root from the parent slot; if it moved, every cached
    /// wrapper re-reads its cell too.
    ///
    /// # Errors
    ///
    /// Returns `CorruptData` if the structure is invalid.
    pub fn update_from_parent(&mut self, alloc: &dyn Allocator) -> Result<bool> {
        if !self.col.update_from_parent(alloc)? {
            return Ok(false);
        }

        self.update_wrappers(alloc)?;

        Ok(true)
    }

    /// Rebinds the root to `root_ref` and cascades into cached wrappers.
    pub(crate) fn reload_root(
        &mut self,
        alloc: &dyn Allocator,
        root_ref: Ref,
        parent: Option<ParentSlot>,
    ) -> Result<()> {
        if self.col.get_ref() == root_ref {
            self.col.set_parent(parent);
            return Ok(());
        }

        self.col = Column::from_ref(alloc, root_ref, parent)?;

        Ok(())
    }

    /// Propagates an upstream remap into every cached wrapper.
    pub(crate) fn update_wrappers(&self, alloc: &dyn Allocator) -> Result<()> {
        self.map.borrow().update_from_parents(alloc)
    }

    /// Dead-marks every cached wrapper and drops the registry.
    ///
    /// Returns the owner bind to release if the registry was non-empty.
    pub(crate) fn invalidate_subtables(&self) -> Option<TableRef> {
        self.map.borrow_mut().invalidate_subtables();
        self.pin.borrow_mut().take()
    }

    /// Writes this column's index into the path buffer, then continues
    /// with the owner table's ancestry. Returns the number of entries
    /// written, or `None` if the buffer is too small.
    pub(crate) fn record_subtable_path(
        &self,
        buf: &mut [usize],
        pos: usize,
        owner: &Table,
    ) -> Option<usize> {
        let slot = buf.get_mut(pos)?;
        *slot = self.col_index;

        owner.record_path_steps(buf, pos + 1)
    }

    /// Deep equality with another subtable column of the same shape.
    ///
    /// # Errors
    ///
    /// Returns `CorruptData` if either structure is invalid.
    pub fn compare_table(&self, alloc: &dyn Allocator, other: &Self) -> Result<bool> {
        let size = self.col.size(alloc)?;

        if size != other.col.size(alloc)? {
            return Ok(false);
        }

        for row in 0..size {
            let a = self.col.get_as_ref(alloc, row)?;
            let b = other.col.get_as_ref(alloc, row)?;

            if !tables_equal(alloc, self.spec_ref, a, other.spec_ref, b)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Structural check of the tree plus registry consistency.
    ///
    /// # Errors
    ///
    /// Returns `CorruptData` on any violation.
    pub(crate) fn verify(&self, alloc: &dyn Allocator) -> Result<()> {
        self.col.verify_tree(alloc)?;

        let size = self.col.size(alloc)?;
        let map = self.map.borrow();

        for (row, table) in map.entries() {
            if row >= size {
                return Err(Error::CorruptData("cached wrapper beyond column size"));
            }

            if table.top_ref() != self.col.get_as_ref(alloc, row)? {
                return Err(Error::CorruptData("cached wrapper out of sync with cell"));
            }
        }

        if map.is_empty() != self.pin.borrow().is_none() {
            return Err(Error::CorruptData("owner bind out of sync with registry"));
        }

        Ok(())
    }

    /// Recursively frees the column and every child structure.
    ///
    /// # Errors
    ///
    /// Returns `CorruptData` if the structure is invalid.
    pub fn destroy(self, alloc: &mut dyn Allocator) -> Result<()> {
        self.col.destroy(alloc)
    }

    fn unpin_if_empty(&self) -> Option<TableRef> {
        if self.map.borrow().is_empty() {
            self.pin.borrow_mut().take()
        } else {
            None
        }
    }
}

fn destroy_cell(alloc: &mut dyn Allocator, cell: Ref) -> Result<()> {
    if cell.is_null() {
        return Ok(());
    }

    Array::from_ref(alloc, cell, None)?.destroy(alloc)
}

/// Deep row-content equality of two table structures, compared through the
/// arena without materializing wrappers.
pub(crate) fn tables_equal(
    alloc: &dyn Allocator,
    spec_a: Ref,
    cols_a: Ref,
    spec_b: Ref,
    cols_b: Ref,
) -> Result<bool> {
    if cols_a == cols_b {
        return Ok(true);
    }

    if cols_a.is_null() {
        return table_is_empty(alloc, cols_b);
    }

    if cols_b.is_null() {
        return table_is_empty(alloc, cols_a);
    }

    let kinds_a = read_spec(alloc, spec_a)?;
    let kinds_b = read_spec(alloc, spec_b)?;

    if kinds_a.len() != kinds_b.len() {
        return Ok(false);
    }

    let arr_a = Array::from_ref(alloc, cols_a, None)?;
    let arr_b = Array::from_ref(alloc, cols_b, None)?;

    if arr_a.len() != kinds_a.len() || arr_b.len() != kinds_b.len() {
        return Err(Error::CorruptData("spec and columns disagree"));
    }

    for (i, ((kind_a, sub_a), (kind_b, sub_b))) in kinds_a.iter().zip(&kinds_b).enumerate() {
        if kind_a != kind_b {
            return Ok(false);
        }

        let root_a = arr_a.get_as_ref(alloc, i);
        let root_b = arr_b.get_as_ref(alloc, i);

        match kind_a {
            ColumnKind::Int => {
                let col_a = Column::from_ref(alloc, root_a, None)?;
                let col_b = Column::from_ref(alloc, root_b, None)?;

                if !col_a.compare(alloc, &col_b)? {
                    return Ok(false);
                }
            }
            ColumnKind::Subtable => {
                let col_a = Column::from_ref(alloc, root_a, None)?;
                let col_b = Column::from_ref(alloc, root_b, None)?;

                let rows = col_a.size(alloc)?;

                if rows != col_b.size(alloc)? {
                    return Ok(false);
                }

                for row in 0..rows {
                    let cell_a = col_a.get_as_ref(alloc, row)?;
                    let cell_b = col_b.get_as_ref(alloc, row)?;

                    if !tables_equal(alloc, *sub_a, cell_a, *sub_b, cell_b)? {
                        return Ok(false);
                    }
                }
            }
        }
    }

    Ok(true)
}

/// Whether the table structure at `cols_ref` holds no rows.
fn table_is_empty(alloc: &dyn Allocator, cols_ref: Ref) -> Result<bool> {
    if cols_ref.is_null() {
        return Ok(true);
    }

    let cols_arr = Array::from_ref(alloc, cols_ref, None)?;

    if cols_arr.is_empty() {
        return Ok(true);
    }

    Ok(Column::peek_size(alloc, cols_arr.get_as_ref(alloc, 0))? == 0)
}
