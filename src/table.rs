// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    array::{Array, Kind, ParentSlot},
    column::{subtable::SubtableColumn, Column},
    Allocator, Error, Ref, Result,
};
use rustc_hash::FxHashSet;
use std::{
    cell::{Cell, RefCell},
    rc::{Rc, Weak},
};

/// Schema of one column
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ColumnSpec {
    /// Signed 64-bit integers
    Int,

    /// Cells are child tables sharing the given schema
    Subtable(Vec<ColumnSpec>),
}

/// Persisted column kind codes
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum ColumnKind {
    Int,
    Subtable,
}

impl ColumnKind {
    fn code(self) -> i64 {
        match self {
            Self::Int => 0,
            Self::Subtable => 1,
        }
    }

    fn from_code(code: i64) -> Result<Self> {
        match code {
            0 => Ok(Self::Int),
            1 => Ok(Self::Subtable),
            _ => Err(Error::CorruptData("unknown column kind")),
        }
    }
}

pub(crate) enum ColumnHandle {
    Int(Column),
    Subtable(SubtableColumn),
}

/// Back-link of a subtable wrapper to the cell it lives in
pub(crate) struct TableParent {
    pub owner: Weak<Table>,
    pub col: usize,
    pub row: Cell<usize>,
}

struct TableState {
    /// Top array `[spec_ref, columns_ref]`; only root tables have one.
    /// Subtable wrappers share their spec and hang off a cell by their
    /// columns ref alone.
    top: Option<Array>,

    spec_ref: Ref,
    cols_arr: Array,
    cols: Vec<ColumnHandle>,
}

/// A table: an ordered spec plus one column per spec entry.
///
/// Exposed to the storage core only through the parent/child contract:
/// wrappers are handed out as [`TableRef`]s carrying an explicit ref-count,
/// and a wrapper's death or invalidation is reported back to the column
/// that materialized it.
///
/// All operations on an invalidated wrapper fail with `StaleSubtable`.
pub struct Table {
    inner: RefCell<TableState>,
    refcount: Cell<usize>,
    valid: Cell<bool>,
    parent: RefCell<Option<TableParent>>,
}

/// Counted handle to a [`Table`].
///
/// Every holder, inside the engine or outside, owns exactly one bind. When
/// the last handle drops, the wrapper reports its death to the column that
/// materialized it, which evicts the registry entry and unpins the owner
/// table.
pub struct TableRef {
    table: Rc<Table>,
}

impl TableRef {
    pub(crate) fn bind(table: Rc<Table>) -> Self {
        table.refcount.set(table.refcount.get() + 1);
        Self { table }
    }

    /// Whether two handles point at the same live wrapper.
    #[must_use]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Rc::ptr_eq(&a.table, &b.table)
    }
}

impl Clone for TableRef {
    fn clone(&self) -> Self {
        Self::bind(self.table.clone())
    }
}

impl std::ops::Deref for TableRef {
    type Target = Table;

    fn deref(&self) -> &Self::Target {
        &self.table
    }
}

impl Drop for TableRef {
    fn drop(&mut self) {
        let count = self.table.refcount.get() - 1;
        self.table.refcount.set(count);

        if count > 0 {
            return;
        }

        // Last holder gone. A live wrapper reports back to the column that
        // materialized it; an invalidated one was already evicted.
        if !self.table.valid.get() {
            return;
        }

        let link = {
            let parent = self.table.parent.borrow();
            parent
                .as_ref()
                .map(|p| (p.owner.clone(), p.col, p.row.get()))
        };

        if let Some((owner, col, row)) = link {
            if let Some(owner) = owner.upgrade() {
                owner.subtable_child_destroyed(col, row);
            }
        }
    }
}

impl Table {
    /// Creates a new root table with the given schema and returns the first
    /// handle to it.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if the allocator cannot reserve the structure.
    pub fn create(alloc: &mut dyn Allocator, spec: &[ColumnSpec]) -> Result<TableRef> {
        let spec_ref = build_spec(alloc, spec)?;
        let columns_ref = create_columns_for_spec(alloc, spec_ref)?;

        let mut top = Array::create(alloc, Kind::HasRefs)?;
        top.add(alloc, *spec_ref as i64)?;
        top.add(alloc, *columns_ref as i64)?;

        log::trace!("table: created root, top {}", top.get_ref());

        let table = Self::attach_rc(alloc, Some(top), spec_ref, columns_ref, None)?;
        Ok(TableRef::bind(table))
    }

    /// Attaches to an existing root table by its top ref, e.g. after
    /// reopening a persisted arena or to read an older snapshot.
    ///
    /// # Errors
    ///
    /// Returns `CorruptData` if the structure is invalid.
    pub fn open(alloc: &dyn Allocator, top_ref: Ref) -> Result<TableRef> {
        let top = Array::from_ref(alloc, top_ref, None)?;

        if top.len() != 2 {
            return Err(Error::CorruptData("table top should hold spec and columns"));
        }

        let spec_ref = top.get_as_ref(alloc, 0);
        let columns_ref = top.get_as_ref(alloc, 1);

        let table = Self::attach_rc(alloc, Some(top), spec_ref, columns_ref, None)?;
        Ok(TableRef::bind(table))
    }

    /// Materializes a subtable wrapper for a cell.
    pub(crate) fn attach_subtable(
        alloc: &dyn Allocator,
        spec_ref: Ref,
        columns_ref: Ref,
        parent: TableParent,
    ) -> Result<Rc<Self>> {
        Self::attach_rc(alloc, None, spec_ref, columns_ref, Some(parent))
    }

    fn attach_rc(
        alloc: &dyn Allocator,
        top: Option<Array>,
        spec_ref: Ref,
        columns_ref: Ref,
        parent: Option<TableParent>,
    ) -> Result<Rc<Self>> {
        let state = Self::load_state(alloc, top, spec_ref, columns_ref)?;

        let table = Rc::new(Self {
            inner: RefCell::new(state),
            refcount: Cell::new(0),
            valid: Cell::new(true),
            parent: RefCell::new(parent),
        });

        let weak = Rc::downgrade(&table);

        {
            let mut st = table.inner.borrow_mut();

            for (i, col) in st.cols.iter_mut().enumerate() {
                if let ColumnHandle::Subtable(s) = col {
                    s.set_owner(weak.clone(), i);
                }
            }
        }

        Ok(table)
    }

    fn load_state(
        alloc: &dyn Allocator,
        top: Option<Array>,
        spec_ref: Ref,
        columns_ref: Ref,
    ) -> Result<TableState> {
        let cols_parent = top.as_ref().map(|t| ParentSlot {
            array: t.get_ref(),
            index: 1,
        });

        let cols_arr = Array::from_ref(alloc, columns_ref, cols_parent)?;
        let spec = read_spec(alloc, spec_ref)?;

        if spec.len() != cols_arr.len() {
            return Err(Error::CorruptData("spec and columns disagree"));
        }

        let mut cols = Vec::with_capacity(spec.len());

        for (i, (kind, subspec)) in spec.iter().enumerate() {
            let root_ref = cols_arr.get_as_ref(alloc, i);
            let slot = Some(ParentSlot {
                array: cols_arr.get_ref(),
                index: i,
            });

            cols.push(match kind {
                ColumnKind::Int => ColumnHandle::Int(Column::from_ref(alloc, root_ref, slot)?),
                ColumnKind::Subtable => ColumnHandle::Subtable(SubtableColumn::from_ref(
                    alloc, root_ref, slot, *subspec,
                )?),
            });
        }

        Ok(TableState {
            top,
            spec_ref,
            cols_arr,
            cols,
        })
    }

    fn ensure_valid(&self) -> Result<()> {
        if self.valid.get() {
            Ok(())
        } else {
            Err(Error::StaleSubtable)
        }
    }

    /// Whether this wrapper is still usable.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.valid.get()
    }

    /// The ref a parent (or the arena root) holds for this table: the top
    /// array for root tables, the columns array for subtable wrappers.
    #[must_use]
    pub fn top_ref(&self) -> Ref {
        let st = self.inner.borrow();

        st.top
            .as_ref()
            .map_or_else(|| st.cols_arr.get_ref(), Array::get_ref)
    }

    /// Number of columns.
    #[must_use]
    pub fn column_count(&self) -> usize {
        self.inner.borrow().cols.len()
    }

    /// Number of rows.
    ///
    /// # Errors
    ///
    /// Returns `StaleSubtable` on an invalidated wrapper.
    pub fn row_count(&self, alloc: &dyn Allocator) -> Result<usize> {
        self.ensure_valid()?;

        let st = self.inner.borrow();

        match st.cols.first() {
            Some(ColumnHandle::Int(c)) => c.size(alloc),
            Some(ColumnHandle::Subtable(s)) => s.size(alloc),
            None => Ok(0),
        }
    }

    /// Appends a row of defaults (zeroes / empty subtables); returns its
    /// index.
    ///
    /// # Errors
    ///
    /// Returns `StaleSubtable` on an invalidated wrapper, `OutOfMemory` if
    /// the structure cannot grow.
    pub fn add_row(&self, alloc: &mut dyn Allocator) -> Result<usize> {
        let row = self.row_count(alloc)?;
        self.insert_row(alloc, row)?;

        Ok(row)
    }

    /// Inserts a row of defaults at `row`.
    ///
    /// # Errors
    ///
    /// Returns `StaleSubtable` on an invalidated wrapper, `OutOfMemory` if
    /// the structure cannot grow.
    pub fn insert_row(&self, alloc: &mut dyn Allocator, row: usize) -> Result<()> {
        self.ensure_valid()?;

        let changed = {
            let mut st = self.inner.borrow_mut();
            let st = &mut *st;

            for col in &mut st.cols {
                match col {
                    ColumnHandle::Int(c) => c.insert(alloc, row, 0)?,
                    ColumnHandle::Subtable(s) => s.insert_new(alloc, row)?,
                }
            }

            Self::sync_state(st, alloc)?
        };

        if changed {
            self.propagate(alloc)?;
        }

        Ok(())
    }

    /// Removes the row at `row`, shifting the suffix.
    ///
    /// # Errors
    ///
    /// Returns `StaleSubtable` on an invalidated wrapper.
    pub fn remove_row(&self, alloc: &mut dyn Allocator, row: usize) -> Result<()> {
        self.ensure_valid()?;

        let (changed, pins) = {
            let mut st = self.inner.borrow_mut();
            let st = &mut *st;

            let mut pins = Vec::new();

            for col in &mut st.cols {
                match col {
                    ColumnHandle::Int(c) => c.remove(alloc, row)?,
                    ColumnHandle::Subtable(s) => pins.push(s.erase(alloc, row)?),
                }
            }

            (Self::sync_state(st, alloc)?, pins)
        };

        drop(pins);

        if changed {
            self.propagate(alloc)?;
        }

        Ok(())
    }

    /// Overwrites `row` with the last row and truncates, an O(1) delete
    /// that does not shift the suffix. Wrappers viewing the moved row
    /// follow it; wrappers viewing the overwritten row are invalidated.
    ///
    /// # Errors
    ///
    /// Returns `StaleSubtable` on an invalidated wrapper.
    pub fn move_last_over(&self, alloc: &mut dyn Allocator, row: usize) -> Result<()> {
        self.ensure_valid()?;

        let (changed, pins) = {
            let mut st = self.inner.borrow_mut();
            let st = &mut *st;

            let mut pins = Vec::new();

            for col in &mut st.cols {
                match col {
                    ColumnHandle::Int(c) => {
                        let last = c.size(alloc)?.checked_sub(1).expect("row should exist");
                        let value = c.get(alloc, last)?;
                        c.set(alloc, row, value)?;
                        c.remove(alloc, last)?;
                    }
                    ColumnHandle::Subtable(s) => pins.push(s.move_last_over(alloc, row)?),
                }
            }

            (Self::sync_state(st, alloc)?, pins)
        };

        drop(pins);

        if changed {
            self.propagate(alloc)?;
        }

        Ok(())
    }

    /// Removes every row.
    ///
    /// # Errors
    ///
    /// Returns `StaleSubtable` on an invalidated wrapper.
    pub fn clear_rows(&self, alloc: &mut dyn Allocator) -> Result<()> {
        self.ensure_valid()?;

        let (changed, pins) = {
            let mut st = self.inner.borrow_mut();
            let st = &mut *st;

            let mut pins = Vec::new();

            for col in &mut st.cols {
                match col {
                    ColumnHandle::Int(c) => c.clear(alloc)?,
                    ColumnHandle::Subtable(s) => pins.push(s.clear(alloc)?),
                }
            }

            (Self::sync_state(st, alloc)?, pins)
        };

        drop(pins);

        if changed {
            self.propagate(alloc)?;
        }

        Ok(())
    }

    /// The integer at (`col`, `row`).
    ///
    /// # Errors
    ///
    /// Returns `StaleSubtable` on an invalidated wrapper.
    ///
    /// # Panics
    ///
    /// Panics if `col` is not an integer column.
    pub fn get_int(&self, alloc: &dyn Allocator, col: usize, row: usize) -> Result<i64> {
        self.ensure_valid()?;

        let st = self.inner.borrow();

        let Some(ColumnHandle::Int(c)) = st.cols.get(col) else {
            panic!("column {col} is not an integer column");
        };

        c.get(alloc, row)
    }

    /// Overwrites the integer at (`col`, `row`).
    ///
    /// # Errors
    ///
    /// Returns `StaleSubtable` on an invalidated wrapper.
    ///
    /// # Panics
    ///
    /// Panics if `col` is not an integer column.
    pub fn set_int(
        &self,
        alloc: &mut dyn Allocator,
        col: usize,
        row: usize,
        value: i64,
    ) -> Result<()> {
        self.ensure_valid()?;

        let changed = {
            let mut st = self.inner.borrow_mut();
            let st = &mut *st;

            let Some(ColumnHandle::Int(c)) = st.cols.get_mut(col) else {
                panic!("column {col} is not an integer column");
            };

            c.set(alloc, row, value)?;

            Self::sync_state(st, alloc)?
        };

        if changed {
            self.propagate(alloc)?;
        }

        Ok(())
    }

    /// The live wrapper for the subtable at (`col`, `row`), materializing
    /// it from the persisted ref if absent.
    ///
    /// At most one wrapper exists per cell; repeated calls hand out handles
    /// to the same wrapper.
    ///
    /// # Errors
    ///
    /// Returns `StaleSubtable` on an invalidated wrapper.
    ///
    /// # Panics
    ///
    /// Panics if `col` is not a subtable column.
    pub fn subtable(&self, alloc: &mut dyn Allocator, col: usize, row: usize) -> Result<TableRef> {
        self.ensure_valid()?;

        let (handle, changed) = {
            let mut st = self.inner.borrow_mut();
            let st = &mut *st;

            let Some(ColumnHandle::Subtable(s)) = st.cols.get_mut(col) else {
                panic!("column {col} is not a subtable column");
            };

            let handle = s.subtable(alloc, row)?;

            (handle, Self::sync_state(st, alloc)?)
        };

        if changed {
            self.propagate(alloc)?;
        }

        Ok(handle)
    }

    /// Row count of the subtable at (`col`, `row`) without materializing a
    /// wrapper.
    ///
    /// # Errors
    ///
    /// Returns `StaleSubtable` on an invalidated wrapper.
    ///
    /// # Panics
    ///
    /// Panics if `col` is not a subtable column.
    pub fn subtable_size(&self, alloc: &dyn Allocator, col: usize, row: usize) -> Result<usize> {
        self.ensure_valid()?;

        let st = self.inner.borrow();

        let Some(ColumnHandle::Subtable(s)) = st.cols.get(col) else {
            panic!("column {col} is not a subtable column");
        };

        s.subtable_size(alloc, row)
    }

    /// Resets the subtable at (`col`, `row`) to empty.
    ///
    /// # Errors
    ///
    /// Returns `StaleSubtable` on an invalidated wrapper.
    pub fn clear_subtable(&self, alloc: &mut dyn Allocator, col: usize, row: usize) -> Result<()> {
        let child = self.subtable(alloc, col, row)?;
        child.clear_rows(alloc)
    }

    /// Stores a copy of `src`'s rows into the subtable cell at
    /// (`col`, `row`). The schemas must match; this is trusted, not
    /// checked.
    ///
    /// # Errors
    ///
    /// Returns `StaleSubtable` on an invalidated wrapper.
    ///
    /// # Panics
    ///
    /// Panics if `col` is not a subtable column.
    pub fn set_subtable(
        &self,
        alloc: &mut dyn Allocator,
        col: usize,
        row: usize,
        src: &Table,
    ) -> Result<()> {
        self.ensure_valid()?;
        src.ensure_valid()?;

        let cloned = src.clone_columns(alloc)?;

        let (changed, pin) = {
            let mut st = self.inner.borrow_mut();
            let st = &mut *st;

            let Some(ColumnHandle::Subtable(s)) = st.cols.get_mut(col) else {
                panic!("column {col} is not a subtable column");
            };

            let pin = s.set_cell(alloc, row, cloned)?;

            (Self::sync_state(st, alloc)?, pin)
        };

        drop(pin);

        if changed {
            self.propagate(alloc)?;
        }

        Ok(())
    }

    /// Number of live wrappers cached for the subtable column `col`.
    ///
    /// # Panics
    ///
    /// Panics if `col` is not a subtable column.
    #[must_use]
    pub fn cached_subtable_count(&self, col: usize) -> usize {
        let st = self.inner.borrow();

        let Some(ColumnHandle::Subtable(s)) = st.cols.get(col) else {
            panic!("column {col} is not a subtable column");
        };

        s.cached_wrapper_count()
    }

    /// Deep row-content equality with another table of the same shape.
    ///
    /// # Errors
    ///
    /// Returns `StaleSubtable` if either wrapper is invalidated.
    pub fn compare_rows(&self, alloc: &dyn Allocator, other: &Table) -> Result<bool> {
        self.ensure_valid()?;
        other.ensure_valid()?;

        if std::ptr::eq(self, other) {
            return Ok(true);
        }

        let a = self.inner.borrow();
        let b = other.inner.borrow();

        crate::column::subtable::tables_equal(
            alloc,
            a.spec_ref,
            a.cols_arr.get_ref(),
            b.spec_ref,
            b.cols_arr.get_ref(),
        )
    }

    /// Deep-copies this table's columns structure into `alloc` and returns
    /// the ref of the copy.
    ///
    /// # Errors
    ///
    /// Returns `StaleSubtable` on an invalidated wrapper.
    pub fn clone_columns(&self, alloc: &mut dyn Allocator) -> Result<Ref> {
        self.ensure_valid()?;

        let cols_ref = self.inner.borrow().cols_arr.get_ref();
        Array::clone_deep(alloc, cols_ref)
    }

    /// Records the location of this table inside its ancestors as
    /// `[row, column, row, column, …]`, leaf outward. Returns the number of
    /// entries written, or `None` if `buf` is too small (recoverable:
    /// retry with a larger buffer).
    #[must_use]
    pub fn record_subtable_path(&self, buf: &mut [usize]) -> Option<usize> {
        self.record_path_steps(buf, 0)
    }

    pub(crate) fn record_path_steps(&self, buf: &mut [usize], pos: usize) -> Option<usize> {
        let link = {
            let parent = self.parent.borrow();
            parent
                .as_ref()
                .map(|p| (p.owner.clone(), p.col, p.row.get()))
        };

        let Some((owner, col, row)) = link else {
            return Some(pos);
        };

        let slot = buf.get_mut(pos)?;
        *slot = row;

        let owner = owner.upgrade()?;
        let st = owner.inner.borrow();

        let Some(ColumnHandle::Subtable(s)) = st.cols.get(col) else {
            return None;
        };

        s.record_subtable_path(buf, pos + 1, &owner)
    }

    /// Re-reads the parent cell to learn whether this table's structure
    /// was remapped upstream; refreshes all columns and cascades into live
    /// child wrappers. Returns true if anything moved.
    ///
    /// # Errors
    ///
    /// Returns `CorruptData` if the re-read structure is invalid.
    pub fn update_from_parent(&self, alloc: &dyn Allocator) -> Result<bool> {
        if !self.valid.get() {
            return Ok(false);
        }

        let link = {
            let parent = self.parent.borrow();
            parent
                .as_ref()
                .map(|p| (p.owner.clone(), p.col, p.row.get()))
        };

        let Some((owner, col, row)) = link else {
            // Root tables re-anchor through the arena root their holder
            // tracks; nothing to re-read here
            return Ok(false);
        };

        let Some(owner) = owner.upgrade() else {
            return Ok(false);
        };

        let cell = owner.subtable_child_ref(alloc, col, row)?;

        {
            let st = self.inner.borrow();

            if cell == st.cols_arr.get_ref() {
                return Ok(false);
            }
        }

        self.refresh(alloc, cell)?;

        Ok(true)
    }

    /// Reloads all column handles from `new_cols_ref`, then cascades into
    /// cached child wrappers.
    fn refresh(&self, alloc: &dyn Allocator, new_cols_ref: Ref) -> Result<()> {
        {
            let mut st = self.inner.borrow_mut();
            let st = &mut *st;

            let cols_parent = st.top.as_ref().map(|t| ParentSlot {
                array: t.get_ref(),
                index: 1,
            });

            st.cols_arr = Array::from_ref(alloc, new_cols_ref, cols_parent)?;

            for (i, col) in st.cols.iter_mut().enumerate() {
                let root_ref = st.cols_arr.get_as_ref(alloc, i);
                let slot = Some(ParentSlot {
                    array: st.cols_arr.get_ref(),
                    index: i,
                });

                match col {
                    ColumnHandle::Int(c) => {
                        if c.get_ref() != root_ref {
                            *c = Column::from_ref(alloc, root_ref, slot)?;
                        } else {
                            c.set_parent(slot);
                        }
                    }
                    ColumnHandle::Subtable(s) => s.reload_root(alloc, root_ref, slot)?,
                }
            }
        }

        // Cascade after releasing the state borrow: wrappers re-read their
        // cells through this table
        let st = self.inner.borrow();

        for col in &st.cols {
            if let ColumnHandle::Subtable(s) = col {
                s.update_wrappers(alloc)?;
            }
        }

        Ok(())
    }

    /// Dead-marks every live wrapper below this table and drops the
    /// registries.
    pub fn invalidate_subtables(&self) {
        let pins = {
            let st = self.inner.borrow();

            st.cols
                .iter()
                .filter_map(|col| match col {
                    ColumnHandle::Subtable(s) => Some(s.invalidate_subtables()),
                    ColumnHandle::Int(_) => None,
                })
                .collect::<Vec<_>>()
        };

        drop(pins);
    }

    /// Dead-marks this wrapper and everything below it. Operations through
    /// surviving handles fail with `StaleSubtable` from now on.
    pub(crate) fn invalidate(&self) {
        if !self.valid.get() {
            return;
        }

        self.valid.set(false);
        self.invalidate_subtables();
    }

    /// Debug consistency check of the whole table structure.
    ///
    /// # Errors
    ///
    /// Returns `CorruptData` on any violation, `StaleSubtable` on an
    /// invalidated wrapper.
    pub fn verify(&self, alloc: &dyn Allocator) -> Result<()> {
        self.ensure_valid()?;

        let st = self.inner.borrow();
        let mut visited = FxHashSet::default();

        if let Some(top) = &st.top {
            if top.get_as_ref(alloc, 0) != st.spec_ref {
                return Err(Error::CorruptData("top spec slot out of sync"));
            }

            if top.get_as_ref(alloc, 1) != st.cols_arr.get_ref() {
                return Err(Error::CorruptData("top columns slot out of sync"));
            }

            Array::from_ref(alloc, st.spec_ref, None)?.verify_into(alloc, &mut visited)?;
        }

        st.cols_arr.verify_into(alloc, &mut visited)?;

        let mut rows = None;

        for col in &st.cols {
            let size = match col {
                ColumnHandle::Int(c) => {
                    c.verify_tree(alloc)?;
                    c.size(alloc)?
                }
                ColumnHandle::Subtable(s) => {
                    s.verify(alloc)?;
                    s.size(alloc)?
                }
            };

            if *rows.get_or_insert(size) != size {
                return Err(Error::CorruptData("columns disagree on row count"));
            }
        }

        Ok(())
    }

    // --- callbacks from child wrappers ---

    /// Syncs column roots into the columns array and the columns array into
    /// the top array. Returns whether the outward-facing ref changed.
    fn sync_state(st: &mut TableState, alloc: &mut dyn Allocator) -> Result<bool> {
        let old_cols_ref = st.cols_arr.get_ref();

        for i in 0..st.cols.len() {
            let root_ref = match st.cols.get(i).expect("column should exist") {
                ColumnHandle::Int(c) => c.get_ref(),
                ColumnHandle::Subtable(s) => s.get_ref(),
            };

            if st.cols_arr.get_as_ref(alloc, i) != root_ref {
                st.cols_arr.set(alloc, i, *root_ref as i64)?;
            }
        }

        let cols_moved = st.cols_arr.get_ref() != old_cols_ref;

        if cols_moved {
            // Re-anchor the column back-links at the moved array
            for (i, col) in st.cols.iter_mut().enumerate() {
                let slot = Some(ParentSlot {
                    array: st.cols_arr.get_ref(),
                    index: i,
                });

                match col {
                    ColumnHandle::Int(c) => c.set_parent(slot),
                    ColumnHandle::Subtable(s) => s.set_parent(slot),
                }
            }
        }

        let Some(top) = &mut st.top else {
            return Ok(cols_moved);
        };

        if top.get_as_ref(alloc, 1) != st.cols_arr.get_ref() {
            top.set(alloc, 1, *st.cols_arr.get_ref() as i64)?;

            st.cols_arr.set_parent(Some(ParentSlot {
                array: top.get_ref(),
                index: 1,
            }));
        }

        // Root tables surface their new top ref through `top_ref`
        Ok(false)
    }

    fn propagate(&self, alloc: &mut dyn Allocator) -> Result<()> {
        let link = {
            let parent = self.parent.borrow();
            parent
                .as_ref()
                .map(|p| (p.owner.clone(), p.col, p.row.get()))
        };

        let Some((owner, col, row)) = link else {
            return Ok(());
        };

        let Some(owner) = owner.upgrade() else {
            return Ok(());
        };

        let new_ref = self.inner.borrow().cols_arr.get_ref();
        owner.subtable_update_child_ref(alloc, col, row, new_ref)
    }

    pub(crate) fn subtable_update_child_ref(
        &self,
        alloc: &mut dyn Allocator,
        col: usize,
        row: usize,
        new_ref: Ref,
    ) -> Result<()> {
        let changed = {
            let mut st = self.inner.borrow_mut();
            let st = &mut *st;

            let Some(ColumnHandle::Subtable(s)) = st.cols.get_mut(col) else {
                return Err(Error::CorruptData("child ref update on non-subtable column"));
            };

            s.update_child_ref(alloc, row, new_ref)?;

            Self::sync_state(st, alloc)?
        };

        if changed {
            self.propagate(alloc)?;
        }

        Ok(())
    }

    pub(crate) fn subtable_child_ref(
        &self,
        alloc: &dyn Allocator,
        col: usize,
        row: usize,
    ) -> Result<Ref> {
        let st = self.inner.borrow();

        let Some(ColumnHandle::Subtable(s)) = st.cols.get(col) else {
            return Err(Error::CorruptData("child ref lookup on non-subtable column"));
        };

        s.child_ref(alloc, row)
    }

    pub(crate) fn subtable_child_destroyed(&self, col: usize, row: usize) {
        let dropped = {
            let st = self.inner.borrow();

            match st.cols.get(col) {
                Some(ColumnHandle::Subtable(s)) => Some(s.child_destroyed(row)),
                _ => None,
            }
        };

        // Entry and pin drop outside the state borrow: the pin may take the
        // owner's own ref-count to zero and recurse upward
        drop(dropped);
    }

    pub(crate) fn set_parent_row(&self, row: usize) {
        let parent = self.parent.borrow();

        if let Some(p) = parent.as_ref() {
            p.row.set(row);
        }
    }
}

// --- spec plumbing ---

/// Builds the persisted spec structure `[types_ref, subspecs_ref]`.
pub(crate) fn build_spec(alloc: &mut dyn Allocator, cols: &[ColumnSpec]) -> Result<Ref> {
    let mut types = Array::create(alloc, Kind::Normal)?;
    let mut subspecs = Array::create(alloc, Kind::HasRefs)?;

    for col in cols {
        match col {
            ColumnSpec::Int => {
                types.add(alloc, ColumnKind::Int.code())?;
                subspecs.add(alloc, 0)?;
            }
            ColumnSpec::Subtable(sub) => {
                types.add(alloc, ColumnKind::Subtable.code())?;
                let subspec_ref = build_spec(alloc, sub)?;
                subspecs.add(alloc, *subspec_ref as i64)?;
            }
        }
    }

    let mut spec = Array::create(alloc, Kind::HasRefs)?;
    spec.add(alloc, *types.get_ref() as i64)?;
    spec.add(alloc, *subspecs.get_ref() as i64)?;

    Ok(spec.get_ref())
}

/// Reads the persisted spec into (kind, subspec ref) pairs.
pub(crate) fn read_spec(alloc: &dyn Allocator, spec_ref: Ref) -> Result<Vec<(ColumnKind, Ref)>> {
    let spec = Array::from_ref(alloc, spec_ref, None)?;

    if spec.len() != 2 {
        return Err(Error::CorruptData("spec should hold types and subspecs"));
    }

    let types = Array::from_ref(alloc, spec.get_as_ref(alloc, 0), None)?;
    let subspecs = Array::from_ref(alloc, spec.get_as_ref(alloc, 1), None)?;

    if types.len() != subspecs.len() {
        return Err(Error::CorruptData("types and subspecs disagree"));
    }

    let mut out = Vec::with_capacity(types.len());

    for i in 0..types.len() {
        let kind = ColumnKind::from_code(types.get(alloc, i))?;
        let subspec = subspecs.get_as_ref(alloc, i);

        if kind == ColumnKind::Subtable && subspec.is_null() {
            return Err(Error::CorruptData("subtable column without subspec"));
        }

        out.push((kind, subspec));
    }

    Ok(out)
}

/// Creates an empty columns structure for the given spec and returns its
/// ref.
pub(crate) fn create_columns_for_spec(alloc: &mut dyn Allocator, spec_ref: Ref) -> Result<Ref> {
    let spec = read_spec(alloc, spec_ref)?;

    let mut cols_arr = Array::create(alloc, Kind::HasRefs)?;

    for (kind, _) in spec {
        let root_ref = match kind {
            ColumnKind::Int => Column::new(alloc)?.get_ref(),
            ColumnKind::Subtable => Column::new_refs(alloc)?.get_ref(),
        };

        cols_arr.add(alloc, *root_ref as i64)?;
    }

    Ok(cols_arr.get_ref())
}
