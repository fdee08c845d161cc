// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{table::Table, Allocator, Result};
use std::rc::Rc;

struct MapEntry {
    row: usize,
    table: Rc<Table>,
}

/// Registry of the live subtable wrappers of one column, keyed by row.
///
/// Purely in-memory, never persisted. A linear scan is fine: the number of
/// simultaneously live wrappers per column is expected to be tiny.
///
/// Invariant: at most one wrapper per row. An entry exists exactly while at
/// least one external handle to the wrapper is alive, so dropping an entry
/// never destroys a table out from under a holder.
#[derive(Default)]
pub(crate) struct SubtableMap {
    entries: Vec<MapEntry>,
}

impl SubtableMap {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> impl Iterator<Item = (usize, &Rc<Table>)> {
        self.entries.iter().map(|entry| (entry.row, &entry.table))
    }

    pub fn find(&self, row: usize) -> Option<&Rc<Table>> {
        self.entries
            .iter()
            .find(|entry| entry.row == row)
            .map(|entry| &entry.table)
    }

    pub fn insert(&mut self, row: usize, table: Rc<Table>) {
        debug_assert!(self.find(row).is_none(), "one wrapper per row");
        self.entries.push(MapEntry { row, table });
    }

    /// Removes the entry for `row`; infallible by design (swap-remove, no
    /// arena work).
    pub fn remove(&mut self, row: usize) -> Option<Rc<Table>> {
        let pos = self.entries.iter().position(|entry| entry.row == row)?;
        Some(self.entries.swap_remove(pos).table)
    }

    /// Moves the wrapper registered at `old_row` to `new_row` and rewrites
    /// its parent back-link.
    pub fn rekey(&mut self, old_row: usize, new_row: usize) {
        if let Some(entry) = self.entries.iter_mut().find(|entry| entry.row == old_row) {
            entry.row = new_row;
            entry.table.set_parent_row(new_row);
        }
    }

    /// Shifts every key at or above `from` up by one (a row was inserted).
    pub fn shift_up(&mut self, from: usize) {
        for entry in &mut self.entries {
            if entry.row >= from {
                entry.row += 1;
                entry.table.set_parent_row(entry.row);
            }
        }
    }

    /// Shifts every key above `after` down by one (a row was removed).
    pub fn shift_down(&mut self, after: usize) {
        for entry in &mut self.entries {
            if entry.row > after {
                entry.row -= 1;
                entry.table.set_parent_row(entry.row);
            }
        }
    }

    /// Re-reads every wrapper from its parent cell after an upstream remap.
    pub fn update_from_parents(&self, alloc: &dyn Allocator) -> Result<()> {
        for entry in &self.entries {
            entry.table.update_from_parent(alloc)?;
        }

        Ok(())
    }

    /// Dead-marks every wrapper and drops the registry.
    ///
    /// External handles keep the wrapper allocations alive; every operation
    /// through them fails from now on.
    pub fn invalidate_subtables(&mut self) {
        for entry in &self.entries {
            entry.table.invalidate();
        }

        self.entries.clear();
    }
}
