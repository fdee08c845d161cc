// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! An embedded columnar table-engine core.
//!
//! ##### NOTE
//!
//! > This crate only provides the storage substrate of a table engine, not
//! > a full database. There is no query engine, no string columns and no
//! > multi-process access; those live in higher layers.
//!
//! ##### About
//!
//! Everything persisted is built from a single primitive: a bit-packed
//! integer array with an 8-byte header, living at a byte offset (a "ref")
//! inside an allocator-managed arena. Columns are positional B+-trees of
//! such arrays; tables glue columns together through a spec; and a column
//! cell can hold the ref of a child table, which gives recursive
//! tables-of-tables.
//!
//! Mutations never touch a committed snapshot. A region that belongs to
//! committed space is copied on write and the new ref bubbles up through
//! the parent chain to the root, so a reader holding an older root ref
//! keeps an unchanged, bit-exact view while a writer works.
//!
//! Child tables are handed out as cached, ref-counted wrappers: one live
//! wrapper per cell, owner tables pinned alive while any descendant
//! wrapper exists, and forced invalidation when the structure underneath
//! a wrapper is replaced.
//!
//! # Example usage
//!
//! ```
//! use colonnade::{ColumnSpec, MemAlloc, Table};
//!
//! let mut alloc = MemAlloc::new();
//!
//! // A table is a spec plus one column per spec entry
//! let table = Table::create(
//!     &mut alloc,
//!     &[
//!         ColumnSpec::Int,
//!         ColumnSpec::Subtable(vec![ColumnSpec::Int]),
//!     ],
//! )?;
//!
//! let row = table.add_row(&mut alloc)?;
//! table.set_int(&mut alloc, 0, row, 42)?;
//!
//! // Cells of a subtable column are tables themselves
//! let child = table.subtable(&mut alloc, 1, row)?;
//! child.add_row(&mut alloc)?;
//! child.set_int(&mut alloc, 0, 0, 7)?;
//!
//! assert_eq!(42, table.get_int(&alloc, 0, row)?);
//! assert_eq!(1, table.subtable_size(&alloc, 1, row)?);
//! assert_eq!(7, child.get_int(&alloc, 0, 0)?);
//! #
//! # Ok::<(), colonnade::Error>(())
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs, clippy::cargo)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::indexing_slicing)]
#![warn(clippy::pedantic, clippy::nursery)]
#![warn(clippy::expect_used)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::option_if_let_else)]

mod alloc;
mod array;
mod checksum;
mod coding;
mod column;
mod error;
mod file;
mod format_version;
mod table;

pub use alloc::{Allocator, MemAlloc, Ref, SlabAlloc};
pub use array::{
    Array, ArrayBlob, BasicArray, BasicType, Header, Kind, ParentSlot, Width, WriteType,
    HEADER_LEN,
};
pub use checksum::Checksum;
pub use coding::{Decode, DecodeError, Encode, EncodeError};
pub use column::{Column, SubtableColumn};
pub use error::{Error, Result};
pub use format_version::FormatVersion;
pub use table::{ColumnSpec, Table, TableRef};
