// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::width::Width;
use crate::{Error, Result};

/// Size of the packed array header in bytes.
pub const HEADER_LEN: usize = 8;

const MAX_24_BIT: usize = (1 << 24) - 1;

const FLAG_IS_LEAF: u8 = 0b0000_0001;
const FLAG_HAS_REFS: u8 = 0b0000_0010;
const FLAG_WTYPE_IGNORE: u8 = 0b0000_0100;
const WIDTH_SHIFT: u8 = 3;
const RESERVED_MASK: u8 = 0b1100_0000;

/// Sizing mode of an array payload
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WriteType {
    /// Elements are bit-packed at the header width
    Normal,

    /// Payload is raw bytes; the width field describes the element size but
    /// sizing is byte-granular (blobs, basic arrays)
    Ignore,
}

/// In-memory mirror of the 8-byte packed array header
///
/// Persisted layout (little-endian):
///
/// ```text
/// byte 0      flags: bit 0 is_leaf, bit 1 has_refs, bit 2 write type,
///             bits 3-5 width schema index, bits 6-7 reserved (zero)
/// bytes 1-3   element count, 24-bit little-endian
/// bytes 4-6   payload capacity in bytes, 24-bit little-endian
/// byte 7      reserved (zero)
/// ```
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Header {
    /// Terminal node (leaf) vs inner B+-tree node
    pub is_leaf: bool,

    /// Elements are refs to other arrays
    pub has_refs: bool,

    /// Sizing mode
    pub wtype: WriteType,

    /// Element bit width
    pub width: Width,

    /// Element count
    pub len: usize,

    /// Payload capacity in bytes (excluding the header itself)
    pub capacity: usize,
}

impl Header {
    /// Reads a header from the start of a region.
    ///
    /// # Errors
    ///
    /// Returns `CorruptData` if the region is too small or reserved bits
    /// are set.
    pub fn read_from(region: &[u8]) -> Result<Self> {
        let bytes: &[u8; HEADER_LEN] = region
            .get(..HEADER_LEN)
            .and_then(|b| b.try_into().ok())
            .ok_or(Error::CorruptData("region too small for array header"))?;

        let flags = bytes[0];

        if flags & RESERVED_MASK != 0 || bytes[7] != 0 {
            return Err(Error::CorruptData("reserved header bits set"));
        }

        let width = Width::from_index((flags >> WIDTH_SHIFT) & 0b111);
        let len = u32::from_le_bytes([bytes[1], bytes[2], bytes[3], 0]) as usize;
        let capacity = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], 0]) as usize;

        Ok(Self {
            is_leaf: flags & FLAG_IS_LEAF != 0,
            has_refs: flags & FLAG_HAS_REFS != 0,
            wtype: if flags & FLAG_WTYPE_IGNORE == 0 {
                WriteType::Normal
            } else {
                WriteType::Ignore
            },
            width,
            len,
            capacity,
        })
    }

    /// Writes the header to the start of a region.
    pub fn write_to(self, region: &mut [u8]) {
        debug_assert!(self.len <= MAX_24_BIT, "length exceeds 24-bit header field");
        debug_assert!(
            self.capacity <= MAX_24_BIT,
            "capacity exceeds 24-bit header field"
        );

        let mut flags = self.width.index() << WIDTH_SHIFT;

        if self.is_leaf {
            flags |= FLAG_IS_LEAF;
        }

        if self.has_refs {
            flags |= FLAG_HAS_REFS;
        }

        if self.wtype == WriteType::Ignore {
            flags |= FLAG_WTYPE_IGNORE;
        }

        let len = (self.len as u32).to_le_bytes();
        let capacity = (self.capacity as u32).to_le_bytes();

        let bytes: &mut [u8] = region
            .get_mut(..HEADER_LEN)
            .expect("region should fit an array header");

        bytes.copy_from_slice(&[
            flags,
            len[0],
            len[1],
            len[2],
            capacity[0],
            capacity[1],
            capacity[2],
            0,
        ]);
    }
}
