// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{round_up, Allocator, Ref, ARENA_BASE, MAX_REGION_SIZE};
use crate::{
    coding::{Decode, Encode},
    file::{rewrite_atomic, seal, FileHeader},
    Checksum, Error, FormatVersion, Result,
};
use byteorder::{LittleEndian, ReadBytesExt};
use std::{io::Cursor, path::Path};

/// Persistent arena with copy-on-write discipline.
///
/// All bytes below the watermark belong to the last committed snapshot and
/// are read-only; mutations of structures living there must go through
/// copy-on-write into the mutable slab above the watermark. [`commit`]
/// advances the watermark over everything written so far, turning the
/// current state into the next immutable snapshot.
///
/// Readers that hold a root ref from an earlier commit keep seeing exactly
/// the bytes serialized at that commit: committed space is never rewritten
/// and never recycled while the arena is open.
///
/// [`commit`]: SlabAlloc::commit
pub struct SlabAlloc {
    data: Vec<u8>,
    watermark: usize,
    free_list: Vec<(Ref, usize)>,

    /// Space released below the watermark
    ///
    /// Tracked so `free_bytes` can report it, but never recycled while the
    /// arena is open: open snapshots may still reference it.
    freed_committed: Vec<(Ref, usize)>,

    root: Ref,
    max_size: Option<usize>,
}

impl Default for SlabAlloc {
    fn default() -> Self {
        Self::new()
    }
}

impl SlabAlloc {
    /// Creates an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: vec![0; ARENA_BASE],
            watermark: ARENA_BASE,
            free_list: Vec::new(),
            freed_committed: Vec::new(),
            root: Ref::NULL,
            max_size: None,
        }
    }

    /// Creates an arena that refuses to grow beyond `max_size` bytes.
    #[must_use]
    pub fn with_max_size(max_size: usize) -> Self {
        let mut this = Self::new();
        this.max_size = Some(max_size);
        this
    }

    /// Opens a persisted arena file.
    ///
    /// Everything in the file becomes the committed, read-only baseline.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure, bad magic, unknown format version
    /// or checksum mismatch.
    pub fn open(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;

        let (payload, trailer) = bytes
            .split_at_checked(bytes.len().wrapping_sub(std::mem::size_of::<u64>()))
            .ok_or(Error::CorruptData("arena file truncated"))?;

        let expected = Checksum::from_raw(Cursor::new(trailer).read_u64::<LittleEndian>()?);
        let got = Checksum::of(payload);

        if got != expected {
            return Err(Error::InvalidChecksum((got, expected)));
        }

        let mut reader = Cursor::new(payload);
        let header = FileHeader::decode_from(&mut reader)?;

        let data = payload
            .get(FileHeader::serialized_len()..)
            .ok_or(Error::CorruptData("arena file truncated"))?;

        if data.len() as u64 != header.arena_len || data.len() < ARENA_BASE {
            return Err(Error::CorruptData("arena length mismatch"));
        }

        log::debug!(
            "slab: opened {path:?}, arena_len={}, root={}",
            header.arena_len,
            header.root,
        );

        Ok(Self {
            watermark: data.len(),
            data: data.to_vec(),
            free_list: Vec::new(),
            freed_committed: Vec::new(),
            root: header.root,
            max_size: None,
        })
    }

    /// Atomically persists the arena to a file, recording `root` as the
    /// top-level ref.
    ///
    /// Also commits: everything written so far becomes read-only.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure.
    pub fn write_to(&mut self, path: &Path, root: Ref) -> Result<()> {
        let header = FileHeader {
            version: FormatVersion::V1,
            root,
            arena_len: self.data.len() as u64,
        };

        let mut bytes = header.encode_into_vec();
        bytes.extend_from_slice(&self.data);

        rewrite_atomic(path, &seal(bytes))?;

        self.root = root;
        self.commit();

        log::debug!("slab: persisted {} bytes to {path:?}", self.data.len());

        Ok(())
    }

    /// Turns everything written so far into the committed, read-only
    /// snapshot.
    ///
    /// Refs handed out before the commit stay valid; the next mutation of
    /// any region below the new watermark copies on write.
    pub fn commit(&mut self) {
        log::trace!(
            "slab: commit, watermark {} -> {}",
            self.watermark,
            self.data.len()
        );

        self.watermark = self.data.len();
        self.free_list.clear();
    }

    /// Ref of the top-level array recorded when the file was written.
    #[must_use]
    pub fn root(&self) -> Ref {
        self.root
    }

    /// The committed, read-only prefix of the arena.
    #[must_use]
    pub fn committed(&self) -> &[u8] {
        self.data.get(..self.watermark).expect("watermark in bounds")
    }

    /// Bytes released but not recyclable while the arena is open.
    #[must_use]
    pub fn retained_bytes(&self) -> usize {
        self.freed_committed.iter().map(|(_, len)| len).sum()
    }
}

impl Allocator for SlabAlloc {
    fn alloc(&mut self, size: usize) -> Result<Ref> {
        let size = round_up(size);

        if size > MAX_REGION_SIZE {
            return Err(Error::OutOfMemory);
        }

        if let Some(pos) = self.free_list.iter().position(|(_, len)| *len >= size) {
            let (r, len) = self.free_list.swap_remove(pos);
            debug_assert!(!self.is_read_only(r));

            if len > size {
                self.free_list.push((Ref(r.0 + size as u64), len - size));
            }

            self.data
                .get_mut(r.as_usize()..r.as_usize() + size)
                .expect("free block should be in bounds")
                .fill(0);

            log::trace!("slab: alloc {size}B -> ref {r} (recycled)");

            return Ok(r);
        }

        if let Some(max) = self.max_size {
            if self.data.len() + size > max {
                return Err(Error::OutOfMemory);
            }
        }

        let r = Ref(self.data.len() as u64);
        self.data.resize(self.data.len() + size, 0);

        log::trace!("slab: alloc {size}B -> ref {r}");

        Ok(r)
    }

    fn realloc(&mut self, r: Ref, old_size: usize, new_size: usize) -> Result<Ref> {
        let new_ref = self.alloc(new_size)?;

        let old_start = r.as_usize();
        let new_start = new_ref.as_usize();
        let len = round_up(old_size).min(round_up(new_size));
        self.data.copy_within(old_start..old_start + len, new_start);

        self.free(r, old_size);

        log::trace!("slab: realloc ref {r} ({old_size}B) -> ref {new_ref} ({new_size}B)");

        Ok(new_ref)
    }

    fn free(&mut self, r: Ref, size: usize) {
        debug_assert!(!r.is_null());

        if self.is_read_only(r) {
            self.freed_committed.push((r, round_up(size)));
        } else {
            self.free_list.push((r, round_up(size)));
        }
    }

    fn translate(&self, r: Ref) -> &[u8] {
        assert!(r.as_usize() >= ARENA_BASE, "ref should not be null");

        self.data
            .get(r.as_usize()..)
            .expect("ref should be inside the arena")
    }

    fn translate_mut(&mut self, r: Ref) -> &mut [u8] {
        assert!(r.as_usize() >= ARENA_BASE, "ref should not be null");
        assert!(
            !self.is_read_only(r),
            "write into committed space is a copy-on-write violation"
        );

        self.data
            .get_mut(r.as_usize()..)
            .expect("ref should be inside the arena")
    }

    fn is_read_only(&self, r: Ref) -> bool {
        r.as_usize() < self.watermark
    }

    fn arena_len(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
#[allow(clippy::indexing_slicing)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn slab_commit_makes_read_only() -> crate::Result<()> {
        let mut alloc = SlabAlloc::new();

        let a = alloc.alloc(32)?;
        assert!(!alloc.is_read_only(a));

        alloc.commit();
        assert!(alloc.is_read_only(a));

        let b = alloc.alloc(32)?;
        assert!(!alloc.is_read_only(b));

        Ok(())
    }

    #[test]
    fn slab_free_below_watermark_is_retained() -> crate::Result<()> {
        let mut alloc = SlabAlloc::new();

        let a = alloc.alloc(32)?;
        alloc.commit();

        alloc.free(a, 32);
        assert_eq!(32, alloc.retained_bytes());

        // Committed space is never recycled
        let b = alloc.alloc(32)?;
        assert_ne!(a, b);

        Ok(())
    }

    #[test]
    #[should_panic(expected = "copy-on-write violation")]
    fn slab_write_into_committed_panics() {
        let mut alloc = SlabAlloc::new();

        let a = alloc.alloc(32).expect("should allocate");
        alloc.commit();

        let _ = alloc.translate_mut(a);
    }

    #[test]
    fn slab_persist_roundtrip() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("arena");

        let mut alloc = SlabAlloc::new();
        let a = alloc.alloc(32)?;
        alloc.translate_mut(a)[0] = 0xEE;

        alloc.write_to(&path, a)?;

        let reopened = SlabAlloc::open(&path)?;
        assert_eq!(a, reopened.root());
        assert_eq!(0xEE, reopened.translate(a)[0]);
        assert!(reopened.is_read_only(a));

        Ok(())
    }

    #[test]
    fn slab_open_detects_corruption() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("arena");

        let mut alloc = SlabAlloc::new();
        let a = alloc.alloc(32)?;
        alloc.write_to(&path, a)?;

        let mut bytes = std::fs::read(&path)?;
        let len = bytes.len();
        bytes[len / 2] ^= 0xFF;
        std::fs::write(&path, &bytes)?;

        assert!(matches!(
            SlabAlloc::open(&path),
            Err(crate::Error::InvalidChecksum(_))
        ));

        Ok(())
    }
}
