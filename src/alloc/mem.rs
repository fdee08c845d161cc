// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{round_up, Allocator, Ref, ARENA_BASE, MAX_REGION_SIZE};
use crate::{Error, Result};

/// Transient heap arena.
///
/// The default allocator for free-standing arrays and columns. Nothing in
/// it is ever read-only, so copy-on-write never triggers and nothing can be
/// persisted from it.
pub struct MemAlloc {
    data: Vec<u8>,
    free_list: Vec<(Ref, usize)>,
    max_size: Option<usize>,
}

impl Default for MemAlloc {
    fn default() -> Self {
        Self::new()
    }
}

impl MemAlloc {
    /// Creates an empty heap arena.
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: vec![0; ARENA_BASE],
            free_list: Vec::new(),
            max_size: None,
        }
    }

    /// Creates an arena that refuses to grow beyond `max_size` bytes.
    #[must_use]
    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            data: vec![0; ARENA_BASE],
            free_list: Vec::new(),
            max_size: Some(max_size),
        }
    }
}

impl Allocator for MemAlloc {
    fn alloc(&mut self, size: usize) -> Result<Ref> {
        let size = round_up(size);

        if size > MAX_REGION_SIZE {
            return Err(Error::OutOfMemory);
        }

        if let Some(pos) = self.free_list.iter().position(|(_, len)| *len >= size) {
            let (r, len) = self.free_list.swap_remove(pos);

            if len > size {
                self.free_list.push((Ref(r.0 + size as u64), len - size));
            }

            self.data
                .get_mut(r.as_usize()..r.as_usize() + size)
                .expect("free block should be in bounds")
                .fill(0);

            log::trace!("mem: alloc {size}B -> ref {r} (recycled)");

            return Ok(r);
        }

        if let Some(max) = self.max_size {
            if self.data.len() + size > max {
                return Err(Error::OutOfMemory);
            }
        }

        let r = Ref(self.data.len() as u64);
        self.data.resize(self.data.len() + size, 0);

        log::trace!("mem: alloc {size}B -> ref {r}");

        Ok(r)
    }

    fn realloc(&mut self, r: Ref, old_size: usize, new_size: usize) -> Result<Ref> {
        let new_ref = self.alloc(new_size)?;

        let old_start = r.as_usize();
        let new_start = new_ref.as_usize();
        let len = round_up(old_size).min(round_up(new_size));
        self.data.copy_within(old_start..old_start + len, new_start);

        self.free(r, old_size);

        log::trace!("mem: realloc ref {r} ({old_size}B) -> ref {new_ref} ({new_size}B)");

        Ok(new_ref)
    }

    fn free(&mut self, r: Ref, size: usize) {
        debug_assert!(!r.is_null());
        self.free_list.push((r, round_up(size)));
    }

    fn translate(&self, r: Ref) -> &[u8] {
        assert!(r.as_usize() >= ARENA_BASE, "ref should not be null");

        self.data
            .get(r.as_usize()..)
            .expect("ref should be inside the arena")
    }

    fn translate_mut(&mut self, r: Ref) -> &mut [u8] {
        assert!(r.as_usize() >= ARENA_BASE, "ref should not be null");

        self.data
            .get_mut(r.as_usize()..)
            .expect("ref should be inside the arena")
    }

    fn is_read_only(&self, _: Ref) -> bool {
        false
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
    fn mem_alloc_simple() -> crate::Result<()> {
        let mut alloc = MemAlloc::new();

        let a = alloc.alloc(32)?;
        let b = alloc.alloc(32)?;
        assert!(!a.is_null());
        assert_ne!(a, b);
        assert!(!alloc.is_read_only(a));

        alloc.translate_mut(a)[0] = 0xAB;
        assert_eq!(0xAB, alloc.translate(a)[0]);
        assert_eq!(0, alloc.translate(b)[0]);

        Ok(())
    }

    #[test]
    fn mem_alloc_recycles() -> crate::Result<()> {
        let mut alloc = MemAlloc::new();

        let a = alloc.alloc(64)?;
        alloc.free(a, 64);

        let b = alloc.alloc(64)?;
        assert_eq!(a, b);

        Ok(())
    }

    #[test]
    fn mem_alloc_out_of_memory() {
        let mut alloc = MemAlloc::with_max_size(64);

        assert!(alloc.alloc(32).is_ok());
        assert!(matches!(alloc.alloc(64), Err(crate::Error::OutOfMemory)));
    }
}
