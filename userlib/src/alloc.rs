// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The per-request scratch allocator (spec.md §4.5 "Ownership"): a
//! 128-byte-granularity pool that owns the request/response header
//! buffers, the ioctlv vec array, and every managed buffer's 256-byte
//! unaligned-region scratch. A linear scan over a small fixed arena, in
//! the same naive-algorithm spirit as `kern`'s pools.

pub const BLOCK_SIZE: usize = 128;

/// A claim on some number of contiguous 128-byte blocks inside a
/// [`ScratchAllocator`]'s arena.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ScratchHandle {
    offset: usize,
    len: usize,
    blocks: usize,
}

pub struct ScratchAllocator {
    arena: Vec<u8>,
    block_free: Vec<bool>,
}

impl ScratchAllocator {
    /// `capacity_blocks` 128-byte blocks. A real client sizes this to the
    /// worst case for the commands it issues; `sim`'s demo client uses a
    /// handful of blocks per in-flight call.
    pub fn new(capacity_blocks: usize) -> Self {
        ScratchAllocator {
            arena: vec![0u8; capacity_blocks * BLOCK_SIZE],
            block_free: vec![true; capacity_blocks],
        }
    }

    /// Rounds `len` up to a block multiple and finds the first run of free
    /// blocks long enough to hold it. Returns `None` if the arena is too
    /// fragmented or too small — callers are expected to size the arena
    /// generously, since this allocator never grows.
    pub fn alloc(&mut self, len: usize) -> Option<ScratchHandle> {
        let blocks = len.div_ceil(BLOCK_SIZE).max(1);
        let run_start = (0..self.block_free.len())
            .find(|&start| start + blocks <= self.block_free.len() && self.block_free[start..start + blocks].iter().all(|&f| f))?;
        for b in &mut self.block_free[run_start..run_start + blocks] {
            *b = false;
        }
        let offset = run_start * BLOCK_SIZE;
        self.arena[offset..offset + blocks * BLOCK_SIZE].fill(0);
        Some(ScratchHandle { offset, len, blocks })
    }

    pub fn free(&mut self, handle: ScratchHandle) {
        let start = handle.offset / BLOCK_SIZE;
        for b in &mut self.block_free[start..start + handle.blocks] {
            *b = true;
        }
    }

    /// Returns every block to the free list. Mirrors spec.md §4.5:
    /// "Destruction returns every allocation."
    pub fn free_all(&mut self) {
        self.block_free.iter_mut().for_each(|b| *b = true);
    }

    pub fn get(&self, handle: ScratchHandle) -> &[u8] {
        &self.arena[handle.offset..handle.offset + handle.len]
    }

    pub fn get_mut(&mut self, handle: ScratchHandle) -> &mut [u8] {
        &mut self.arena[handle.offset..handle.offset + handle.len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_rounds_up_to_block_size() {
        let mut a = ScratchAllocator::new(4);
        let h = a.alloc(200).unwrap();
        assert_eq!(a.get(h).len(), 200);
        assert_eq!(h.blocks, 2);
    }

    #[test]
    fn free_all_reclaims_everything() {
        let mut a = ScratchAllocator::new(2);
        let h1 = a.alloc(128).unwrap();
        assert!(a.alloc(128).is_some());
        assert!(a.alloc(1).is_none());
        a.free_all();
        let _ = h1;
        assert!(a.alloc(256).is_some());
    }

    #[test]
    fn exhaustion_returns_none_without_panicking() {
        let mut a = ScratchAllocator::new(1);
        assert!(a.alloc(128).is_some());
        assert!(a.alloc(1).is_none());
    }
}
