// Copyright 2026 the AqVM Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Guest heap for `NEW`/`FREE`.
//!
//! Blocks live in a 64-bit guest address space above [`HEAP_BASE`], disjoint
//! from the data segment (which aliases addresses `0..memory_size`). Base
//! addresses are handed out monotonically and never reused, so a dangling
//! address can always be diagnosed.

use alloc::collections::BTreeMap;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

/// First address of the heap region. Data segments must end below this.
pub const HEAP_BASE: u64 = 1 << 32;

const BLOCK_ALIGN: u64 = 16;

/// A heap error.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HeapError {
    /// An allocation exceeded the configured heap limit.
    OutOfMemory,
    /// An address did not resolve to a live block.
    BadAddress {
        /// The offending guest address.
        addr: u64,
    },
    /// A free of an address that is not a live block base.
    BadFree {
        /// The offending guest address.
        addr: u64,
    },
}

impl fmt::Display for HeapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "out of heap memory"),
            Self::BadAddress { addr } => write!(f, "bad heap address 0x{addr:x}"),
            Self::BadFree { addr } => write!(f, "free of non-allocated address 0x{addr:x}"),
        }
    }
}

impl core::error::Error for HeapError {}

/// Guest-owned heap storage.
#[derive(Debug)]
pub struct Heap {
    blocks: BTreeMap<u64, Vec<u8>>,
    next: u64,
    in_use: u64,
    limit: u64,
}

impl Heap {
    /// Creates an empty heap bounded by `limit` bytes.
    #[must_use]
    pub fn new(limit: u64) -> Self {
        Self {
            blocks: BTreeMap::new(),
            next: HEAP_BASE,
            in_use: 0,
            limit,
        }
    }

    /// Returns the number of live blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Returns the number of allocated bytes.
    #[must_use]
    pub fn bytes_in_use(&self) -> u64 {
        self.in_use
    }

    /// Allocates a block of `size` bytes and returns its base address.
    pub fn alloc(&mut self, size: u64) -> Result<u64, HeapError> {
        let in_use = self.in_use.checked_add(size).ok_or(HeapError::OutOfMemory)?;
        if in_use > self.limit {
            return Err(HeapError::OutOfMemory);
        }
        let len = usize::try_from(size).map_err(|_| HeapError::OutOfMemory)?;
        let base = self.next;
        // Zero-sized blocks still occupy one aligned address, like malloc(0).
        let stride = size
            .max(1)
            .checked_next_multiple_of(BLOCK_ALIGN)
            .ok_or(HeapError::OutOfMemory)?;
        self.next = base.checked_add(stride).ok_or(HeapError::OutOfMemory)?;
        self.blocks.insert(base, vec![0u8; len]);
        self.in_use = in_use;
        Ok(base)
    }

    /// Releases the block based at `addr`.
    ///
    /// Address `0` is accepted and ignored, like `free(NULL)`.
    pub fn free(&mut self, addr: u64) -> Result<(), HeapError> {
        if addr == 0 {
            return Ok(());
        }
        let block = self
            .blocks
            .remove(&addr)
            .ok_or(HeapError::BadFree { addr })?;
        self.in_use -= block.len() as u64;
        Ok(())
    }

    fn locate(&self, addr: u64) -> Result<(u64, &Vec<u8>), HeapError> {
        let (base, block) = self
            .blocks
            .range(..=addr)
            .next_back()
            .ok_or(HeapError::BadAddress { addr })?;
        if addr - base > block.len() as u64 {
            return Err(HeapError::BadAddress { addr });
        }
        Ok((*base, block))
    }

    /// Returns the bytes from `addr` through the end of its block.
    pub fn tail(&self, addr: u64) -> Result<&[u8], HeapError> {
        let (base, block) = self.locate(addr)?;
        Ok(&block[(addr - base) as usize..])
    }

    /// Copies `bytes` into the block containing `addr`.
    pub fn write(&mut self, addr: u64, bytes: &[u8]) -> Result<(), HeapError> {
        let (base, block) = self.locate(addr)?;
        let offset = (addr - base) as usize;
        let end = offset
            .checked_add(bytes.len())
            .ok_or(HeapError::BadAddress { addr })?;
        if end > block.len() {
            return Err(HeapError::BadAddress { addr });
        }
        let block = self
            .blocks
            .get_mut(&base)
            .ok_or(HeapError::BadAddress { addr })?;
        block[offset..end].copy_from_slice(bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_free_leaves_no_residue() {
        let mut heap = Heap::new(1024);
        let a = heap.alloc(16).unwrap();
        let b = heap.alloc(32).unwrap();
        assert!(a >= HEAP_BASE);
        assert_ne!(a, b);
        assert_eq!(heap.block_count(), 2);
        assert_eq!(heap.bytes_in_use(), 48);
        heap.free(a).unwrap();
        heap.free(b).unwrap();
        assert_eq!(heap.block_count(), 0);
        assert_eq!(heap.bytes_in_use(), 0);
    }

    #[test]
    fn free_null_is_a_no_op() {
        let mut heap = Heap::new(1024);
        heap.free(0).unwrap();
    }

    #[test]
    fn free_of_interior_or_stale_address_fails() {
        let mut heap = Heap::new(1024);
        let a = heap.alloc(16).unwrap();
        assert_eq!(heap.free(a + 1), Err(HeapError::BadFree { addr: a + 1 }));
        heap.free(a).unwrap();
        assert_eq!(heap.free(a), Err(HeapError::BadFree { addr: a }));
    }

    #[test]
    fn interior_reads_and_writes_resolve() {
        let mut heap = Heap::new(1024);
        let a = heap.alloc(8).unwrap();
        heap.write(a + 2, &[1, 2, 3]).unwrap();
        assert_eq!(heap.tail(a).unwrap(), &[0, 0, 1, 2, 3, 0, 0, 0]);
        assert_eq!(heap.tail(a + 6).unwrap(), &[0, 0]);
        assert_eq!(
            heap.write(a + 6, &[9, 9, 9]),
            Err(HeapError::BadAddress { addr: a + 6 })
        );
    }

    #[test]
    fn limit_is_enforced() {
        let mut heap = Heap::new(64);
        let a = heap.alloc(48).unwrap();
        assert_eq!(heap.alloc(32), Err(HeapError::OutOfMemory));
        heap.free(a).unwrap();
        heap.alloc(32).unwrap();
    }

    #[test]
    fn zero_sized_blocks_get_distinct_addresses() {
        let mut heap = Heap::new(64);
        let a = heap.alloc(0).unwrap();
        let b = heap.alloc(0).unwrap();
        assert_ne!(a, b);
        heap.free(a).unwrap();
        heap.free(b).unwrap();
    }
}
