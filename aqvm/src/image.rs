// Copyright 2026 the AqVM Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! AQBC image loader.
//!
//! Layout (bit-exact):
//! - bytes `0..4`: magic `"AQBC"`
//! - bytes `4..8`: reserved, ignored
//! - bytes `8..16`: `memory_size`, big-endian `u64`
//! - `memory_size` bytes of initial data
//! - `memory_size.div_ceil(2)` bytes of packed type nibbles
//! - everything through EOF: the code segment (no trailer)

use alloc::vec::Vec;

use crate::format::{DecodeError, Reader};
use crate::heap::HEAP_BASE;
use crate::memory::TaggedMemory;

/// The AQBC magic header, `"AQBC"`.
pub const MAGIC: [u8; 4] = [0x41, 0x51, 0x42, 0x43];

/// A loaded bytecode image: tagged memory plus the code segment.
#[derive(Clone, Debug, PartialEq)]
pub struct Image {
    /// The initial tagged data segment.
    pub memory: TaggedMemory,
    /// The instruction stream.
    pub code: Vec<u8>,
}

/// Decodes an AQBC image from `bytes`.
pub fn decode(bytes: &[u8]) -> Result<Image, DecodeError> {
    let mut r = Reader::new(bytes);
    if r.read_bytes(4)? != MAGIC {
        return Err(DecodeError::BadMagic);
    }
    let _reserved = r.read_bytes(4)?;
    let memory_size = r.read_u64_be()?;
    // The data segment aliases guest addresses 0..memory_size and must stay
    // below the heap region.
    if memory_size >= HEAP_BASE {
        return Err(DecodeError::OversizedMemory { memory_size });
    }
    let size = usize::try_from(memory_size).map_err(|_| DecodeError::OversizedMemory { memory_size })?;
    let data = r.read_bytes(size)?.to_vec();
    let tags = r.read_bytes(size.div_ceil(2))?.to_vec();
    let code = r.rest().to_vec();
    Ok(Image {
        memory: TaggedMemory::new(data, tags),
        code,
    })
}
