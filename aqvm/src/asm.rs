// Copyright 2026 the AqVM Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! AQBC image builder ("assembler").
//!
//! A small, public helper for laying out typed data slots and encoding
//! instructions without hand-computing byte offsets, nibble packing, or
//! ULEB-255 operand encodings. Primarily intended for tests and prototypes;
//! a compiler front end is expected to emit images directly.
//!
//! Slots are appended in call order, so each `*_slot` method returns the
//! byte offset that later operands should reference.

use alloc::vec::Vec;

use crate::format::Writer;
use crate::image::MAGIC;
use crate::memory::Tag;
use crate::opcode::Opcode;

/// An AQBC image under construction.
#[derive(Clone, Debug, Default)]
pub struct ImageBuilder {
    data: Vec<u8>,
    nibbles: Vec<u8>,
    code: Vec<u8>,
}

impl ImageBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&mut self, tag: Tag, bytes: &[u8]) -> u64 {
        let at = self.data.len() as u64;
        self.data.extend_from_slice(bytes);
        self.nibbles.push(tag.nibble());
        self.nibbles
            .extend(core::iter::repeat_n(Tag::Void.nibble(), bytes.len().saturating_sub(1)));
        at
    }

    /// Appends a `byte` slot holding `v`; returns its offset.
    pub fn byte_slot(&mut self, v: i8) -> u64 {
        self.slot(Tag::Byte, &v.to_ne_bytes())
    }

    /// Appends an `int` slot holding `v`; returns its offset.
    pub fn int_slot(&mut self, v: i32) -> u64 {
        self.slot(Tag::Int, &v.to_ne_bytes())
    }

    /// Appends a `long` slot holding `v`; returns its offset.
    pub fn long_slot(&mut self, v: i64) -> u64 {
        self.slot(Tag::Long, &v.to_ne_bytes())
    }

    /// Appends a `float` slot holding `v`; returns its offset.
    pub fn float_slot(&mut self, v: f32) -> u64 {
        self.slot(Tag::Float, &v.to_ne_bytes())
    }

    /// Appends a `double` slot holding `v`; returns its offset.
    pub fn double_slot(&mut self, v: f64) -> u64 {
        self.slot(Tag::Double, &v.to_ne_bytes())
    }

    /// Appends a reference slot holding the guest address `word`; returns
    /// its offset.
    pub fn word_slot(&mut self, word: u64) -> u64 {
        self.slot(Tag::Reference, &word.to_ne_bytes())
    }

    /// Appends `n` untyped zero bytes.
    pub fn pad(&mut self, n: usize) {
        self.data.extend(core::iter::repeat_n(0u8, n));
        self.nibbles
            .extend(core::iter::repeat_n(Tag::Void.nibble(), n));
    }

    /// Appends `s` as NUL-terminated untyped bytes; returns its offset.
    pub fn str_slot(&mut self, s: &str) -> u64 {
        let at = self.data.len() as u64;
        self.data.extend_from_slice(s.as_bytes());
        self.data.push(0);
        self.nibbles
            .extend(core::iter::repeat_n(Tag::Void.nibble(), s.len() + 1));
        at
    }

    /// Appends an instruction with ULEB-255 encoded `operands`.
    pub fn op(&mut self, opcode: Opcode, operands: &[u64]) {
        self.code.push(opcode.byte());
        let mut w = Writer::new();
        for &operand in operands {
            w.write_uleb255_u64(operand);
        }
        self.code.extend_from_slice(w.as_slice());
    }

    /// Appends a raw code byte.
    pub fn code_byte(&mut self, byte: u8) {
        self.code.push(byte);
    }

    /// Returns the current code segment length (the offset of the next
    /// instruction), for computing relative jump targets.
    #[must_use]
    pub fn code_len(&self) -> usize {
        self.code.len()
    }

    /// Returns the current data segment length.
    #[must_use]
    pub fn data_len(&self) -> usize {
        self.data.len()
    }

    /// Encodes the complete AQBC image.
    #[must_use]
    pub fn finish(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_bytes(&MAGIC);
        w.write_bytes(&[0; 4]);
        w.write_u64_be(self.data.len() as u64);
        w.write_bytes(&self.data);

        let mut packed = Vec::new();
        packed.resize(self.nibbles.len().div_ceil(2), 0u8);
        for (i, &n) in self.nibbles.iter().enumerate() {
            if i % 2 == 0 {
                packed[i / 2] |= n << 4;
            } else {
                packed[i / 2] |= n & 0xF;
            }
        }
        w.write_bytes(&packed);
        w.write_bytes(&self.code);
        w.into_vec()
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;
    use alloc::vec::Vec;

    use super::*;
    use crate::format::Reader;
    use crate::image;
    use crate::memory::Tag;

    #[test]
    fn slots_are_laid_out_sequentially() {
        let mut b = ImageBuilder::new();
        assert_eq!(b.int_slot(3), 0);
        assert_eq!(b.int_slot(4), 4);
        assert_eq!(b.byte_slot(1), 8);
        assert_eq!(b.double_slot(0.5), 9);
        assert_eq!(b.data_len(), 17);
    }

    #[test]
    fn finished_image_decodes_back() {
        let mut b = ImageBuilder::new();
        let x = b.int_slot(7);
        let s = b.str_slot("print");
        b.op(Opcode::Nop, &[]);
        b.op(Opcode::Return, &[]);

        let image = image::decode(&b.finish()).unwrap();
        assert_eq!(image.memory.tag(x), Ok(Tag::Int));
        assert_eq!(image.memory.read_as_i32(x), Ok(7));
        assert_eq!(image.memory.tag(s), Ok(Tag::Void));
        assert_eq!(image.code, vec![0x00, 0x15]);
    }

    #[test]
    fn assembled_instructions_decode_to_the_same_tuples() {
        let program: &[(Opcode, &[u64])] = &[
            (Opcode::Add, &[8, 0, 4]),
            (Opcode::Cmp, &[9, 8, 0, 4]),
            (Opcode::Load, &[300, 2]),
            (Opcode::Goto, &[510]),
            (Opcode::Return, &[]),
        ];
        let mut b = ImageBuilder::new();
        for (op, operands) in program {
            b.op(*op, operands);
        }
        let image = image::decode(&b.finish()).unwrap();

        let mut r = Reader::new(&image.code);
        let mut decoded: Vec<(Opcode, Vec<u64>)> = Vec::new();
        while r.offset() < image.code.len() {
            let op = Opcode::from_byte(r.read_u8().unwrap()).unwrap();
            let count = op.fixed_operands().unwrap();
            let mut operands = Vec::with_capacity(count);
            for _ in 0..count {
                operands.push(r.read_uleb255_u64().unwrap());
            }
            decoded.push((op, operands));
        }

        let expected: Vec<(Opcode, Vec<u64>)> = program
            .iter()
            .map(|(op, operands)| (*op, operands.to_vec()))
            .collect();
        assert_eq!(decoded, expected);
    }
}
