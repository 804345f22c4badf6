// Copyright 2026 the AqVM Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Disassembler for AQBC images.
//!
//! Produces a structured view plus a stable one-instruction-per-line text
//! format via [`core::fmt::Display`].
//!
//! Disassembly is best-effort by construction: `invoke` operand counts
//! depend on memory contents at decode time, so the listing resolves them
//! against the image's *initial* data segment and stops at the first byte it
//! cannot decode, recording the reason.

use alloc::vec::Vec;
use core::fmt;

use crate::format::Reader;
use crate::image::Image;
use crate::opcode::Opcode;

/// Why a disassembly stopped early.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DisasmError {
    /// An operand ran past the end of the code segment.
    Truncated {
        /// Byte offset of the instruction being decoded.
        pc: usize,
    },
    /// An unrecognized opcode byte.
    UnknownOpcode {
        /// Byte offset of the opcode.
        pc: usize,
        /// The raw opcode byte.
        opcode: u8,
    },
    /// An `invoke` argument count that could not be resolved against the
    /// initial data segment.
    UnresolvedArgCount {
        /// Byte offset of the `invoke` opcode.
        pc: usize,
    },
}

impl fmt::Display for DisasmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated { pc } => write!(f, "truncated instruction at pc={pc}"),
            Self::UnknownOpcode { pc, opcode } => {
                write!(f, "unknown opcode 0x{opcode:02x} at pc={pc}")
            }
            Self::UnresolvedArgCount { pc } => {
                write!(f, "unresolved invoke argument count at pc={pc}")
            }
        }
    }
}

impl core::error::Error for DisasmError {}

/// One decoded instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstrView {
    /// Byte offset of the opcode.
    pub pc: usize,
    /// The opcode.
    pub opcode: Opcode,
    /// Decoded operand values, in instruction order.
    pub operands: Vec<u64>,
}

/// A best-effort disassembly of an image's code segment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Disassembly {
    /// Instructions decoded before the first error.
    pub instrs: Vec<InstrView>,
    /// The error that stopped decoding, if any.
    pub error: Option<DisasmError>,
}

/// Disassembles `image`'s code segment.
#[must_use]
pub fn disassemble(image: &Image) -> Disassembly {
    let code = &image.code;
    let mut r = Reader::new(code);
    let mut instrs = Vec::new();

    while r.offset() < code.len() {
        let pc = r.offset();
        let byte = match r.read_u8() {
            Ok(b) => b,
            Err(_) => {
                return Disassembly {
                    instrs,
                    error: Some(DisasmError::Truncated { pc }),
                };
            }
        };
        let Some(opcode) = Opcode::from_byte(byte) else {
            return Disassembly {
                instrs,
                error: Some(DisasmError::UnknownOpcode { pc, opcode: byte }),
            };
        };

        let count = match opcode.fixed_operands() {
            Some(n) => n,
            None => match invoke_operand_count(image, &mut r) {
                Some(n) => n,
                None => {
                    return Disassembly {
                        instrs,
                        error: Some(DisasmError::UnresolvedArgCount { pc }),
                    };
                }
            },
        };

        let mut operands = Vec::with_capacity(count);
        let mut truncated = false;
        for _ in 0..count {
            match r.read_uleb255_u64() {
                Ok(v) => operands.push(v),
                Err(_) => {
                    truncated = true;
                    break;
                }
            }
        }
        if truncated {
            return Disassembly {
                instrs,
                error: Some(DisasmError::Truncated { pc }),
            };
        }
        instrs.push(InstrView {
            pc,
            opcode,
            operands,
        });
    }

    Disassembly {
        instrs,
        error: None,
    }
}

/// Computes the total operand count of an `invoke` whose cursor sits just
/// past the opcode byte, without consuming operands.
fn invoke_operand_count(image: &Image, r: &mut Reader<'_>) -> Option<usize> {
    let mut probe = r.clone();
    let _func = probe.read_uleb255_u64().ok()?;
    let _ret = probe.read_uleb255_u64().ok()?;
    let argc_slot = probe.read_uleb255_u64().ok()?;
    let count = image.memory.read_as_i64(argc_slot).ok()?;
    let count = usize::try_from(count).ok()?;
    Some(3 + count)
}

impl fmt::Display for Disassembly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for iv in &self.instrs {
            write!(f, "{:04}: {}", iv.pc, iv.opcode.mnemonic())?;
            for (i, operand) in iv.operands.iter().enumerate() {
                let sep = if i == 0 { " " } else { ", " };
                write!(f, "{sep}{operand}")?;
            }
            writeln!(f)?;
        }
        if let Some(e) = &self.error {
            writeln!(f, "; {e}")?;
        }
        Ok(())
    }
}
