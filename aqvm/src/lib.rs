// Copyright 2026 the AqVM Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! `aqvm`: a register-style bytecode VM for the AQ instruction set.
//!
//! The VM loads an AQBC image containing a typed data segment and an
//! instruction segment, then executes instructions that read and write
//! dynamically typed values in a single flat memory area addressed by byte
//! offset. Every slot carries a 4-bit runtime tag that drives arithmetic
//! promotion, comparison, and load/store width.
//!
//! Scalars in the data segment are stored in host-native byte order; images
//! are not portable across endianness.
//!
//! ## Example
//!
//! ```
//! use aqvm::asm::ImageBuilder;
//! use aqvm::opcode::Opcode;
//! use aqvm::vm::{Limits, Vm};
//!
//! let mut b = ImageBuilder::new();
//! let x = b.int_slot(3);
//! let y = b.int_slot(4);
//! let r = b.int_slot(0);
//! b.op(Opcode::Add, &[r, x, y]);
//! b.op(Opcode::Return, &[]);
//!
//! let mut vm = Vm::load(&b.finish(), Limits::default())?;
//! vm.run()?;
//! assert_eq!(vm.memory().read_as_i32(r), Ok(7));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![no_std]

extern crate alloc;

pub(crate) mod arith;
pub mod asm;
pub mod disasm;
pub mod format;
pub mod heap;
pub mod host;
pub mod image;
pub mod memory;
pub mod names;
pub mod opcode;
pub mod trace;
pub mod vm;
