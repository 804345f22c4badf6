// Copyright 2026 the AqVM Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Interpreter for AQ bytecode.
//!
//! The VM owns the tagged memory, the guest heap, the code segment, and the
//! host-function name table. Execution starts at the beginning of the code
//! segment and halts when the program counter reaches the end or a `return`
//! executes. Relative jumps (`if`, `goto`) are applied to the PC value
//! immediately after the opcode byte, before operand decode.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use crate::arith::{self, ArithOp, IntOp};
use crate::format::{self, DecodeError};
use crate::heap::{Heap, HeapError};
use crate::host::{CallSlots, HostCtx, HostError, HostFn, guest_tail};
use crate::image::{self, Image};
use crate::memory::{MemError, TaggedMemory};
use crate::names::NameTable;
use crate::opcode::Opcode;
use crate::trace::{TraceEvent, TraceMask, TraceOutcome, TraceSink};

/// Execution limits for a VM run.
#[derive(Copy, Clone, Debug)]
pub struct Limits {
    /// Instruction budget; each fetched instruction costs 1.
    pub fuel: u64,
    /// Upper bound on live `new`-allocated bytes.
    pub max_heap_bytes: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            fuel: 1_000_000_000,
            max_heap_bytes: 256 << 20,
        }
    }
}

/// A runtime trap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Trap {
    /// Fuel limit exceeded.
    FuelExceeded,
    /// An operand or call frame ran past the end of the code segment.
    TruncatedCode,
    /// An unrecognized opcode byte was fetched.
    UnknownOpcode {
        /// The raw opcode byte.
        opcode: u8,
    },
    /// A relative jump left the code segment.
    InvalidJump {
        /// The computed jump target.
        target: i64,
    },
    /// A slot access reached past the end of the data segment.
    SlotOutOfBounds {
        /// The offending slot.
        slot: u64,
    },
    /// A guest address did not resolve to live storage.
    BadAddress {
        /// The offending guest address.
        addr: u64,
    },
    /// A `free` of an address that is not a live block base.
    BadFree {
        /// The offending guest address.
        addr: u64,
    },
    /// A `new` exceeded the heap limit or requested a negative size.
    OutOfMemory,
    /// Integer division or remainder by zero.
    DivByZero,
    /// Signed integer division overflowed (e.g. `i64::MIN / -1`).
    DivOverflow,
    /// A `cmp` comparison code outside `0..=5`.
    InvalidCompare {
        /// The comparison code read from memory.
        code: i8,
    },
    /// An `invoke` argument count was negative.
    BadArgCount {
        /// The count read from memory.
        count: i64,
    },
    /// An `invoke` name string was unterminated or not valid UTF-8.
    InvalidName {
        /// The guest address of the name string.
        addr: u64,
    },
    /// An `invoke` name had no registered handler.
    UnresolvedName {
        /// The resolved name.
        name: String,
    },
    /// Host call failed.
    HostCallFailed(HostError),
}

impl fmt::Display for Trap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FuelExceeded => write!(f, "fuel limit exceeded"),
            Self::TruncatedCode => write!(f, "truncated code segment"),
            Self::UnknownOpcode { opcode } => write!(f, "unknown opcode 0x{opcode:02x}"),
            Self::InvalidJump { target } => write!(f, "jump target {target} out of range"),
            Self::SlotOutOfBounds { slot } => write!(f, "slot {slot} out of bounds"),
            Self::BadAddress { addr } => write!(f, "bad guest address 0x{addr:x}"),
            Self::BadFree { addr } => write!(f, "free of non-allocated address 0x{addr:x}"),
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::DivByZero => write!(f, "division by zero"),
            Self::DivOverflow => write!(f, "integer division overflow"),
            Self::InvalidCompare { code } => write!(f, "invalid comparison code {code}"),
            Self::BadArgCount { count } => write!(f, "invalid argument count {count}"),
            Self::InvalidName { addr } => write!(f, "invalid name string at 0x{addr:x}"),
            Self::UnresolvedName { name } => write!(f, "unresolved host function '{name}'"),
            Self::HostCallFailed(e) => write!(f, "host call failed: {e}"),
        }
    }
}

impl core::error::Error for Trap {}

impl From<MemError> for Trap {
    fn from(e: MemError) -> Self {
        match e {
            MemError::OutOfBounds { at } => Self::SlotOutOfBounds { slot: at },
        }
    }
}

impl From<HeapError> for Trap {
    fn from(e: HeapError) -> Self {
        match e {
            HeapError::OutOfMemory => Self::OutOfMemory,
            HeapError::BadAddress { addr } => Self::BadAddress { addr },
            HeapError::BadFree { addr } => Self::BadFree { addr },
        }
    }
}

impl From<DecodeError> for Trap {
    fn from(_: DecodeError) -> Self {
        Self::TruncatedCode
    }
}

/// A trap annotated with the program counter of the faulting instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrapInfo {
    /// Byte offset of the opcode that trapped.
    pub pc: usize,
    /// Trap kind.
    pub trap: Trap,
}

impl fmt::Display for TrapInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "trap at pc={}: {}", self.pc, self.trap)
    }
}

impl core::error::Error for TrapInfo {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        Some(&self.trap)
    }
}

enum Flow {
    Continue,
    Halt,
}

/// A single-threaded AQ virtual machine instance.
pub struct Vm {
    memory: TaggedMemory,
    heap: Heap,
    code: Vec<u8>,
    names: NameTable,
    limits: Limits,
}

impl fmt::Debug for Vm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vm")
            .field("memory_size", &self.memory.size())
            .field("code_len", &self.code.len())
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl Vm {
    /// Creates a VM from a decoded [`Image`].
    #[must_use]
    pub fn new(image: Image, limits: Limits) -> Self {
        Self {
            memory: image.memory,
            heap: Heap::new(limits.max_heap_bytes),
            code: image.code,
            names: NameTable::new(),
            limits,
        }
    }

    /// Decodes `bytes` as an AQBC image and creates a VM.
    pub fn load(bytes: &[u8], limits: Limits) -> Result<Self, DecodeError> {
        Ok(Self::new(image::decode(bytes)?, limits))
    }

    /// Registers `handler` under `name` for `invoke`, shadowing any previous
    /// registration.
    pub fn register(&mut self, name: impl Into<String>, handler: HostFn) {
        self.names.register(name, handler);
    }

    /// Returns the tagged data segment.
    #[must_use]
    pub fn memory(&self) -> &TaggedMemory {
        &self.memory
    }

    /// Returns the guest heap.
    #[must_use]
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Executes the loaded program.
    pub fn run(&mut self) -> Result<(), TrapInfo> {
        self.run_traced(TraceMask::NONE, None)
    }

    /// Executes the loaded program, emitting the events requested by
    /// `mask` to `sink`.
    pub fn run_traced(
        &mut self,
        mask: TraceMask,
        mut sink: Option<&mut dyn TraceSink>,
    ) -> Result<(), TrapInfo> {
        if mask.contains(TraceMask::RUN)
            && let Some(t) = sink.as_deref_mut()
        {
            t.event(TraceEvent::RunStart {
                code_len: self.code.len(),
            });
        }

        let result = self.run_body(mask, &mut sink);

        if mask.contains(TraceMask::RUN)
            && let Some(t) = sink.as_deref_mut()
        {
            let outcome = match &result {
                Ok(()) => TraceOutcome::Ok,
                Err(e) => TraceOutcome::Trap(e),
            };
            t.event(TraceEvent::RunEnd { outcome });
        }

        result
    }

    fn run_body(
        &mut self,
        mask: TraceMask,
        sink: &mut Option<&mut dyn TraceSink>,
    ) -> Result<(), TrapInfo> {
        let Self {
            memory,
            heap,
            code,
            names,
            limits,
        } = self;
        let mut fuel = limits.fuel;
        let mut pc = 0usize;

        while pc < code.len() {
            let at = pc;
            if fuel == 0 {
                return Err(TrapInfo {
                    pc: at,
                    trap: Trap::FuelExceeded,
                });
            }
            fuel -= 1;

            match step(memory, heap, names, code, &mut pc, mask, sink) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Halt) => return Ok(()),
                Err(trap) => return Err(TrapInfo { pc: at, trap }),
            }
        }
        Ok(())
    }
}

/// Decodes `N` ULEB-255 operands, bounded by the code segment.
fn operands<const N: usize>(code: &[u8], pc: &mut usize) -> Result<[u64; N], Trap> {
    let mut out = [0u64; N];
    for slot in &mut out {
        *slot = format::read_uleb255_u64(code, pc)?;
    }
    Ok(out)
}

fn jump(anchor: usize, delta: i64, code_len: usize) -> Result<usize, Trap> {
    let target = i64::try_from(anchor)
        .ok()
        .and_then(|a| a.checked_add(delta))
        .ok_or(Trap::InvalidJump { target: delta })?;
    // Landing exactly on the end of the code segment is a normal halt.
    if target < 0 || target as u64 > code_len as u64 {
        return Err(Trap::InvalidJump { target });
    }
    Ok(target as usize)
}

struct CallFrame {
    func: u64,
    ret: u64,
    args: Vec<u64>,
}

/// Decodes an `invoke` call frame. The argument count is the `long`-valued
/// contents of memory at the third operand's slot *at decode time*.
fn decode_call_frame(
    code: &[u8],
    pc: &mut usize,
    mem: &TaggedMemory,
) -> Result<CallFrame, Trap> {
    let [func, ret, argc_slot] = operands(code, pc)?;
    let count = mem.read_as_i64(argc_slot)?;
    if count < 0 {
        return Err(Trap::BadArgCount { count });
    }
    let count = usize::try_from(count).map_err(|_| Trap::BadArgCount { count })?;
    // Each operand takes at least one byte, so a count beyond the remaining
    // code is already known to be truncated.
    if count > code.len() - *pc {
        return Err(Trap::TruncatedCode);
    }
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        args.push(format::read_uleb255_u64(code, pc)?);
    }
    Ok(CallFrame { func, ret, args })
}

#[allow(clippy::too_many_arguments)]
fn invoke(
    mem: &mut TaggedMemory,
    heap: &mut Heap,
    names: &mut NameTable,
    code: &[u8],
    pc: &mut usize,
    at: usize,
    mask: TraceMask,
    sink: &mut Option<&mut dyn TraceSink>,
) -> Result<(), Trap> {
    let frame = decode_call_frame(code, pc, mem)?;
    let name_addr = mem.read_word(frame.func)?;
    let name = {
        let tail = guest_tail(mem, heap, name_addr)?;
        let nul = tail
            .iter()
            .position(|&b| b == 0)
            .ok_or(Trap::InvalidName { addr: name_addr })?;
        let s = core::str::from_utf8(&tail[..nul])
            .map_err(|_| Trap::InvalidName { addr: name_addr })?;
        String::from(s)
    };

    if mask.contains(TraceMask::HOST)
        && let Some(t) = sink.as_deref_mut()
    {
        t.event(TraceEvent::HostEnter {
            name: &name,
            pc: at,
            args: frame.args.len(),
        });
    }

    let handler = names
        .lookup_mut(&name)
        .ok_or_else(|| Trap::UnresolvedName { name: name.clone() })?;
    let mut ctx = HostCtx {
        memory: mem,
        heap,
    };
    handler(
        &mut ctx,
        CallSlots::new(&frame.args),
        CallSlots::new(core::slice::from_ref(&frame.ret)),
    )
    .map_err(Trap::HostCallFailed)?;

    if mask.contains(TraceMask::HOST)
        && let Some(t) = sink.as_deref_mut()
    {
        t.event(TraceEvent::HostExit { name: &name, pc: at });
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn step(
    mem: &mut TaggedMemory,
    heap: &mut Heap,
    names: &mut NameTable,
    code: &[u8],
    pc: &mut usize,
    mask: TraceMask,
    sink: &mut Option<&mut dyn TraceSink>,
) -> Result<Flow, Trap> {
    let at = *pc;
    let opcode_byte = code[at];
    *pc += 1;
    // Relative jumps anchor here, after the opcode byte.
    let anchor = *pc;

    if mask.contains(TraceMask::INSTR)
        && let Some(t) = sink.as_deref_mut()
    {
        t.event(TraceEvent::Instr {
            pc: at,
            opcode: opcode_byte,
        });
    }

    let op = Opcode::from_byte(opcode_byte).ok_or(Trap::UnknownOpcode {
        opcode: opcode_byte,
    })?;

    match op {
        Opcode::Nop | Opcode::Throw | Opcode::Wide => {}
        Opcode::Load => {
            let [src, dst] = operands(code, pc)?;
            let width = mem.tag(dst)?.width();
            mem.copy(src, dst, width)?;
        }
        Opcode::Store => {
            let [ptr, src] = operands(code, pc)?;
            let addr = mem.read_word(ptr)?;
            let width = mem.tag(src)?.width();
            let mut buf = [0u8; 8];
            buf[..width].copy_from_slice(mem.read_span(src, width)?);
            if addr < mem.size() as u64 {
                mem.write_span(addr, &buf[..width])
                    .map_err(|_| Trap::BadAddress { addr })?;
            } else {
                heap.write(addr, &buf[..width])?;
            }
        }
        Opcode::New => {
            let [dst, size] = operands(code, pc)?;
            let requested = mem.read_as_i64(size)?;
            let requested = u64::try_from(requested).map_err(|_| Trap::OutOfMemory)?;
            let addr = heap.alloc(requested)?;
            mem.write_word(dst, addr)?;
        }
        Opcode::Free => {
            let [ptr] = operands(code, pc)?;
            let addr = mem.read_word(ptr)?;
            heap.free(addr)?;
        }
        Opcode::Ptr => {
            let [index, dst] = operands(code, pc)?;
            // The guest address of slot `index` is `index` itself.
            mem.write_word(dst, index)?;
        }
        Opcode::Add => {
            let [r, a, b] = operands(code, pc)?;
            arith::arithmetic(mem, ArithOp::Add, r, a, b)?;
        }
        Opcode::Sub => {
            let [r, a, b] = operands(code, pc)?;
            arith::arithmetic(mem, ArithOp::Sub, r, a, b)?;
        }
        Opcode::Mul => {
            let [r, a, b] = operands(code, pc)?;
            arith::arithmetic(mem, ArithOp::Mul, r, a, b)?;
        }
        Opcode::Div => {
            let [r, a, b] = operands(code, pc)?;
            arith::arithmetic(mem, ArithOp::Div, r, a, b)?;
        }
        Opcode::Rem => {
            let [r, a, b] = operands(code, pc)?;
            arith::integer(mem, IntOp::Rem, r, a, b)?;
        }
        Opcode::Neg => {
            let [r, a] = operands(code, pc)?;
            arith::negate(mem, r, a)?;
        }
        Opcode::Shl => {
            let [r, a, b] = operands(code, pc)?;
            arith::integer(mem, IntOp::Shl, r, a, b)?;
        }
        Opcode::Shr => {
            let [r, a, b] = operands(code, pc)?;
            arith::integer(mem, IntOp::Shr, r, a, b)?;
        }
        Opcode::Sar => {
            let [r, a, b] = operands(code, pc)?;
            arith::integer(mem, IntOp::Sar, r, a, b)?;
        }
        Opcode::If => {
            let [cond, true_off, false_off] = operands(code, pc)?;
            let taken = if mem.read_as_i8(cond)? != 0 {
                true_off
            } else {
                false_off
            };
            let delta = mem.read_as_i64(taken)?;
            *pc = jump(anchor, delta, code.len())?;
        }
        Opcode::And => {
            let [r, a, b] = operands(code, pc)?;
            arith::integer(mem, IntOp::And, r, a, b)?;
        }
        Opcode::Or => {
            let [r, a, b] = operands(code, pc)?;
            arith::integer(mem, IntOp::Or, r, a, b)?;
        }
        Opcode::Xor => {
            let [r, a, b] = operands(code, pc)?;
            arith::integer(mem, IntOp::Xor, r, a, b)?;
        }
        Opcode::Cmp => {
            let [r, op_slot, a, b] = operands(code, pc)?;
            arith::compare(mem, r, op_slot, a, b)?;
        }
        Opcode::Invoke => {
            invoke(mem, heap, names, code, pc, at, mask, sink)?;
        }
        Opcode::Return => return Ok(Flow::Halt),
        Opcode::Goto => {
            let [off] = operands(code, pc)?;
            let delta = mem.read_as_i64(off)?;
            *pc = jump(anchor, delta, code.len())?;
        }
    }
    Ok(Flow::Continue)
}
