// Copyright 2026 the AqVM Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Reference command-line embedding of the AQ bytecode VM.
//!
//! Usage: `aqvm <bytecode-file>`
//!
//! Exit codes: `0` on normal completion, `-1` for a missing argument, `-2`
//! for a file that cannot be opened or decoded, `-3` for a bad magic header.
//! Runtime traps report through stderr and exit non-zero.

use std::io::Write;
use std::process;

use anyhow::Context;

use aqvm::format::DecodeError;
use aqvm::host::HostError;
use aqvm::memory::Scalar;
use aqvm::vm::{Limits, Vm};

fn main() {
    let Some(path) = std::env::args().nth(1) else {
        eprintln!("usage: aqvm <bytecode-file>");
        process::exit(-1);
    };

    let bytes = match std::fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("error: could not open {path}: {e}");
            process::exit(-2);
        }
    };

    let mut vm = match Vm::load(&bytes, Limits::default()) {
        Ok(vm) => vm,
        Err(DecodeError::BadMagic) => {
            eprintln!("error: {path} is not an AQBC image");
            process::exit(-3);
        }
        Err(e) => {
            eprintln!("error: could not decode {path}: {e}");
            process::exit(-2);
        }
    };

    register_builtins(&mut vm);

    if let Err(e) = run(&mut vm).with_context(|| format!("while executing {path}")) {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

fn run(vm: &mut Vm) -> anyhow::Result<()> {
    vm.run().map_err(anyhow::Error::new)
}

fn register_builtins(vm: &mut Vm) {
    // print(format_ptr) -> int: writes the NUL-terminated string at the
    // guest address in the first argument slot and returns the byte count.
    vm.register(
        "print",
        Box::new(|ctx, args, ret| {
            let slot = args.get(0).ok_or(HostError::BadSlot)?;
            let addr = ctx.memory.read_word(slot)?;
            let text = ctx.c_bytes(addr)?.to_vec();

            let mut out = std::io::stdout().lock();
            out.write_all(&text).map_err(|_| HostError::Failed)?;
            out.flush().map_err(|_| HostError::Failed)?;

            if let Some(ret_slot) = ret.get(0) {
                ctx.memory
                    .write_scalar(ret_slot, Scalar::I32(text.len() as i32))?;
            }
            Ok(())
        }),
    );
}
