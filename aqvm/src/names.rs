// Copyright 2026 the AqVM Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Host-function name table.
//!
//! A fixed-bucket hash table: 1024 buckets keyed by the djb2 string hash,
//! each bucket an ordered chain of `(name, handler)` entries. Registration
//! prepends, so re-registering a name shadows the older entry. Entries are
//! registered before execution starts; `invoke` only reads.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use crate::host::HostFn;

/// Number of hash buckets.
pub const BUCKETS: usize = 1024;

/// Returns the bucket index for `name` (djb2 modulo [`BUCKETS`]).
#[must_use]
pub fn bucket(name: &str) -> usize {
    let mut h: u64 = 5381;
    for b in name.bytes() {
        h = (h << 5).wrapping_add(h).wrapping_add(u64::from(b));
    }
    (h % BUCKETS as u64) as usize
}

struct Entry {
    name: String,
    handler: HostFn,
}

/// The host-function registry consulted by `invoke`.
pub struct NameTable {
    buckets: Vec<Vec<Entry>>,
}

impl fmt::Debug for NameTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NameTable")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl Default for NameTable {
    fn default() -> Self {
        Self::new()
    }
}

impl NameTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        let mut buckets = Vec::with_capacity(BUCKETS);
        buckets.resize_with(BUCKETS, Vec::new);
        Self { buckets }
    }

    /// Returns the number of registered entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }

    /// Returns `true` if no entries are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registers `handler` under `name`, shadowing any previous entry.
    pub fn register(&mut self, name: impl Into<String>, handler: HostFn) {
        let name = name.into();
        let chain = &mut self.buckets[bucket(&name)];
        chain.insert(0, Entry { name, handler });
    }

    /// Returns `true` if `name` has a registered handler.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.buckets[bucket(name)].iter().any(|e| e.name == name)
    }

    /// Looks up the handler registered under `name`.
    pub fn lookup_mut(&mut self, name: &str) -> Option<&mut HostFn> {
        self.buckets[bucket(name)]
            .iter_mut()
            .find(|e| e.name == name)
            .map(|e| &mut e.handler)
    }
}

#[cfg(test)]
mod tests {
    use alloc::boxed::Box;

    use super::*;

    fn nop_handler() -> HostFn {
        Box::new(|_, _, _| Ok(()))
    }

    #[test]
    fn register_and_lookup() {
        let mut table = NameTable::new();
        assert!(table.is_empty());
        table.register("print", nop_handler());
        assert_eq!(table.len(), 1);
        assert!(table.contains("print"));
        assert!(table.lookup_mut("print").is_some());
        assert!(table.lookup_mut("exit").is_none());
    }

    #[test]
    fn colliding_names_share_a_bucket_but_resolve() {
        // "aa" and "b@" land in the same djb2 bucket.
        assert_eq!(bucket("aa"), bucket("b@"));
        let mut table = NameTable::new();
        table.register("aa", nop_handler());
        table.register("b@", nop_handler());
        assert!(table.contains("aa"));
        assert!(table.contains("b@"));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn reregistration_shadows() {
        use crate::host::{CallSlots, HostCtx, HostError};

        let mut table = NameTable::new();
        // which handler wins is observable through the call result
        table.register("f", Box::new(|_, _, _| Err(HostError::Failed)));
        table.register("f", nop_handler());

        let mut memory = crate::memory::TaggedMemory::default();
        let mut heap = crate::heap::Heap::new(0);
        let mut ctx = HostCtx {
            memory: &mut memory,
            heap: &mut heap,
        };
        let handler = table.lookup_mut("f").unwrap();
        assert_eq!(
            handler(&mut ctx, CallSlots::new(&[]), CallSlots::new(&[])),
            Ok(())
        );
    }
}
