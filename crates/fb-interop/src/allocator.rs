//! Host-side bookkeeping over the module's `alloc`/`dealloc` exports.
//!
//! The module allocator only knows pointers; `dealloc` also wants the size.
//! [`Allocator`] remembers every range that is live across the boundary so a
//! release needs nothing but the pointer, and so leaks are observable.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::error::{InteropError, Result};
use crate::memory::{check_range, ForeignString};
use crate::module::SandboxModule;

/// Table of ranges live inside one sandbox.
#[derive(Debug, Default)]
pub struct Allocator {
    live: HashMap<u32, u32>,
}

impl Allocator {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve at least `byte_length` bytes inside the sandbox.
    ///
    /// Zero-length reservations request one byte so every reservation owns a
    /// distinct pointer. May grow linear memory.
    pub fn reserve<M>(&mut self, module: &mut M, byte_length: u32) -> Result<u32>
    where
        M: SandboxModule + ?Sized,
    {
        let size = byte_length.max(1);
        let ptr = module.alloc(size)?;
        if ptr == 0 {
            tracing::warn!(size, "sandbox allocator returned null");
            return Err(InteropError::Allocation { requested: size });
        }
        if check_range(ptr, size, module.memory_size()).is_err() {
            tracing::warn!(ptr, size, "sandbox allocator returned a range outside memory");
            give_back(module, ptr, size);
            return Err(InteropError::Allocation { requested: size });
        }

        match self.live.entry(ptr) {
            Entry::Occupied(_) => {
                tracing::warn!(ptr, size, "sandbox allocator handed out a live pointer");
                give_back(module, ptr, size);
                Err(InteropError::Allocation { requested: size })
            }
            Entry::Vacant(slot) => {
                slot.insert(size);
                tracing::trace!(ptr, size, "reserved");
                Ok(ptr)
            }
        }
    }

    /// Take responsibility for releasing a buffer the sandbox allocated
    /// itself. Empty buffers own nothing and are ignored.
    pub fn adopt(&mut self, buffer: ForeignString) -> Result<()> {
        if buffer.is_empty() {
            return Ok(());
        }
        match self.live.entry(buffer.ptr()) {
            Entry::Occupied(_) => Err(InteropError::AliasedResult(buffer.ptr())),
            Entry::Vacant(slot) => {
                slot.insert(buffer.len());
                Ok(())
            }
        }
    }

    /// Release a range previously reserved or adopted.
    pub fn release<M>(&mut self, module: &mut M, ptr: u32) -> Result<()>
    where
        M: SandboxModule + ?Sized,
    {
        let size = self
            .live
            .remove(&ptr)
            .ok_or(InteropError::UnknownPointer(ptr))?;
        tracing::trace!(ptr, size, "released");
        module.dealloc(ptr, size)
    }

    /// Whether `ptr` is live in this table.
    pub fn is_live(&self, ptr: u32) -> bool {
        self.live.contains_key(&ptr)
    }

    /// Number of live ranges.
    pub fn outstanding_count(&self) -> usize {
        self.live.len()
    }

    /// Total bytes in live ranges.
    pub fn outstanding_bytes(&self) -> u64 {
        self.live.values().map(|&size| u64::from(size)).sum()
    }
}

/// Return a rejected allocation to the module.
fn give_back<M>(module: &mut M, ptr: u32, size: u32)
where
    M: SandboxModule + ?Sized,
{
    if let Err(e) = module.dealloc(ptr, size) {
        tracing::warn!(ptr, size, "failed to return rejected allocation: {}", e);
    }
}
