//! The seam between the protocol and a concrete sandbox.

use crate::channel::ReturnChannel;
use crate::error::Result;
use crate::memory::ForeignString;
use crate::request::OrientationSet;

/// Timing of a single call into the sandbox.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallMetrics {
    /// Execution time in microseconds
    pub execution_time_us: u64,
    /// Fuel consumed (if fuel metering enabled)
    pub fuel_consumed: Option<u64>,
}

/// One instantiated sandbox: its linear memory, its exports and the return
/// channel its `stack_push` import feeds.
///
/// Implementations perform raw calls only. Bookkeeping, bounds policy and
/// channel discipline live in [`Allocator`](crate::Allocator),
/// [`marshal`](crate::marshal) and [`Dispatcher`](crate::Dispatcher).
pub trait SandboxModule {
    /// Current size of linear memory in bytes.
    fn memory_size(&mut self) -> usize;

    /// Copy `len` bytes at `ptr` out of linear memory.
    fn read_memory(&mut self, ptr: u32, len: u32) -> Result<Vec<u8>>;

    /// Copy `data` into linear memory at `ptr`.
    fn write_memory(&mut self, ptr: u32, data: &[u8]) -> Result<()>;

    /// Call the module's `alloc` export. Returns the raw pointer, `0` on failure.
    fn alloc(&mut self, size: u32) -> Result<u32>;

    /// Call the module's `dealloc` export.
    fn dealloc(&mut self, ptr: u32, size: u32) -> Result<()>;

    /// Call the solve routine. The routine answers through the return channel.
    fn solve(&mut self, scramble: ForeignString, orientations: OrientationSet)
        -> Result<CallMetrics>;

    /// The return channel owned by this sandbox.
    fn return_channel(&mut self) -> &mut ReturnChannel;
}

impl<M: SandboxModule + ?Sized> SandboxModule for Box<M> {
    fn memory_size(&mut self) -> usize {
        (**self).memory_size()
    }

    fn read_memory(&mut self, ptr: u32, len: u32) -> Result<Vec<u8>> {
        (**self).read_memory(ptr, len)
    }

    fn write_memory(&mut self, ptr: u32, data: &[u8]) -> Result<()> {
        (**self).write_memory(ptr, data)
    }

    fn alloc(&mut self, size: u32) -> Result<u32> {
        (**self).alloc(size)
    }

    fn dealloc(&mut self, ptr: u32, size: u32) -> Result<()> {
        (**self).dealloc(ptr, size)
    }

    fn solve(
        &mut self,
        scramble: ForeignString,
        orientations: OrientationSet,
    ) -> Result<CallMetrics> {
        (**self).solve(scramble, orientations)
    }

    fn return_channel(&mut self) -> &mut ReturnChannel {
        (**self).return_channel()
    }
}
