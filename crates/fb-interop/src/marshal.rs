//! UTF-8 string marshalling across the sandbox boundary.
//!
//! Strings are not null-terminated by contract; the length always travels
//! next to the pointer.

use crate::allocator::Allocator;
use crate::error::{DecodeError, InteropError, Result};
use crate::memory::ForeignString;
use crate::module::SandboxModule;

/// Copy `text` into a freshly reserved sandbox buffer.
///
/// The returned range is live in `allocator` and must be released by the
/// caller once the sandbox has consumed it.
pub fn encode<M>(module: &mut M, allocator: &mut Allocator, text: &str) -> Result<ForeignString>
where
    M: SandboxModule + ?Sized,
{
    let bytes = text.as_bytes();
    let len = u32::try_from(bytes.len()).map_err(|_| InteropError::Allocation {
        requested: u32::MAX,
    })?;

    let ptr = allocator.reserve(module, len)?;

    // `alloc` may have grown memory, so check against the size seen now.
    let written = ForeignString::new(ptr, len, module.memory_size())
        .and_then(|encoded| module.write_memory(ptr, bytes).map(|()| encoded));

    match written {
        Ok(encoded) => {
            tracing::trace!(ptr, len, "encoded string");
            Ok(encoded)
        }
        Err(e) => {
            if let Err(release_err) = allocator.release(module, ptr) {
                tracing::warn!("failed to release buffer after encode error: {}", release_err);
            }
            Err(e)
        }
    }
}

/// Read the bytes behind `string` from current memory and decode them.
pub fn decode<M>(module: &mut M, string: ForeignString) -> Result<String>
where
    M: SandboxModule + ?Sized,
{
    let bytes = module.read_memory(string.ptr(), string.len())?;
    let text = String::from_utf8(bytes).map_err(DecodeError::from)?;
    Ok(text)
}
