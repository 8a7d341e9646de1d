//! Addressing inside sandbox linear memory.
//!
//! Offsets handed out by the module stay valid when memory grows; raw host
//! views of the buffer do not. Nothing here holds a view: every read and
//! write goes back to the module and re-derives the byte slice.

use std::ops::Range;

use crate::error::{InteropError, Result};

/// Size of one wasm page in bytes.
pub const WASM_PAGE_SIZE: usize = 64 * 1024;

/// A UTF-8 byte range inside sandbox linear memory.
///
/// Only constructible through [`ForeignString::new`], which checks the range
/// against the memory size observed at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ForeignString {
    ptr: u32,
    len: u32,
}

impl ForeignString {
    /// Describe `len` bytes at `ptr`, failing if the range ends past `memory_size`.
    pub fn new(ptr: u32, len: u32, memory_size: usize) -> Result<Self> {
        check_range(ptr, len, memory_size)?;
        Ok(Self { ptr, len })
    }

    /// Start offset.
    pub fn ptr(&self) -> u32 {
        self.ptr
    }

    /// Length in bytes.
    pub fn len(&self) -> u32 {
        self.len
    }

    /// Whether the range is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Byte range as host indices.
    pub fn range(&self) -> Range<usize> {
        let start = self.ptr as usize;
        start..start + self.len as usize
    }
}

/// Validate that `ptr..ptr + len` lies inside a memory of `memory_size` bytes.
pub fn check_range(ptr: u32, len: u32, memory_size: usize) -> Result<Range<usize>> {
    let start = ptr as usize;
    match start.checked_add(len as usize) {
        Some(end) if end <= memory_size => Ok(start..end),
        _ => Err(InteropError::OutOfBounds {
            ptr,
            len,
            memory_size,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_bounds() {
        let s = ForeignString::new(16, 8, 64).unwrap();
        assert_eq!(s.ptr(), 16);
        assert_eq!(s.len(), 8);
        assert_eq!(s.range(), 16..24);
        assert!(!s.is_empty());
    }

    #[test]
    fn test_range_ending_at_memory_end() {
        assert!(ForeignString::new(60, 4, 64).is_ok());
        assert!(ForeignString::new(64, 0, 64).is_ok());
    }

    #[test]
    fn test_out_of_bounds() {
        let err = ForeignString::new(60, 5, 64).unwrap_err();
        assert!(matches!(
            err,
            InteropError::OutOfBounds {
                ptr: 60,
                len: 5,
                memory_size: 64
            }
        ));
    }

    #[test]
    fn test_no_overflow_at_u32_limits() {
        assert!(check_range(u32::MAX, u32::MAX, WASM_PAGE_SIZE).is_err());
    }
}
