//! Error types for the interop crate.

use thiserror::Error;

use crate::scramble::ScrambleError;

/// Failure while turning sandbox bytes back into a response.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// Bytes read from linear memory are not valid UTF-8
    #[error("result is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// Result text is not valid JSON
    #[error("result is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Interop error type
#[derive(Error, Debug)]
pub enum InteropError {
    /// The sandbox module could not be loaded, compiled or instantiated
    #[error("sandbox instantiation failed: {0}")]
    Instantiation(String),

    /// The module allocator could not satisfy a reservation
    #[error("sandbox allocation of {requested} bytes failed")]
    Allocation {
        /// Bytes requested from `alloc`
        requested: u32,
    },

    /// The return channel did not hold the expected number of entries
    #[error("return channel desync: expected {expected} entries, found {found}")]
    ProtocolDesync {
        /// Entries the protocol requires
        expected: usize,
        /// Entries actually present
        found: usize,
    },

    /// Result bytes could not be decoded
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// A (pointer, length) pair reaches past the end of linear memory
    #[error("range {ptr}+{len} is outside linear memory of {memory_size} bytes")]
    OutOfBounds {
        /// Start offset
        ptr: u32,
        /// Byte length
        len: u32,
        /// Memory size at the time of the check
        memory_size: usize,
    },

    /// A result buffer overlaps a range that is still live on the host side
    #[error("result buffer at {0:#x} aliases a live allocation")]
    AliasedResult(u32),

    /// Release of a pointer the allocator never handed out
    #[error("release of unknown pointer {0:#x}")]
    UnknownPointer(u32),

    /// Scramble text failed notation validation
    #[error("invalid scramble: {0}")]
    InvalidScramble(#[from] ScrambleError),

    /// Orientation index outside the orientation table
    #[error("orientation index {0} out of range (0..24)")]
    InvalidOrientation(u8),

    /// The dispatcher was entered while a request was in flight.
    ///
    /// A state guard only: `Dispatcher::dispatch` takes `&mut self`, so safe
    /// code cannot re-enter it and this is never returned in practice.
    #[error("dispatcher busy: a request is already in flight")]
    Busy,

    /// Trap, link or export lookup failure inside the wasm runtime
    #[error("WASM error: {0}")]
    Wasm(String),

    /// The worker task is gone
    #[error("worker closed")]
    WorkerClosed,

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl InteropError {
    /// Whether this error indicates a broken contract with the module
    /// rather than an ordinary request failure.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, InteropError::ProtocolDesync { .. } | InteropError::OutOfBounds { .. })
    }
}

/// Result type alias for interop operations
pub type Result<T> = std::result::Result<T, InteropError>;
