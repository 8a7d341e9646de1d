//! Reference solver module for the fb-interop sandbox.
//!
//! Implements the guest half of the interop ABI: the host reserves a buffer
//! with `alloc`, writes the scramble into it and calls `solve_fb`. The result
//! is written into a buffer this module allocates, and handed back by pushing
//! its length and then its pointer onto the host's return channel. The host
//! frees both buffers through `dealloc`.
//!
//! The solver itself is a stub: it answers with the inverse of the scramble.
//!
//! Build with `cargo build --target wasm32-unknown-unknown --release`.

use fb_notation::{invert, parse_moves, ScrambleError};
use serde_json::{json, Value};
use std::alloc::{alloc as std_alloc, dealloc as std_dealloc, Layout};

// =============================================================================
// Host Imports
// =============================================================================

#[cfg(target_arch = "wasm32")]
#[link(wasm_import_module = "fb_interop")]
extern "C" {
    /// Push one value onto the host's return channel.
    fn stack_push(value: i32);

    /// Forward a UTF-8 message to the host log.
    fn log(ptr: i32, len: i32);
}

#[cfg(target_arch = "wasm32")]
fn push_result(ptr: i32, len: i32) {
    unsafe {
        stack_push(len);
        stack_push(ptr);
    }
}

#[cfg(target_arch = "wasm32")]
fn log_message(message: &str) {
    unsafe { log(message.as_ptr() as i32, message.len() as i32) };
}

#[cfg(not(target_arch = "wasm32"))]
fn push_result(_ptr: i32, _len: i32) {}

#[cfg(not(target_arch = "wasm32"))]
fn log_message(_message: &str) {}

// =============================================================================
// Allocator Exports
// =============================================================================

const ALIGN: usize = 8;

/// Allocate `size` bytes. Returns 0 on failure.
#[no_mangle]
pub extern "C" fn alloc(size: i32) -> i32 {
    if size <= 0 {
        return 0;
    }
    match Layout::from_size_align(size as usize, ALIGN) {
        Ok(layout) => unsafe { std_alloc(layout) as i32 },
        Err(_) => 0,
    }
}

/// Free a buffer returned by [`alloc`]; `size` must match the request.
#[no_mangle]
pub extern "C" fn dealloc(ptr: i32, size: i32) {
    if ptr == 0 || size <= 0 {
        return;
    }
    if let Ok(layout) = Layout::from_size_align(size as usize, ALIGN) {
        unsafe { std_dealloc(ptr as *mut u8, layout) };
    }
}

// =============================================================================
// Solver Export
// =============================================================================

/// Solve the scramble at `ptr..ptr + len` for the orientations in
/// `orientation_mask` and push the JSON result.
#[no_mangle]
pub extern "C" fn solve_fb(ptr: i32, len: i32, orientation_mask: i32) {
    let input: &[u8] = if ptr == 0 || len <= 0 {
        &[]
    } else {
        unsafe { std::slice::from_raw_parts(ptr as *const u8, len as usize) }
    };

    let result = match std::str::from_utf8(input) {
        Ok(scramble) => {
            log_message(&format!(
                "solving {:?} for {} orientations",
                scramble,
                (orientation_mask as u32 & 0x00ff_ffff).count_ones()
            ));
            solve(scramble)
        }
        Err(_) => json!({ "error": "scramble is not valid UTF-8" }),
    };

    let text = result.to_string();
    let out = alloc(text.len() as i32);
    if out == 0 {
        // Nothing pushed: the host reports the missing result.
        return;
    }
    unsafe {
        std::ptr::copy_nonoverlapping(text.as_ptr(), out as *mut u8, text.len());
    }
    push_result(out, text.len() as i32);
}

/// Stub solution: undo the scramble move by move.
pub fn solve(scramble: &str) -> Value {
    match inverse(scramble) {
        Ok(moves) => json!({ "length": moves.len(), "moves": moves }),
        Err(e) => json!({ "error": e.to_string() }),
    }
}

/// Inverse of a move sequence in notation.
pub fn inverse(scramble: &str) -> Result<Vec<String>, ScrambleError> {
    let moves = parse_moves(scramble)?;
    Ok(invert(&moves).iter().map(|mv| mv.to_string()).collect())
}
