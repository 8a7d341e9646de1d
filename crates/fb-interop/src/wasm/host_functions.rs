//! Host functions imported by solver modules.
//!
//! ## Import Module
//!
//! Host functions are imported under the `fb_interop` namespace:
//! ```wat
//! (import "fb_interop" "stack_push" (func $stack_push (param i32)))
//! (import "fb_interop" "log" (func $log (param i32 i32)))
//! ```
//!
//! `stack_push` feeds the return channel; a solve routine calls it with the
//! result length, then the result pointer. `log` forwards a UTF-8 message
//! from guest memory to the host's tracing output.

use wasmtime::{Caller, Linker, Memory};

use super::runtime::WasmHostState;
use crate::error::{InteropError, Result};
use crate::memory::check_range;

/// Namespace the guest imports from.
pub const IMPORT_MODULE: &str = "fb_interop";

/// Interop host functions exposed to WASM modules.
pub struct InteropHostFunctions;

impl InteropHostFunctions {
    /// Register all host functions with the wasmtime linker.
    pub fn register(linker: &mut Linker<WasmHostState>) -> Result<()> {
        Self::register_stack_push(linker)?;
        Self::register_log(linker)?;
        Ok(())
    }

    fn register_stack_push(linker: &mut Linker<WasmHostState>) -> Result<()> {
        linker
            .func_wrap(
                IMPORT_MODULE,
                "stack_push",
                |mut caller: Caller<'_, WasmHostState>, value: i32| -> wasmtime::Result<()> {
                    // Refusal traps the guest; the dispatcher sees the desync.
                    caller.data_mut().channel.push(value as u32)?;
                    Ok(())
                },
            )
            .map_err(|e| {
                InteropError::Instantiation(format!("failed to register stack_push: {}", e))
            })?;
        Ok(())
    }

    fn register_log(linker: &mut Linker<WasmHostState>) -> Result<()> {
        linker
            .func_wrap(
                IMPORT_MODULE,
                "log",
                |mut caller: Caller<'_, WasmHostState>,
                 ptr: i32,
                 len: i32|
                 -> wasmtime::Result<()> {
                    let memory = get_memory(&mut caller)?;
                    let data = memory.data(&caller);
                    let range = check_range(ptr as u32, len as u32, data.len())?;
                    let message = String::from_utf8_lossy(&data[range]);
                    tracing::debug!(target: "fb_interop::guest", "{}", message);
                    Ok(())
                },
            )
            .map_err(|e| InteropError::Instantiation(format!("failed to register log: {}", e)))?;
        Ok(())
    }
}

/// Get memory export from caller.
fn get_memory(caller: &mut Caller<'_, WasmHostState>) -> Result<Memory> {
    caller
        .get_export("memory")
        .and_then(|e| e.into_memory())
        .ok_or_else(|| InteropError::Wasm("no memory export found".to_string()))
}
