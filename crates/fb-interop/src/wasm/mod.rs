//! WebAssembly sandbox for the solver module.
//!
//! Uses wasmtime as the runtime, with WASI preview1 linked in under a
//! deny-by-default capability set.
//!
//! ## Module ABI
//!
//! A solver module exports `memory`, `alloc(size) -> ptr`,
//! `dealloc(ptr, size)` and `solve_fb(ptr, len, orientation_mask)`, and
//! imports `fb_interop.stack_push(value)` to hand back its result.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fb_interop::{Dispatcher, Request};
//! use fb_interop::wasm::{WasmSandbox, WasmConfig};
//!
//! let sandbox = WasmSandbox::new(WasmConfig::default())?;
//! let module = sandbox.load_module("web_frontend_bg.wasm")?;
//! let mut dispatcher = Dispatcher::new(sandbox.instantiate(&module)?);
//!
//! let response = dispatcher.dispatch(&Request::new("R U R' U'", vec![0, 1, 2, 3]))?;
//! ```

mod config;
mod host_functions;
mod runtime;

pub use config::{WasiCapabilities, WasmConfig, WorkerConfig, DEFAULT_MODULE_FILE};
pub use host_functions::{InteropHostFunctions, IMPORT_MODULE};
pub use runtime::{WasmHostState, WasmInstance, WasmModule, WasmSandbox, REQUIRED_EXPORTS};
