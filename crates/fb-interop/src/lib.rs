//! # FB Interop
//!
//! Host side of the first-block solver sandbox.
//!
//! The solver runs inside a WebAssembly module with its own linear memory.
//! This crate moves a scramble into that memory, calls the solver, collects
//! the result through a return channel and hands back parsed JSON, without
//! leaking buffers on either side of the boundary.
//!
//! ## Protocol
//!
//! ```text
//!   host                                   sandbox
//!   ----                                   -------
//!   alloc(len) ------------------------->  reserve bytes
//!   write scramble at ptr
//!   solve_fb(ptr, len, mask) ----------->  compute, alloc result
//!                            <-----------  stack_push(result_len)
//!                            <-----------  stack_push(result_ptr)
//!   pop ptr, pop len
//!   read + decode result
//!   dealloc(result_ptr, result_len) ---->  free result
//!   dealloc(ptr, len) ------------------>  free scramble
//! ```
//!
//! | Piece | Type |
//! |-------|------|
//! | Linear memory range | [`ForeignString`] |
//! | Allocator bookkeeping | [`Allocator`] |
//! | Encode / decode | [`marshal`] |
//! | Result stack | [`ReturnChannel`] |
//! | One-request-at-a-time driver | [`Dispatcher`] |
//! | Queue with readiness gate | [`worker`] |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use fb_interop::{worker, Request};
//! use fb_interop::wasm::WorkerConfig;
//!
//! let worker = worker::spawn_wasm(WorkerConfig::default().origin("./pkg"));
//! let response = worker.solve(Request::new("R U R' U'", vec![0, 1, 2, 3])).await?;
//! println!("{}", response.as_value());
//! ```
//!
//! ## Features
//!
//! - `wasm` (default) - wasmtime-backed sandbox instances

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod allocator;
pub mod channel;
pub mod dispatcher;
pub mod error;
pub mod marshal;
pub mod memory;
pub mod module;
pub mod request;
pub mod stats;
pub mod worker;

#[cfg(feature = "wasm")]
pub mod wasm;

#[cfg(test)]
mod testing;

/// Move notation, shared with the reference solver module.
pub use fb_notation as scramble;

// Re-export main types
pub use allocator::Allocator;
pub use channel::{ChannelPhase, RawResult, ReturnChannel};
pub use dispatcher::{DispatchState, Dispatcher};
pub use error::{DecodeError, InteropError, Result};
pub use memory::ForeignString;
pub use module::{CallMetrics, SandboxModule};
pub use request::{OrientationSet, Request, Response};
pub use stats::SolveStats;
pub use worker::{Readiness, WorkerHandle, WorkerOptions};

#[cfg(feature = "wasm")]
pub use wasm::{WasmConfig, WasmInstance, WasmSandbox, WorkerConfig};
