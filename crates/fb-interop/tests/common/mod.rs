//! Shared helpers for the wasmtime integration tests.

#![allow(dead_code)]

use fb_interop::{Dispatcher, WasmConfig, WasmInstance, WasmSandbox};

pub const PRELUDE: &str = include_str!("../fixtures/solver_prelude.wat");
pub const SOLVE_CONSTANT: &str = include_str!("../fixtures/solve_constant.wat");
pub const SOLVE_ECHO: &str = include_str!("../fixtures/solve_echo.wat");

/// Solve routine that returns without pushing anything.
pub const SOLVE_SILENT: &str = r#"(func (export "solve_fb") (param i32 i32 i32))"#;

/// Solve routine that pushes only a pointer.
pub const SOLVE_ONE_PUSH: &str = r#"(func (export "solve_fb") (param i32 i32 i32)
  (call $push (i32.const 16)))"#;

/// Solve routine that pushes an extra value after the pair.
pub const SOLVE_THREE_PUSHES: &str = r#"(func (export "solve_fb") (param i32 i32 i32)
  (call $push (i32.const 26))
  (call $push (i32.const 16))
  (call $push (i32.const 16)))"#;

/// Solve routine claiming a 1 MiB result in a 64 KiB memory.
pub const SOLVE_PAST_END: &str = r#"(func (export "solve_fb") (param i32 i32 i32)
  (call $push (i32.const 1048576))
  (call $push (i32.const 16)))"#;

/// Solve routine that hands back a full result, then traps.
pub const SOLVE_PUSH_THEN_TRAP: &str = r#"(func (export "solve_fb") (param i32 i32 i32)
  (local $out i32)
  (local.set $out (call $alloc (i32.const 26)))
  (memory.copy (local.get $out) (i32.const 16) (i32.const 26))
  (call $push (i32.const 26))
  (call $push (local.get $out))
  unreachable)"#;

/// Solve routine that traps.
pub const SOLVE_TRAP: &str = r#"(func (export "solve_fb") (param i32 i32 i32)
  unreachable)"#;

/// Full module text for a solve routine.
pub fn module_wat(solve: &str) -> String {
    PRELUDE.replace("{SOLVE}", solve)
}

pub fn instance_with(config: WasmConfig, solve: &str) -> WasmInstance {
    let sandbox = WasmSandbox::new(config).expect("failed to create sandbox");
    let module = sandbox
        .load_module_bytes("fixture", module_wat(solve).as_bytes())
        .expect("failed to load module");
    sandbox.instantiate(&module).expect("failed to instantiate")
}

pub fn dispatcher(solve: &str) -> Dispatcher<WasmInstance> {
    Dispatcher::new(instance_with(WasmConfig::default(), solve))
}

/// Bytes the module's own allocator considers live.
pub fn live_bytes(dispatcher: &mut Dispatcher<WasmInstance>) -> i32 {
    dispatcher
        .module_mut()
        .call_i32("live_bytes")
        .expect("live_bytes call failed")
}

/// Solve routine that answers with bytes that are not UTF-8.
pub const SOLVE_BAD_UTF8: &str = r#"(func (export "solve_fb") (param i32 i32 i32)
  (local $out i32)
  (local.set $out (call $alloc (i32.const 2)))
  (i32.store8 (local.get $out) (i32.const 255))
  (i32.store8 offset=1 (local.get $out) (i32.const 254))
  (call $push (i32.const 2))
  (call $push (local.get $out)))"#;
