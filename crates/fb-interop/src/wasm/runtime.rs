//! Solver modules on wasmtime.
//!
//! One [`WasmSandbox`] owns the engine and compiles modules; each
//! [`WasmInstance`] is an isolated store with its own memory cap, fuel
//! budget and return channel. WASI preview1 is always linked so modules
//! built for `wasm32-wasip1` instantiate as well as `wasm32-unknown-unknown`
//! ones.

use super::config::{WasiCapabilities, WasmConfig};
use super::host_functions::InteropHostFunctions;
use crate::channel::ReturnChannel;
use crate::error::{InteropError, Result};
use crate::memory::{check_range, ForeignString};
use crate::module::{CallMetrics, SandboxModule};
use crate::request::OrientationSet;

use std::path::Path;
use std::time::Instant;

use wasmtime::*;

/// Exports every solver module must provide.
pub const REQUIRED_EXPORTS: [&str; 4] = ["memory", "alloc", "dealloc", "solve_fb"];

/// Per-store data reachable from host functions.
pub struct WasmHostState {
    preview1: wasmtime_wasi::preview1::WasiP1Ctx,
    limits: StoreLimits,
    pub(crate) channel: ReturnChannel,
}

/// Compiles solver modules and creates instances under one [`WasmConfig`].
pub struct WasmSandbox {
    engine: Engine,
    config: WasmConfig,
}

/// A compiled solver module, not yet instantiated.
pub struct WasmModule {
    module: Module,
    name: String,
}

/// An instantiated solver module ready for requests.
pub struct WasmInstance {
    store: Store<WasmHostState>,
    instance: Instance,
    memory: Memory,
    alloc: TypedFunc<i32, i32>,
    dealloc: TypedFunc<(i32, i32), ()>,
    solve_fb: TypedFunc<(i32, i32, i32), ()>,
    fuel_limit: Option<u64>,
}

impl WasmSandbox {
    /// Build the engine for `config`.
    pub fn new(config: WasmConfig) -> Result<Self> {
        // Configure optimization
        let opt_level = match config.optimization_level {
            0 => OptLevel::None,
            1 => OptLevel::Speed,
            _ => OptLevel::SpeedAndSize,
        };

        // Configure engine features
        let mut engine_config = Config::new();
        engine_config
            .cranelift_opt_level(opt_level)
            .wasm_simd(config.enable_simd)
            // Metering must be decided per engine, before any store exists.
            .consume_fuel(config.fuel_limit.is_some());

        // Create engine
        let engine = Engine::new(&engine_config).map_err(|e| {
            InteropError::Instantiation(format!("engine creation failed: {}", e))
        })?;

        Ok(Self { engine, config })
    }

    /// Compile the module at `path`, named after its file stem.
    pub fn load_module(&self, path: impl AsRef<Path>) -> Result<WasmModule> {
        let path = path.as_ref();
        let name = match path.file_stem().and_then(|stem| stem.to_str()) {
            Some(stem) => stem.to_string(),
            None => path.display().to_string(),
        };

        let module = Module::from_file(&self.engine, path).map_err(|e| {
            InteropError::Instantiation(format!("module load failed: {}", e))
        })?;

        Ok(WasmModule { module, name })
    }

    /// Compile a module from memory. Accepts the binary or the text format.
    pub fn load_module_bytes(&self, name: &str, bytes: &[u8]) -> Result<WasmModule> {
        let module = Module::new(&self.engine, bytes).map_err(|e| {
            InteropError::Instantiation(format!("module creation failed: {}", e))
        })?;

        Ok(WasmModule {
            module,
            name: name.to_string(),
        })
    }

    /// Instantiate a solver module and resolve its interop exports.
    pub fn instantiate(&self, module: &WasmModule) -> Result<WasmInstance> {
        // Check required exports
        let missing: Vec<&str> = REQUIRED_EXPORTS
            .iter()
            .copied()
            .filter(|name| module.module.get_export(name).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(InteropError::Instantiation(format!(
                "module '{}' is missing exports: {}",
                module.name,
                missing.join(", ")
            )));
        }

        // Create store with host state
        let host_state = self.build_host_state(&self.config.capabilities)?;
        let mut store = Store::new(&self.engine, host_state);

        // Configure resource limits
        store.limiter(|state| &mut state.limits);

        // Add fuel if configured
        if let Some(fuel) = self.config.fuel_limit {
            store.set_fuel(fuel).map_err(|e| {
                InteropError::Instantiation(format!("fuel setup failed: {}", e))
            })?;
        }

        // Create linker with WASI preview1 support
        let mut linker: Linker<WasmHostState> = Linker::new(&self.engine);
        wasmtime_wasi::preview1::add_to_linker_sync(&mut linker, |state| &mut state.preview1)
            .map_err(|e| InteropError::Instantiation(format!("WASI link failed: {}", e)))?;

        // Add interop host functions
        InteropHostFunctions::register(&mut linker)?;

        // Instantiate
        let instance = linker
            .instantiate(&mut store, &module.module)
            .map_err(|e| InteropError::Instantiation(format!("instantiation failed: {}", e)))?;

        // Resolve exports
        let memory = instance
            .get_memory(&mut store, "memory")
            .ok_or_else(|| InteropError::Instantiation("no memory export found".to_string()))?;
        let alloc = typed_export(&instance, &mut store, "alloc")?;
        let dealloc = typed_export(&instance, &mut store, "dealloc")?;
        let solve_fb = typed_export(&instance, &mut store, "solve_fb")?;

        tracing::debug!(module = %module.name, "instantiated solver module");

        Ok(WasmInstance {
            store,
            instance,
            memory,
            alloc,
            dealloc,
            solve_fb,
            fuel_limit: self.config.fuel_limit,
        })
    }

    /// Fresh per-instance state: a WASI context with only the granted
    /// streams, the memory cap and an idle return channel.
    fn build_host_state(&self, caps: &WasiCapabilities) -> Result<WasmHostState> {
        let mut builder = wasmtime_wasi::WasiCtxBuilder::new();

        // Grant output streams only
        if caps.stdout {
            builder.inherit_stdout();
        }
        if caps.stderr {
            builder.inherit_stderr();
        }
        let preview1 = builder.build_p1();

        // Memory limit
        let limits = StoreLimitsBuilder::new()
            .memory_size(self.config.max_memory)
            .build();

        Ok(WasmHostState {
            preview1,
            limits,
            channel: ReturnChannel::new(),
        })
    }

    /// The configuration every instance is created under.
    pub fn config(&self) -> &WasmConfig {
        &self.config
    }
}

fn typed_export<P, R>(
    instance: &Instance,
    store: &mut Store<WasmHostState>,
    name: &str,
) -> Result<TypedFunc<P, R>>
where
    P: WasmParams,
    R: WasmResults,
{
    instance
        .get_typed_func::<P, R>(store, name)
        .map_err(|e| InteropError::Instantiation(format!("export '{}' has the wrong signature: {}", name, e)))
}

/// Map a failed call, keeping interop errors raised by host functions.
fn call_error(name: &str, e: Error) -> InteropError {
    match e.downcast::<InteropError>() {
        Ok(err) => err,
        Err(e) => InteropError::Wasm(format!("{} failed: {:#}", name, e)),
    }
}

impl WasmModule {
    /// Name used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Names of the exported functions.
    pub fn exports(&self) -> impl Iterator<Item = &str> {
        self.module.exports().filter_map(|e| {
            if matches!(e.ty(), ExternType::Func(_)) {
                Some(e.name())
            } else {
                None
            }
        })
    }
}

impl WasmInstance {
    /// Fuel left from the current call's budget, if metering is on.
    pub fn remaining_fuel(&self) -> Option<u64> {
        self.store.get_fuel().ok()
    }

    /// Reset the fuel budget. The limit applies to each call separately.
    fn refuel(&mut self) -> Result<()> {
        if let Some(fuel) = self.fuel_limit {
            self.store
                .set_fuel(fuel)
                .map_err(|e| InteropError::Wasm(format!("fuel setup failed: {}", e)))?;
        }
        Ok(())
    }

    /// Call an exported `() -> i32` function, for module diagnostics such as
    /// allocator counters.
    pub fn call_i32(&mut self, name: &str) -> Result<i32> {
        let func = self
            .instance
            .get_typed_func::<(), i32>(&mut self.store, name)
            .map_err(|e| InteropError::Wasm(format!("function '{}' not found: {}", name, e)))?;
        func.call(&mut self.store, ())
            .map_err(|e| call_error(name, e))
    }
}

impl SandboxModule for WasmInstance {
    fn memory_size(&mut self) -> usize {
        self.memory.data_size(&self.store)
    }

    fn read_memory(&mut self, ptr: u32, len: u32) -> Result<Vec<u8>> {
        let mem_data = self.memory.data(&self.store);
        let range = check_range(ptr, len, mem_data.len())?;
        Ok(mem_data[range].to_vec())
    }

    fn write_memory(&mut self, ptr: u32, data: &[u8]) -> Result<()> {
        let len = u32::try_from(data.len()).map_err(|_| InteropError::OutOfBounds {
            ptr,
            len: u32::MAX,
            memory_size: self.memory.data_size(&self.store),
        })?;
        let mem_data = self.memory.data_mut(&mut self.store);
        let range = check_range(ptr, len, mem_data.len())?;
        mem_data[range].copy_from_slice(data);
        Ok(())
    }

    fn alloc(&mut self, size: u32) -> Result<u32> {
        self.refuel()?;
        let ptr = self
            .alloc
            .call(&mut self.store, size as i32)
            .map_err(|e| call_error("alloc", e))?;
        Ok(ptr as u32)
    }

    fn dealloc(&mut self, ptr: u32, size: u32) -> Result<()> {
        self.refuel()?;
        self.dealloc
            .call(&mut self.store, (ptr as i32, size as i32))
            .map_err(|e| call_error("dealloc", e))
    }

    fn solve(
        &mut self,
        scramble: ForeignString,
        orientations: OrientationSet,
    ) -> Result<CallMetrics> {
        self.refuel()?;
        let start = Instant::now();
        let fuel_before = self.store.get_fuel().ok();

        self.solve_fb
            .call(
                &mut self.store,
                (
                    scramble.ptr() as i32,
                    scramble.len() as i32,
                    orientations.bits() as i32,
                ),
            )
            .map_err(|e| call_error("solve_fb", e))?;

        let fuel_after = self.store.get_fuel().ok();
        let fuel_consumed = fuel_before.zip(fuel_after).map(|(b, a)| b - a);

        Ok(CallMetrics {
            execution_time_us: start.elapsed().as_micros() as u64,
            fuel_consumed,
        })
    }

    fn return_channel(&mut self) -> &mut ReturnChannel {
        &mut self.store.data_mut().channel
    }
}
