//! Configuration for the WASM sandbox and the worker that hosts it.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{InteropError, Result};
use crate::worker::WorkerOptions;

/// Well-known file name of the solver module, relative to the origin.
pub const DEFAULT_MODULE_FILE: &str = "web_frontend_bg.wasm";

/// Which host resources the solver's WASI imports reach.
///
/// Everything is closed unless listed here. The solver never needs the
/// environment, arguments or a filesystem, so only the output streams can be
/// opened, and only for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WasiCapabilities {
    /// Guest stdout reaches the host's stdout
    pub stdout: bool,

    /// Guest stderr (panic messages) reaches the host's stderr
    pub stderr: bool,
}

impl WasiCapabilities {
    /// No output at all.
    pub fn none() -> Self {
        Self::default()
    }

    /// Guest panics show up on the host's stderr.
    pub fn diagnostics() -> Self {
        Self {
            stderr: true,
            stdout: false,
        }
    }

    /// Also pass guest stdout through.
    pub fn with_stdout(mut self) -> Self {
        self.stdout = true;
        self
    }
}

/// How solver modules are compiled and how far each instance may reach.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WasmConfig {
    /// Output streams open to the guest
    pub capabilities: WasiCapabilities,

    /// Cap on linear memory per instance, in bytes. Growth past it makes the
    /// guest's `alloc` return null.
    pub max_memory: usize,

    /// Fuel for each call into the module; `None` runs unmetered
    pub fuel_limit: Option<u64>,

    /// Cranelift optimization level (0-2)
    pub optimization_level: u8,

    /// Accept modules built with `simd128`
    pub enable_simd: bool,
}

impl Default for WasmConfig {
    fn default() -> Self {
        Self {
            capabilities: WasiCapabilities::diagnostics(),
            max_memory: 256 * 1024 * 1024,
            fuel_limit: None,
            optimization_level: 2,
            enable_simd: true,
        }
    }
}

impl WasmConfig {
    /// Tight limits for untrusted solver builds: no output, 64 MiB of
    /// memory and a bounded amount of work per call.
    pub fn strict() -> Self {
        Self {
            capabilities: WasiCapabilities::none(),
            max_memory: 64 * 1024 * 1024,
            fuel_limit: Some(1_000_000_000),
            ..Default::default()
        }
    }

    /// Quick compiles and full guest output, for working on a solver build.
    pub fn debug() -> Self {
        Self {
            capabilities: WasiCapabilities::diagnostics().with_stdout(),
            optimization_level: 0,
            ..Default::default()
        }
    }

    /// Builder: set output capabilities
    pub fn capabilities(mut self, caps: WasiCapabilities) -> Self {
        self.capabilities = caps;
        self
    }

    /// Builder: cap linear memory
    pub fn max_memory(mut self, bytes: usize) -> Self {
        self.max_memory = bytes;
        self
    }

    /// Builder: meter every call with this much fuel
    pub fn fuel_limit(mut self, fuel: u64) -> Self {
        self.fuel_limit = Some(fuel);
        self
    }

    /// Builder: toggle SIMD
    pub fn simd(mut self, enable: bool) -> Self {
        self.enable_simd = enable;
        self
    }

    /// Builder: optimization level, clamped to 2
    pub fn optimize(mut self, level: u8) -> Self {
        self.optimization_level = level.min(2);
        self
    }
}

/// Where the worker finds its module, and how it runs it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Directory the module file is resolved against
    pub origin: PathBuf,

    /// Module file name under `origin`
    pub module_file: String,

    /// Queue and validation settings
    pub worker: WorkerOptions,

    /// Runtime settings
    pub runtime: WasmConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            origin: PathBuf::from("."),
            module_file: DEFAULT_MODULE_FILE.to_string(),
            worker: WorkerOptions::default(),
            runtime: WasmConfig::default(),
        }
    }
}

impl WorkerConfig {
    /// Load a JSON config file. Missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| InteropError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Resolve the module location against the origin.
    pub fn module_path(&self) -> PathBuf {
        self.origin.join(&self.module_file)
    }

    /// Module name used in logs: the file stem.
    pub fn module_name(&self) -> String {
        Path::new(&self.module_file)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string()
    }

    /// Builder: set origin
    pub fn origin(mut self, origin: impl Into<PathBuf>) -> Self {
        self.origin = origin.into();
        self
    }

    /// Builder: point at a specific module file, splitting it into origin
    /// and file name
    pub fn module(mut self, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if let Some(file) = path.file_name().and_then(|f| f.to_str()) {
            self.module_file = file.to_string();
        }
        self.origin = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        self
    }

    /// Builder: set runtime config
    pub fn runtime(mut self, runtime: WasmConfig) -> Self {
        self.runtime = runtime;
        self
    }
}
