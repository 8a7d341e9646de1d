//! First-block solver worker command-line interface
//!
//! This CLI provides tools for:
//! - Solving a single scramble against a sandboxed solver module
//! - Serving JSON-lines requests from stdin
//! - Benchmarking the interop round trip

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fb_interop::{worker, Dispatcher, InteropError, Request, WasmSandbox, WorkerConfig};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "fb-worker")]
#[command(author, version, about = "First-block solver worker", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Worker configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Solver module to load, overriding the configured origin
    #[arg(short, long, global = true)]
    module: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Solve one scramble and print the result
    Solve {
        /// Scramble in standard notation
        #[arg(short, long)]
        scramble: String,

        /// Orientation indices (0-23), comma separated; empty means all
        #[arg(short, long, value_delimiter = ',')]
        orientations: Vec<u8>,

        /// Pretty-print the result
        #[arg(long)]
        pretty: bool,
    },

    /// Read one request per stdin line, write one response per stdout line
    Serve,

    /// Time repeated solves of the same scramble
    Bench {
        /// Scramble in standard notation
        #[arg(short, long, default_value = "R U R' U' F2 D L2 B'")]
        scramble: String,

        /// Orientation indices (0-23), comma separated; empty means all
        #[arg(short, long, value_delimiter = ',')]
        orientations: Vec<u8>,

        /// Number of timed requests
        #[arg(short = 'n', long, default_value_t = 1000)]
        iterations: usize,
    },
}

/// One line of `serve` output.
#[derive(Serialize)]
#[serde(rename_all = "lowercase")]
enum Reply {
    Ok(serde_json::Value),
    Error(String),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(cli.config.as_deref(), cli.module.as_deref())?;

    match cli.command {
        Commands::Solve {
            scramble,
            orientations,
            pretty,
        } => cmd_solve(config, scramble, orientations, pretty),

        Commands::Serve => cmd_serve(config),

        Commands::Bench {
            scramble,
            orientations,
            iterations,
        } => cmd_bench(config, scramble, orientations, iterations),
    }
}

fn load_config(path: Option<&Path>, module: Option<&Path>) -> Result<WorkerConfig> {
    let mut config = match path {
        Some(path) => WorkerConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => WorkerConfig::default(),
    };
    if let Some(module) = module {
        config = config.module(module);
    }
    Ok(config)
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().context("Failed to start async runtime")
}

fn cmd_solve(
    config: WorkerConfig,
    scramble: String,
    orientations: Vec<u8>,
    pretty: bool,
) -> Result<()> {
    let request = Request::new(scramble, orientations);

    let response = runtime()?.block_on(async move {
        let worker = worker::spawn_wasm(config);
        worker.solve(request).await
    });

    let response = match response {
        Ok(response) => response,
        Err(InteropError::InvalidScramble(e)) => {
            eprintln!("{}", e.caret());
            anyhow::bail!("Invalid scramble");
        }
        Err(e) => return Err(e).context("Solve failed"),
    };

    let text = if pretty {
        serde_json::to_string_pretty(response.as_value())?
    } else {
        serde_json::to_string(response.as_value())?
    };
    println!("{}", text);
    Ok(())
}

fn cmd_serve(config: WorkerConfig) -> Result<()> {
    runtime()?.block_on(async move {
        let worker = worker::spawn_wasm(config);
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut served = 0usize;

        while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let reply = match serde_json::from_str::<Request>(line) {
                Ok(request) => match worker.solve(request).await {
                    Ok(response) => Reply::Ok(response.into_value()),
                    Err(InteropError::WorkerClosed) => {
                        anyhow::bail!("Worker stopped after {} requests", served)
                    }
                    Err(e) => Reply::Error(e.to_string()),
                },
                Err(e) => Reply::Error(format!("invalid request: {}", e)),
            };

            let mut stdout = std::io::stdout().lock();
            serde_json::to_writer(&mut stdout, &reply)?;
            writeln!(stdout)?;
            stdout.flush()?;
            served += 1;
        }

        info!("stdin closed after {} requests", served);
        Ok::<_, anyhow::Error>(())
    })
}

fn cmd_bench(
    config: WorkerConfig,
    scramble: String,
    orientations: Vec<u8>,
    iterations: usize,
) -> Result<()> {
    let path = config.module_path();

    let start = Instant::now();
    let sandbox = WasmSandbox::new(config.runtime.clone()).context("Failed to create sandbox")?;
    let module = sandbox
        .load_module(&path)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    let instance = sandbox
        .instantiate(&module)
        .context("Failed to instantiate module")?;
    let load_time = start.elapsed();

    let mut dispatcher =
        Dispatcher::new(instance).with_scramble_validation(config.worker.validate_scramble);
    let request = Request::new(scramble, orientations);

    // Setup Ctrl+C handler
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    // Warm up, and fail early on a bad request
    let response = dispatcher
        .dispatch(&request)
        .context("Warm-up request failed")?;

    let mut completed = 0usize;
    let mut failures = 0usize;
    let wall = Instant::now();
    while completed < iterations && running.load(Ordering::SeqCst) {
        if let Err(e) = dispatcher.dispatch(&request) {
            warn!("request {} failed: {}", completed, e);
            failures += 1;
        }
        completed += 1;
    }
    let elapsed = wall.elapsed();

    let stats = dispatcher.stats();
    println!("=== Solve Benchmark ===");
    println!();
    println!("  Module:            {}", path.display());
    println!("  Load time:         {:.2} ms", load_time.as_secs_f64() * 1000.0);
    println!("  Scramble:          {}", request.scramble);
    println!("  Result:            {}", response.as_value());
    println!();
    println!("  Requests:          {} ({} failed)", completed, failures);
    println!(
        "  Throughput:        {:.0} req/s",
        completed as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
    );
    println!("  Solve min:         {} us", stats.min_us());
    println!("  Solve mean:        {:.1} us", stats.mean_us());
    println!("  Solve p50:         {} us", stats.p50_us());
    println!("  Solve p99:         {} us", stats.p99_us());
    println!("  Solve max:         {} us", stats.max_us());
    if stats.fuel_consumed() > 0 {
        println!("  Fuel consumed:     {}", stats.fuel_consumed());
    }
    println!(
        "  Outstanding:       {} bytes in {} buffers",
        dispatcher.allocator().outstanding_bytes(),
        dispatcher.allocator().outstanding_count()
    );

    info!("{}", stats.summary());
    Ok(())
}
