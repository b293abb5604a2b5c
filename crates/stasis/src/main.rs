use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use stasis_core::codec;
use stasis_core::error::StasisResult;
use stasis_core::types::Snapshot;
use stasis_utils::{init_logging, LogConfig, LogFormat, LogLevel};
use tracing::{error, info};

/// Debugger-driven checkpoint and restore for repeatable program runs.
#[derive(Parser, Debug)]
#[command(name = "stasis")]
#[command(version)]
#[command(about = "Capture a running program's state at a checkpoint and restore it into a fresh run", long_about = None)]
struct Cli
{
    #[command(subcommand)]
    command: Commands,

    /// Log level filter (overrides RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    /// Log output format: pretty or json (overrides STASIS_LOG_FORMAT)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    /// Also write logs to a dated file in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands
{
    /// Run a program to its checkpoint function and save its state
    Capture
    {
        /// Snapshot file to write (replaced if it exists)
        #[arg(short, long, default_value = "checkpoint.bin")]
        snapshot: PathBuf,
        /// Function to stop in
        #[arg(long, default_value = "checkpoint")]
        at: String,
        /// Path to the executable to launch
        program: PathBuf,
        /// Arguments to pass to the program
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Start a program, inject a saved snapshot, and let it continue
    Restore
    {
        /// Snapshot file to restore
        #[arg(short, long, default_value = "checkpoint.bin")]
        snapshot: PathBuf,
        /// Function to stop in before restoring
        #[arg(long, default_value = "main")]
        at: String,
        /// Path to the executable to launch
        program: PathBuf,
        /// Arguments to pass to the program
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Print the contents of a snapshot file
    Inspect
    {
        /// Snapshot file to read
        snapshot: PathBuf,
        /// List every register, region and labeled value
        #[arg(short, long, default_value_t = false)]
        verbose: bool,
    },
    /// List the writable memory regions of a running process
    Regions
    {
        /// Process ID (PID) to inspect
        pid: u32,
    },
}

fn main()
{
    let cli = Cli::parse();

    let config = LogConfig::from_env().with_level(cli.log_level).with_format(cli.log_format);
    let config = match &cli.log_dir {
        Some(dir) => config.with_log_dir(dir),
        None => Ok(config),
    };
    let guard = match config.and_then(|config| init_logging(&config)) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            process::exit(1);
        }
    };

    let code = match run_command(cli.command) {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "command failed");
            eprintln!("Error: {e}");
            1
        }
    };
    // process::exit skips destructors; flush the log file first
    drop(guard);
    process::exit(code);
}

/// Run one subcommand, returning the process exit code
fn run_command(command: Commands) -> StasisResult<i32>
{
    match command {
        Commands::Capture {
            snapshot,
            at,
            program,
            args,
        } => capture(&snapshot, &at, &program, &args),
        Commands::Restore {
            snapshot,
            at,
            program,
            args,
        } => restore(&snapshot, &at, &program, &args),
        Commands::Inspect { snapshot, verbose } => {
            let decoded = codec::read_snapshot(&snapshot)?;
            print_snapshot(&snapshot, &decoded, verbose);
            Ok(0)
        }
        Commands::Regions { pid } => regions(pid),
    }
}

fn print_snapshot(path: &Path, snapshot: &Snapshot, verbose: bool)
{
    println!("{}: {}", path.display(), snapshot.summary());
    if !verbose {
        return;
    }

    println!("\nRegisters:");
    for (name, value) in snapshot.registers.iter() {
        println!("  {name:<8} 0x{value:016x}");
    }
    println!("\nRegions:");
    for key in snapshot.regions.keys() {
        println!("  {key}");
    }
    println!("\nLabeled values:");
    for (key, bytes) in &snapshot.values {
        let preview: String = bytes.iter().take(16).map(|b| format!("{b:02x}")).collect();
        println!("  {key}  {preview}");
    }
}

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
fn capture(snapshot: &Path, at: &str, program: &Path, args: &[String]) -> StasisResult<i32>
{
    use stasis_core::{Capturer, PtraceInferior};
    use tracing::warn;

    let mut inferior = PtraceInferior::launch(program, args)?;
    let address = inferior.run_to_symbol(at)?;
    info!(symbol = at, address = %address, "reached checkpoint");
    if !inferior.has_debug_info() {
        warn!(program = %program.display(), "target has no debug info; labeled values are not captured");
    }

    let captured = Capturer::new(&mut inferior).capture_to(snapshot)?;
    println!("{}: {}", snapshot.display(), captured.summary());
    inferior.wait_for_exit()
}

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
fn restore(snapshot: &Path, at: &str, program: &Path, args: &[String]) -> StasisResult<i32>
{
    use stasis_core::{PtraceInferior, Restorer};

    // Decode first: a corrupt file never reaches the target
    let decoded = codec::read_snapshot(snapshot)?;
    info!(summary = %decoded.summary(), "snapshot loaded");

    let mut inferior = PtraceInferior::launch(program, args)?;
    inferior.run_to_symbol(at)?;
    let report = Restorer::new(&mut inferior).restore(&decoded)?;
    println!(
        "restored {} registers, {} regions, {} labeled values ({} new mappings)",
        report.registers, report.regions, report.values, report.mappings_established
    );
    inferior.wait_for_exit()
}

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
fn regions(pid: u32) -> StasisResult<i32>
{
    use stasis_core::regions::writable_regions;
    use stasis_core::PtraceInferior;

    let inferior = PtraceInferior::attach(pid)?;
    for region in writable_regions(&inferior)? {
        println!(
            "{}-{} {} {:>10}  {}",
            region.start,
            region.end(),
            region.permissions,
            region.length,
            region.path.as_deref().unwrap_or("")
        );
    }
    inferior.detach()?;
    Ok(0)
}

#[cfg(not(all(target_os = "linux", target_arch = "x86_64")))]
fn unsupported() -> stasis_core::error::StasisError
{
    stasis_core::error::StasisError::InvalidArgument("process control is only available on Linux x86-64".to_string())
}

#[cfg(not(all(target_os = "linux", target_arch = "x86_64")))]
fn capture(_snapshot: &Path, _at: &str, _program: &Path, _args: &[String]) -> StasisResult<i32>
{
    Err(unsupported())
}

#[cfg(not(all(target_os = "linux", target_arch = "x86_64")))]
fn restore(_snapshot: &Path, _at: &str, _program: &Path, _args: &[String]) -> StasisResult<i32>
{
    Err(unsupported())
}

#[cfg(not(all(target_os = "linux", target_arch = "x86_64")))]
fn regions(_pid: u32) -> StasisResult<i32>
{
    Err(unsupported())
}
