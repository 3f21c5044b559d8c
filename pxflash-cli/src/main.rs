//! pxflash CLI - Command-line tool for PX4 autopilot firmware.
//!
//! ## Features
//!
//! - Upload firmware to a board in its bootloader
//! - Build JSON firmware descriptors from a raw image
//! - Inspect descriptor and legacy firmware files
//! - List serial ports with device classification
//! - Shell completion generation
//! - Environment variable and config file support

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;
mod config;

use commands::mkfw::MkfwArgs;
use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if emoji/animations should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether Ctrl-C was pressed.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// Errors that map to dedicated exit codes.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Invalid invocation (exit code 2).
    #[error("{0}")]
    Usage(String),
    /// Cancelled by the user (exit code 130).
    #[error("{0}")]
    Cancelled(String),
}

/// pxflash - Upload and package firmware for PX4 autopilots.
///
/// Environment variables:
///   PXFLASH_PORT   - Candidate serial ports, comma-separated
///   PXFLASH_BAUD   - Baud rate (default: 115200)
#[derive(Parser)]
#[command(name = "pxflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = "Examples:
  pxflash upload build/px4fmu-v2_default.px4
  pxflash -p /dev/ttyACM0,/dev/ttyUSB0 upload fw.px4 --wait 30
  pxflash mkfw --prototype px4fmu-v2.prototype --image fw.bin --output fw.px4")]
pub(crate) struct Cli {
    /// Candidate serial ports, comma-separated (auto-detected if not specified).
    #[arg(
        short,
        long,
        global = true,
        env = "PXFLASH_PORT",
        value_delimiter = ','
    )]
    port: Vec<String>,

    /// Baud rate [default: 115200].
    #[arg(short, long, global = true, env = "PXFLASH_BAUD")]
    baud: Option<u32>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Upload firmware to a board waiting in its bootloader.
    Upload {
        /// Firmware file (JSON descriptor or legacy binary).
        firmware: PathBuf,

        /// Seconds to wait for the bootloader to appear [default: 12].
        #[arg(long, value_name = "SECS")]
        wait: Option<f64>,
    },

    /// Build a JSON firmware descriptor.
    #[command(disable_version_flag = true)]
    Mkfw(MkfwArgs),

    /// Show information about a firmware file.
    Info {
        /// Firmware file (JSON descriptor or legacy binary).
        firmware: PathBuf,

        /// Output information as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Map an error to the process exit code.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return match cli_err {
            CliError::Usage(_) => 2,
            CliError::Cancelled(_) => 130,
        };
    }
    if let Some(pxflash::Error::Interrupted) = err.downcast_ref::<pxflash::Error>() {
        return 130;
    }
    1
}

fn init_logging(cli: &Cli) {
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();
}

fn install_interrupt_handler() {
    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::Relaxed)) {
        debug!("Could not install Ctrl-C handler: {e}");
    }
    pxflash::set_interrupt_checker(was_interrupted);
}

fn run(cli: &Cli) -> Result<()> {
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Upload { firmware, wait } => {
            commands::upload::cmd_upload(cli, &config, firmware, *wait)
        },
        Commands::Mkfw(args) => commands::mkfw::cmd_mkfw(cli, args),
        Commands::Info { firmware, json } => commands::info::cmd_info(firmware, *json),
        Commands::ListPorts { json } => commands::info::cmd_list_ports(*json),
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(())
        },
    }
}

fn main() -> ExitCode {
    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();
    init_logging(&cli);
    install_interrupt_handler();

    debug!(
        "pxflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!(
                "{} {err:#}",
                style("Error:")
                    .red()
                    .bold()
            );
            ExitCode::from(exit_code_for(&err))
        },
    }
}
