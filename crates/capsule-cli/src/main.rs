//! Capsule unified CLI tool
//!
//! Single command-line interface for all Capsule operations: running scripts,
//! compiling source-stripped blobs, bundling self-contained executables, and
//! inspecting the artifacts.
//!
//! Startup is two-mode. Before argument parsing, the binary reads its own
//! image trailer: a trailer means this is a shipped bundled executable, and
//! control goes to the relay and bootstrap loader instead of the developer
//! CLI. Without a trailer (or when the trailer carries no prelude) the normal
//! subcommand surface applies.

mod commands;
mod output;

use anyhow::Context;
use capsule_boot::{
    determine_invocation_kind, install_introspection_shims, relay_args, run_bootstrap,
    BootstrapOutcome, BootstrapState, ImageTrailer,
};
use capsule_engine::{ScriptHost, Value};
use clap::{Parser, Subcommand};
use output::{resolve_color_choice, StyledOutput};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "capsule")]
#[command(about = "Capsule sourceless scripting toolchain", long_about = None)]
#[command(version)]
struct Cli {
    /// Color output: auto, always, never
    #[arg(long, global = true)]
    color: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a script file or a compiled .capc blob
    Run {
        /// Input file
        file: String,
        /// Arguments to pass to the program
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,
        /// Compiled blob to consume alongside the source
        #[arg(long)]
        cached_data: Option<String>,
        /// Compile all function bodies up front
        #[arg(long)]
        eager: bool,
    },

    /// Compile a script to a source-stripped .capc blob
    Build {
        /// Input file
        file: String,
        /// Output file path (defaults to the input with a .capc extension)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Create a standalone executable with an embedded prelude and payload
    Bundle {
        /// Prelude script embedded into the executable
        prelude: String,
        /// Output file path
        #[arg(short, long)]
        output: String,
        /// Payload archive appended after the prelude
        #[arg(long)]
        payload: Option<String>,
        /// Engine binary to bundle (defaults to the running executable)
        #[arg(long)]
        engine: Option<String>,
    },

    /// Inspect a bundled image or compiled blob
    Info {
        /// File to inspect
        file: String,
    },
}

fn main() -> anyhow::Result<()> {
    let exe = std::env::current_exe().context("Cannot locate the running executable")?;
    let argv: Vec<String> = std::env::args().collect();

    // Bundled mode is decided by the image itself, before any argument
    // parsing: a shipped executable must never expose the developer CLI.
    if let Some(trailer) = capsule_boot::read_trailer(&exe)? {
        return bundled_main(exe, trailer, argv);
    }

    dispatch(Cli::parse())
}

/// Startup path for a bundled executable: relay, shim, bootstrap.
fn bundled_main(exe: PathBuf, trailer: ImageTrailer, argv: Vec<String>) -> anyhow::Result<()> {
    let kind = determine_invocation_kind();
    capsule_boot::mark_relayed(&exe.to_string_lossy());
    let relayed = relay_args(kind, &argv).to_args();

    let total_len = std::fs::metadata(&exe)?.len();
    let mut host = ScriptHost::new();
    install_introspection_shims(&mut host.natives, exe.clone(), trailer.engine_len(total_len));

    let mut state = BootstrapState::default();
    let mut stdout = std::io::stdout();
    match run_bootstrap(&mut host, &mut state, &exe, &relayed, &mut stdout)? {
        BootstrapOutcome::PreludeRan { result } => {
            // The prelude's top-level return value is the exit status.
            if let Value::Int(code) = result {
                std::process::exit(code as i32);
            }
            Ok(())
        }
        // No embedded prelude: the image behaves as a plain engine binary
        // with its natural argument list.
        BootstrapOutcome::NoPrelude { args } => dispatch(Cli::parse_from(args)),
        BootstrapOutcome::AlreadyStarted => Ok(()),
    }
}

fn dispatch(cli: Cli) -> anyhow::Result<()> {
    let mut out = StyledOutput::new(resolve_color_choice(cli.color.as_deref()));

    match cli.command {
        Commands::Run {
            file,
            args,
            cached_data,
            eager,
        } => commands::run::execute(commands::run::RunArgs {
            file,
            args,
            cached_data,
            eager,
        }),

        Commands::Build { file, output } => {
            commands::build::execute(commands::build::BuildArgs { file, output }, &mut out)
        }

        Commands::Bundle {
            prelude,
            output,
            payload,
            engine,
        } => commands::bundle::execute(
            commands::bundle::BundleArgs {
                prelude,
                output,
                payload,
                engine,
            },
            &mut out,
        ),

        Commands::Info { file } => commands::info::execute(&file, &mut out),
    }
}
