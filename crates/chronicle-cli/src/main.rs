#![forbid(unsafe_code)]

mod cmd;
mod output;

use clap::{Parser, Subcommand};
use output::{CliError, OutputMode, render_error, resolve_output_mode};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "chronicle: an append-only journal with encrypted sync",
    long_about = None
)]
struct Cli {
    /// Journal directory (default: $CHRONICLE_DIR or ~/.chronicle).
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Output format.
    #[arg(long, value_enum, global = true)]
    format: Option<OutputMode>,

    /// Shorthand for `--format json`.
    #[arg(long, global = true)]
    json: bool,

    /// Enable debug logging when CHRONICLE_LOG is unset.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Create the journal directory and log",
        after_help = "EXAMPLES:\n    chronicle init\n    chronicle --dir ~/notes/journal init"
    )]
    Init,

    #[command(
        about = "Append an entry",
        after_help = "EXAMPLES:\n    chronicle add Shipped the importer\n    chronicle add -t decision --tag work --review 2026-12-01 Chose plan B\n    echo \"long text\" | chronicle add --person Alice"
    )]
    Add(cmd::add::AddArgs),

    #[command(about = "Show recent entries")]
    List(cmd::list::ListArgs),

    #[command(about = "Check the log and report every problem")]
    Validate,

    #[command(about = "Move torn records into <log>.corrupt")]
    Repair,

    #[command(
        about = "Upload the whole log as the encrypted remote snapshot",
        long_about = "Encrypt the whole local log and replace the remote snapshot with it.\n\
                      Run `chronicle pull` first so entries from other devices are kept."
    )]
    Push,

    #[command(about = "Append remote entries missing from the local log")]
    Pull,

    #[command(about = "Sync configuration and status")]
    Sync {
        #[command(subcommand)]
        command: cmd::sync::SyncCommand,
    },
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("CHRONICLE_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if verbose || env::var("DEBUG").is_ok() {
            "chronicle=debug,chronicle_core=debug,info"
        } else {
            "chronicle=info,chronicle_core=info,warn"
        })
    });

    let format = env::var("CHRONICLE_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn run(cli: &Cli, output: OutputMode) -> anyhow::Result<()> {
    let dir = chronicle_core::config::resolve_dir(cli.dir.as_deref())?;
    debug!(dir = %dir.display(), "resolved journal directory");

    match &cli.command {
        Commands::Init => cmd::init::run_init(&dir, output),
        Commands::Add(args) => cmd::add::run_add(args, &dir, output),
        Commands::List(args) => cmd::list::run_list(args, &dir, output),
        Commands::Validate => cmd::validate::run_validate(&dir, output),
        Commands::Repair => cmd::repair::run_repair(&dir, output),
        Commands::Push => cmd::sync::run_push(&dir, output),
        Commands::Pull => cmd::sync::run_pull(&dir, output),
        Commands::Sync { command } => cmd::sync::run_sync(command, &dir, output),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let output = resolve_output_mode(cli.format, cli.json);

    match run(&cli, output) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = cmd::error_code(&err);
            debug!(code = code.code(), error = ?err, "command failed");
            let cli_error = CliError::new(code, format!("{err:#}"));
            if render_error(output, &cli_error).is_err() {
                eprintln!("{}: {err:#}", code.code());
            }
            ExitCode::FAILURE
        }
    }
}
