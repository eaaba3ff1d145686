#![forbid(unsafe_code)]

use clap::{Parser, Subcommand};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use shepherd_core::error::ErrorCode;

mod clients;
mod cmd;
mod http;

use cmd::GlobalArgs;

#[derive(Parser, Debug)]
#[command(
    name = "shepherd",
    author,
    version,
    about = "shepherd: release-lifecycle supervisor for issues and advisories",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log intended mutations instead of performing them.
    #[arg(long, global = true)]
    dry_run: bool,

    /// Process items even when they carry the needs-attention marker.
    #[arg(long, global = true)]
    ignore_needs_attention: bool,

    /// Configuration file (default: ./shepherd.toml, then the user config dir).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn global(&self) -> GlobalArgs {
        GlobalArgs {
            dry_run: self.dry_run,
            ignore_needs_attention: self.ignore_needs_attention,
            config: self.config.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        next_help_heading = "Supervise",
        about = "Queue issues and advisories in flight",
        long_about = "Find issues and advisories that need supervision and queue the ones not yet queued.",
        after_help = "EXAMPLES:\n    # Collect every 20 minutes (default)\n    shepherd collect\n\n    # Collect once and exit\n    shepherd collect --once"
    )]
    Collect(cmd::collect::CollectArgs),

    #[command(
        next_help_heading = "Supervise",
        about = "Process ready work items",
        long_about = "Pop ready work items, run one handler step for each, and reschedule or drop them.",
        after_help = "EXAMPLES:\n    # Process forever\n    shepherd process\n\n    # Process one item and exit\n    shepherd process --once\n\n    # Log actions without performing them\n    shepherd --dry-run process --once"
    )]
    Process(cmd::process::ProcessArgs),

    #[command(
        next_help_heading = "Force",
        about = "Run one issue step outside the queue",
        after_help = "EXAMPLES:\n    shepherd process-issue RHEL-12345\n    shepherd process-issue https://issues.example.com/browse/RHEL-12345"
    )]
    ProcessIssue(cmd::process_issue::ProcessIssueArgs),

    #[command(
        next_help_heading = "Force",
        about = "Run one advisory step outside the queue",
        after_help = "EXAMPLES:\n    shepherd process-erratum 151838\n    shepherd process-erratum https://advisories.example.com/advisory/151838"
    )]
    ProcessErratum(cmd::process_erratum::ProcessErratumArgs),

    #[command(
        next_help_heading = "Queue",
        about = "Remove every queued work item"
    )]
    ClearQueue,

    #[command(
        next_help_heading = "Queue",
        about = "Show queued work items",
        after_help = "EXAMPLES:\n    # Table, earliest first\n    shepherd list-queue\n\n    # Emit machine-readable output\n    shepherd list-queue --json"
    )]
    ListQueue(cmd::list_queue::ListQueueArgs),
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("SHEPHERD_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if verbose || env::var("DEBUG").is_ok() {
            "shepherd=debug,info"
        } else {
            "shepherd=info,warn"
        })
    });

    let format = env::var("SHEPHERD_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

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

fn run(cli: Cli) -> anyhow::Result<()> {
    let global = cli.global();
    debug!(command = ?cli.command, dry_run = global.dry_run, "starting");

    match cli.command {
        Commands::Collect(args) => cmd::collect::run_collect(&args, &global),
        Commands::Process(args) => cmd::process::run_process(&args, &global),
        Commands::ProcessIssue(args) => cmd::process_issue::run_process_issue(&args, &global),
        Commands::ProcessErratum(args) => {
            cmd::process_erratum::run_process_erratum(&args, &global)
        }
        Commands::ClearQueue => cmd::clear_queue::run_clear_queue(&global),
        Commands::ListQueue(args) => cmd::list_queue::run_list_queue(&args, &global),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = ErrorCode::classify(&err);
            eprintln!("error[{}]: {}: {err:#}", code.code(), code.message());
            if let Some(hint) = code.hint() {
                eprintln!("hint: {hint}");
            }
            ExitCode::FAILURE
        }
    }
}
