use anyhow::{Context, Result};
use chorus_infrastructure::ChorusPaths;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::process::ExitCode;

mod commands;
mod logging;
mod render;

use commands::CliContext;

#[derive(Parser)]
#[command(name = "chorus")]
#[command(about = "CHORUS - send one prompt to several models and follow them live", long_about = None)]
struct Cli {
    /// Mirror logs to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Base directory for config, sessions and logs (defaults to the platform config dir)
    #[arg(long, global = true, value_name = "DIR")]
    home: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a prompt and stream every model's progress
    Run(RunArgs),
    /// Continue a stored session by polling its unfinished models
    Resume {
        session_id: String,
        #[command(flatten)]
        dispatch: DispatchArgs,
    },
    /// Print a stored session as JSON
    Show { session_id: String },
    /// List stored sessions, newest first
    List,
}

#[derive(Args)]
pub(crate) struct RunArgs {
    /// Model key to run (repeatable; defaults to `default_models` from config)
    #[arg(short, long = "model", value_name = "KEY")]
    pub models: Vec<String>,

    /// Prompt text
    #[arg(short, long)]
    pub prompt: String,

    /// Image to attach (repeatable)
    #[arg(long = "image", value_name = "PATH")]
    pub images: Vec<PathBuf>,

    #[command(flatten)]
    pub dispatch: DispatchArgs,
}

/// Per-invocation overrides of the dispatcher settings.
#[derive(Args, Default)]
pub(crate) struct DispatchArgs {
    /// Dispatcher endpoint URL
    #[arg(long, value_name = "URL")]
    pub endpoint: Option<String>,

    /// Seconds between polls for unfinished models
    #[arg(long, value_name = "SECS")]
    pub poll_interval: Option<u64>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{} {:#}", "error:".red().bold(), err);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let paths = match cli.home {
        Some(home) => ChorusPaths::with_base(home),
        None => ChorusPaths::platform_default()?,
    };
    paths
        .ensure_dirs()
        .with_context(|| format!("Failed to create {}", paths.base_dir().display()))?;
    let _log_guard = logging::init(&paths.logs_dir(), cli.verbose)?;

    let context = CliContext::new(paths);
    match cli.command {
        Commands::Run(args) => commands::run::execute(&context, args).await,
        Commands::Resume {
            session_id,
            dispatch,
        } => commands::resume::execute(&context, &session_id, &dispatch).await,
        Commands::Show { session_id } => commands::show::execute(&context, &session_id).await,
        Commands::List => commands::list::execute(&context).await,
    }
}
