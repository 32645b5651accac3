//! `docsorter` -- watches a scan inbox and files documents by category.
//!
//! Subcommands:
//!
//! - `docsorter run` -- process the backlog, then watch until interrupted.
//! - `docsorter scan` -- process whatever is in the inbox once and exit.
//! - `docsorter check` -- verify configuration, directories and the analysis service.

mod commands;
mod logging;
mod settings;

use clap::{Parser, Subcommand};

use settings::Overrides;

#[derive(Parser)]
#[command(name = "docsorter", about = "Inbox document sorter", version)]
struct Cli {
    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process the backlog, then watch the inbox until Ctrl-C.
    Run,

    /// Process the current inbox contents once and exit.
    Scan {
        /// Print the run summary as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Verify prerequisites without processing anything.
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = settings::resolve(&cli.overrides)?;
    logging::init(&config.logging)?;

    match cli.command {
        Commands::Run => commands::run(config).await,
        Commands::Scan { json } => commands::scan(config, json).await,
        Commands::Check => commands::check(config).await,
    }
}
