//! sp500 — S&P 500 listing sync service and tooling.
//!
//! # Usage
//!
//! ```text
//! sp500 serve [--sync-on-start]
//! sp500 sync [--deadline-secs N]
//! sp500 show [--json]
//! sp500 subscribe <email>
//! sp500 subscribers [--json]
//! ```
//!
//! Every command reads its configuration from the environment
//! (`OPENAI_API_KEY`, `STORE_BACKEND`, `DATA_DIR`, `AWS_S3_BUCKET`, ...).

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    serve::ServeArgs, show::ShowArgs, subscribe::SubscribeArgs, subscribe::SubscribersArgs,
    sync::SyncArgs,
};

#[derive(Parser, Debug)]
#[command(
    name = "sp500",
    version,
    about = "Keep a daily S&P 500 constituent snapshot and notify subscribers of changes",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the daily scheduler and HTTP API in the foreground.
    Serve(ServeArgs),

    /// Run one fetch, compare, persist, notify cycle now.
    Sync(SyncArgs),

    /// Print the stored snapshot.
    Show(ShowArgs),

    /// Register an email address for change notifications.
    Subscribe(SubscribeArgs),

    /// List registered subscribers.
    Subscribers(SubscribersArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve(args) => args.run(),
        Commands::Sync(args) => args.run(),
        Commands::Show(args) => args.run(),
        Commands::Subscribe(args) => args.run(),
        Commands::Subscribers(args) => args.run(),
    }
}
