// ABOUTME: CLI entry point for partition-sync
// ABOUTME: Parses commands, sets up logging and Ctrl-C cancellation, routes to handlers

use clap::{Parser, Subcommand};
use partition_sync::commands;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "partition-sync")]
#[command(
    about = "Hash-compare a partition of rows between two SQL Server databases and reconcile the destination",
    long_about = None
)]
#[command(version)]
struct Cli {
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring the destination partition in line with the source
    Sync {
        #[command(flatten)]
        args: commands::sync::SyncArgs,
    },
    /// Re-enable constraints left disabled by an interrupted sync
    RestoreConstraints {
        #[command(flatten)]
        args: commands::restore::RestoreArgs,
    },
    /// List the tables a sync would cover
    Inspect {
        #[command(flatten)]
        args: commands::inspect::InspectArgs,
    },
}

/// Cancel the token on Ctrl-C. The synchronizer stops before the next
/// table and still re-enables constraints.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Stopping after the current table...");
            child.cancel();
        }
    });
    token
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --log
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log.clone()));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match cli.command {
        Commands::Sync { args } => commands::sync(args, cancel_on_ctrl_c()).await,
        Commands::RestoreConstraints { args } => commands::restore(args).await,
        Commands::Inspect { args } => commands::inspect(args).await,
    }
}
