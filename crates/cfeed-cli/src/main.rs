use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "cfeed-cli")]
#[command(about = "Poll a comment feed and upsert each comment into a key-value table")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Acquire a token once, then ingest on a fixed interval until Ctrl-C
    Run(StoreArgs),
    /// Run a single ingest cycle and print its summary
    Once(StoreArgs),
    /// Create the default `reddit_comments` table (a custom CFEED_TABLE must be created by hand)
    Migrate,
}

#[derive(Debug, Args, Default)]
struct StoreArgs {
    /// Write into an in-process map instead of Postgres (dry run)
    #[arg(long)]
    memory_store: bool,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "cannot listen for ctrl-c; running until killed");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv::dotenv();
    init_tracing();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run(StoreArgs::default())) {
        Commands::Run(args) => {
            let cycles =
                cfeed_sync::run_scheduled_from_env(args.memory_store, shutdown_signal()).await?;
            info!(cycles, "ingest stopped");
        }
        Commands::Once(args) => {
            let summary = cfeed_sync::run_once_from_env(args.memory_store).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&summary).context("serializing cycle summary")?
            );
        }
        Commands::Migrate => {
            cfeed_sync::migrate_from_env().await?;
            println!("migrations applied");
        }
    }

    Ok(())
}
