//! newsfeed binary

use clap::{Parser, Subcommand};
use newsfeed::common::Config;
use newsfeed::ops::{reindex, verify};
use newsfeed::store::{MemorySearchIndex, RocksPrimaryStore};
use newsfeed::NewsServer;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "newsfeed")]
#[command(about = "News service with asynchronous ingestion and cache-aside reads")]
#[command(version)]
struct Cli {
    /// Config file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory (overrides the config file)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Bind address for HTTP (overrides the config file)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Compare the saved index snapshot with the primary store
    Verify,

    /// Rebuild the index snapshot from the primary store
    Reindex,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(dir) = cli.data_dir {
        config.storage.data_dir = dir;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind_addr = bind.parse()?;
            }
            NewsServer::new(config).serve().await?;
        }
        Commands::Verify => {
            let primary = RocksPrimaryStore::open(config.storage.primary_path(), false)?;
            let snapshot = config.storage.index_snapshot_path();
            let index = if snapshot.exists() {
                MemorySearchIndex::load_snapshot(&snapshot)?
            } else {
                println!("No index snapshot at {}", snapshot.display());
                MemorySearchIndex::new()
            };

            let report = verify(&primary, &index).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.is_consistent() {
                std::process::exit(1);
            }
        }
        Commands::Reindex => {
            let primary = RocksPrimaryStore::open(config.storage.primary_path(), false)?;
            let index = MemorySearchIndex::new();
            let report = reindex(&primary, &index).await?;

            let snapshot = config.storage.index_snapshot_path();
            index.save_snapshot(&snapshot).await?;
            println!(
                "✓ Indexed {} records in {} ms → {}",
                report.records,
                report.elapsed_ms,
                snapshot.display()
            );
        }
    }

    Ok(())
}
