//! hodl - consensus-checked EVM history ingestion
//!
//! `identify` records the transaction hashes of every configured address,
//! `fetch` caches the transaction, receipt, block and internal transfers of
//! each identified hash, and `sync` runs both in turn.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use hodl_evm::hodl_store::FileDb;
use hodl_evm::{
    connect_all, fetch_all, hashes_to_fetch, identify_all, Config, EvmClient, TokenMetadataCache,
};

#[derive(Parser)]
#[command(author, version, about = "Auditable EVM history cache for owned addresses")]
struct Cli {
    /// Run configuration
    #[arg(short, long, global = true, default_value = "hodl.json", env = "HODL_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enumerate transaction hashes for every configured address
    Identify,
    /// Fetch and cache every identified transaction
    Fetch,
    /// Identify, then fetch
    Sync {
        /// Reuse the hashes identified by an earlier run
        #[arg(long, env = "SKIP_IDENTIFY", default_value_t = false)]
        skip_identify: bool,
        /// Stop after identification
        #[arg(long, env = "SKIP_FETCH", default_value_t = false)]
        skip_fetch: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    let (identify, fetch) = match cli.command {
        Commands::Identify => (true, false),
        Commands::Fetch => (false, true),
        Commands::Sync {
            skip_identify,
            skip_fetch,
        } => (!skip_identify, !skip_fetch),
    };
    run(&cli.config, identify, fetch).await
}

async fn run(config_path: &Path, identify: bool, fetch: bool) -> Result<()> {
    let config = Config::load(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let db = FileDb::open(&config.data_dir)
        .with_context(|| format!("opening {}", config.data_dir.display()))?;
    let tokens = Arc::new(TokenMetadataCache::open(&db)?);

    // Deprecated networks stay in so both stages can report them as skipped
    let mut clients = Vec::new();
    for network in &config.networks {
        match EvmClient::http(network.clone(), tokens.clone()) {
            Ok(client) => clients.push(client),
            Err(e) => eprintln!("Leaving out {}: {e}", network.name),
        }
    }
    let clients = connect_all(clients).await;
    info!(networks = clients.len(), active = config.active_networks().count(), "Networks ready");

    if identify {
        let report = identify_all(&db, &clients, &config.addresses).await;
        print!("{report}");
    }

    if fetch {
        let hashes = hashes_to_fetch(&db)?;
        let total: usize = hashes.values().map(|h| h.len()).sum();
        info!(networks = hashes.len(), hashes = total, "Fetching identified transactions");
        for report in fetch_all(&db, &clients, hashes, config.fetch).await {
            println!("{report}");
            for hash in &report.unresolved {
                println!("  unresolved {hash}");
            }
        }
    }

    Ok(())
}
