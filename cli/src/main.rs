//! chaincrawl CLI: run the per-network crawlers.
//!
//! Usage:
//! ```bash
//! chaincrawl run --config crawler.json --interval-ms 10000 --json-logs
//! RPCS='{"137": {...}}' chaincrawl run
//! chaincrawl networks --config crawler.json
//! ```

mod logging;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use chaincrawl_core::{CheckpointStore, CrawlerConfig, EventHandler, HandlerRegistry};
use chaincrawl_evm::Supervisor;
use chaincrawl_storage::InMemoryStorage;

#[derive(Parser)]
#[command(name = "chaincrawl", version, about = "Multi-network blockchain event crawler")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Crawl every configured network and print forwarded events as JSON lines.
    Run(RunArgs),
    /// Validate the configuration and list networks with their endpoint order.
    Networks(ConfigArgs),
}

#[derive(Args)]
struct ConfigArgs {
    /// JSON config file. `RPCS` and `INDEXER_INTERVAL` override its values.
    #[arg(long, env = "CHAINCRAWL_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    config: ConfigArgs,

    /// Pause between crawl cycles, in milliseconds.
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Global log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON structured logs.
    #[arg(long)]
    json_logs: bool,

    /// Persist checkpoints and events to this SQLite file.
    #[cfg(feature = "sqlite")]
    #[arg(long)]
    db: Option<String>,
}

fn load_config(args: &ConfigArgs) -> Result<CrawlerConfig> {
    let mut config = match &args.config {
        Some(path) => CrawlerConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => CrawlerConfig::default(),
    };
    config.apply_env().context("applying environment overrides")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run(args).await,
        Command::Networks(args) => networks(&args),
    }
}

fn networks(args: &ConfigArgs) -> Result<()> {
    let config = load_config(args)?;
    config.validate()?;
    for net in config.descriptors() {
        println!("{} ({}) chunkSize={}", net.chain_id, net.network, net.chunk_size);
        for (i, endpoint) in net.endpoints().iter().enumerate() {
            let role = if i == 0 { "primary" } else { "fallback" };
            println!("  {role:<8} {endpoint}");
        }
    }
    Ok(())
}

type Storage = (Arc<dyn CheckpointStore>, Arc<dyn EventHandler>);

fn memory_storage() -> Storage {
    let store = Arc::new(InMemoryStorage::new());
    (store.clone() as Arc<dyn CheckpointStore>, store as Arc<dyn EventHandler>)
}

#[cfg(feature = "sqlite")]
async fn open_storage(args: &RunArgs) -> Result<Storage> {
    let Some(path) = &args.db else {
        return Ok(memory_storage());
    };
    let store = Arc::new(
        chaincrawl_storage::SqliteStorage::open(path)
            .await
            .with_context(|| format!("opening {path}"))?,
    );
    Ok((store.clone() as Arc<dyn CheckpointStore>, store as Arc<dyn EventHandler>))
}

#[cfg(not(feature = "sqlite"))]
async fn open_storage(_args: &RunArgs) -> Result<Storage> {
    Ok(memory_storage())
}

async fn run(args: RunArgs) -> Result<()> {
    let mut config = load_config(&args.config)?;
    if let Some(ms) = args.interval_ms {
        config.crawl_interval_ms = ms;
    }
    if let Some(level) = &args.log_level {
        config.log.level = level.clone();
    }
    if args.json_logs {
        config.log.json = true;
    }
    config.validate()?;
    logging::init_tracing(&config.log);

    let (store, handler) = open_storage(&args).await?;
    let mut handlers = HandlerRegistry::new();
    handlers.on_event(handler);

    let mut supervisor = Supervisor::new(config, store, handlers);
    supervisor.spawn_all()?;
    let mut events = supervisor
        .events()
        .context("event channel already taken")?;
    supervisor.start_all();
    tracing::info!(networks = ?supervisor.chain_ids(), "crawling started");

    loop {
        tokio::select! {
            Some(event) = events.recv() => {
                println!("{}", serde_json::to_string(&event)?);
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("ctrl-c received, shutting down");
                break;
            }
        }
    }

    for (chain_id, exit) in supervisor.shutdown().await {
        if let Err(e) = exit {
            tracing::warn!(chain_id, error = %e, "crawler ended with error");
        }
    }
    Ok(())
}
