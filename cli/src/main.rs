//! danmu CLI.
//!
//! # Commands
//! ```text
//! danmu run      --config <danmu.yaml>
//! danmu check    --url <live url> [--config <danmu.yaml>]
//! danmu validate --config <danmu.yaml>
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use danmu_core::adapter::{Adapter, AdapterRouter};
use danmu_core::store::FileConfigStore;
use danmu_douyin::DouyinAdapterFactory;
use danmu_registry::{DefaultSessionFactory, TaskRegistry};

mod config;
mod console;
mod logging;

use config::AppConfig;
use console::ConsoleHandlers;

#[derive(Parser)]
#[command(
    name = "danmu",
    about = "Live-room comment ingestion",
    long_about = "
danmu: watches live rooms, connects while they are on air and prints chat,
gift, like, member and follow events.

ENVIRONMENT VARIABLES:
  RUST_LOG    tracing filter, overrides the config's log section
",
    version
)]
struct Cli {
    /// Log at debug level regardless of the config
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest every stream in the config until interrupted
    Run {
        #[arg(short, long, default_value = "danmu.yaml")]
        config: PathBuf,
    },

    /// Probe one live room and report whether it is on air
    Check {
        /// Live room URL, e.g. https://live.douyin.com/123456
        #[arg(long)]
        url: String,
        /// Config supplying adapter and signer settings
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Validate a config file without connecting
    Validate {
        #[arg(short, long, default_value = "danmu.yaml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => cmd_run(&config, cli.verbose).await,
        Commands::Check { url, config } => cmd_check(&url, config.as_deref(), cli.verbose).await,
        Commands::Validate { config } => cmd_validate(&config).await,
    }
}

fn init_logging(config: &AppConfig, verbose: bool) {
    let mut log = config.log.clone();
    if verbose {
        log.level = "debug".into();
    }
    logging::init_tracing(&log);
}

fn douyin_factory(config: &AppConfig) -> Result<DouyinAdapterFactory> {
    if config.signer.is_unset() {
        tracing::warn!("no signer configured; push connections will fail to sign");
    }
    DouyinAdapterFactory::new(config.signer.build(), config.douyin.adapter_config())
        .context("cannot build HTTP client")
}

// ─── Command implementations ─────────────────────────────────────────────────

async fn cmd_run(path: &Path, verbose: bool) -> Result<()> {
    let config = AppConfig::load(path).await?;
    init_logging(&config, verbose);

    let adapters = AdapterRouter::new().with(Arc::new(douyin_factory(&config)?));
    let factory = DefaultSessionFactory::new(
        Arc::new(adapters),
        Arc::new(config.session.connector()),
        config.session.options(),
    )
    .with_handlers(Arc::new(ConsoleHandlers::new(config.dedup_capacity)));
    let registry = Arc::new(TaskRegistry::new(Arc::new(factory)));

    let added = registry
        .init_from(&FileConfigStore::new(path))
        .await
        .context("cannot load streams")?;
    tracing::info!(added, config = %path.display(), "danmu running, ctrl-c to stop");

    tokio::signal::ctrl_c()
        .await
        .context("cannot listen for ctrl-c")?;
    tracing::info!("shutting down");
    registry.shutdown().await;
    Ok(())
}

async fn cmd_check(url: &str, path: Option<&Path>, verbose: bool) -> Result<()> {
    let config = match path {
        Some(path) => AppConfig::load(path).await?,
        None => AppConfig::default(),
    };
    init_logging(&config, verbose);

    let adapter = douyin_factory(&config)?.adapter(url)?;
    let live = adapter.check_liveness().await?;

    println!("Platform:  {}", adapter.platform());
    println!("Web room:  {}", adapter.web_rid());
    if let Some(room) = adapter.room() {
        println!("Room id:   {}", if room.room_id.is_empty() { "-" } else { room.room_id.as_str() });
        println!("Sec uid:   {}", room.sec_uid);
        println!("Status:    {}", room.status);
    }
    println!("Live:      {}", if live { "yes" } else { "no" });
    Ok(())
}

async fn cmd_validate(path: &Path) -> Result<()> {
    let config = AppConfig::load(path).await?;
    let mut failures = 0;

    for stream in &config.streams {
        let verdict = stream.validate().map_err(anyhow::Error::from).and_then(|_| {
            if DouyinAdapterFactory::accepts(&stream.url) {
                Ok(())
            } else {
                bail!("no adapter for this url")
            }
        });
        match verdict {
            Ok(()) => println!("  ok    [{}] {}", stream.id, stream.url),
            Err(e) => {
                failures += 1;
                println!("  FAIL  [{}] {}: {e}", stream.id, stream.url);
            }
        }
    }

    let mut ids: Vec<_> = config.streams.iter().map(|s| s.id).collect();
    ids.sort_unstable();
    ids.dedup();
    if ids.len() != config.streams.len() {
        failures += 1;
        println!("  FAIL  duplicate stream ids");
    }
    if config.signer.is_unset() {
        println!("  warn  no signer configured");
    }

    println!("{} streams, {failures} problems", config.streams.len());
    if failures > 0 {
        bail!("{} is not valid", path.display());
    }
    Ok(())
}
