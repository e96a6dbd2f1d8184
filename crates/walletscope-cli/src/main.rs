//! `walletscope` — batch driver for the identity-resolution graph.
//!
//! # Usage
//!
//! ```
//! walletscope --store graph.db init --seeds seeds.json
//! walletscope --store graph.db cluster --observations transfers.json
//! walletscope --store graph.db propagate
//! walletscope --store graph.db cleanup
//! walletscope --store graph.db query --identity binance
//! walletscope --store graph.db export --output graph.json
//! ```

mod commands;

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use walletscope_engine::params::EngineParams;
use walletscope_store_sqlite::SqliteStore;

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "walletscope", about = "Wallet identity-resolution graph")]
struct Cli {
  /// Path to the SQLite store (created on first use). Defaults to
  /// `walletscope.db` unless the config file names one.
  #[arg(long, value_name = "FILE")]
  store: Option<PathBuf>,

  /// Path to a TOML config file overriding engine thresholds.
  #[arg(short, long, value_name = "FILE")]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Create the store and optionally load seed labels.
  Init {
    /// JSON file of seed labels: [{address, identity, confidence, ...}].
    #[arg(long, value_name = "FILE")]
    seeds: Option<PathBuf>,
  },
  /// Run the common-ownership clustering pass.
  Cluster {
    /// JSON file of transfer observations: [{from, to, observed_at}].
    #[arg(long, value_name = "FILE")]
    observations: Option<PathBuf>,
  },
  /// Run the confidence-decay label propagation pass.
  Propagate,
  /// Run the conflict resolver over propagated labels and clusters.
  Cleanup,
  /// Query entities by identity, type, cluster, or confidence.
  Query(commands::QueryArgs),
  /// Dump entities, relationships, and clusters as JSON.
  Export {
    /// Write to this file instead of stdout.
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,
  },
}

// ─── Config file ──────────────────────────────────────────────────────────────

/// Shape of the optional TOML config file. Engine thresholds nest under
/// `[params]`; anything omitted keeps its default.
#[derive(Deserialize, Default)]
struct ConfigFile {
  store_path: Option<PathBuf>,
  #[serde(default)]
  params:     EngineParams,
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let file_cfg: ConfigFile = if let Some(path) = &cli.config {
    let raw = std::fs::read_to_string(path)
      .with_context(|| format!("reading config file {}", path.display()))?;
    toml::from_str(&raw).context("parsing config file")?
  } else {
    ConfigFile::default()
  };

  // CLI flag overrides config file, which overrides the default.
  let store_path = cli
    .store
    .or(file_cfg.store_path)
    .unwrap_or_else(|| PathBuf::from("walletscope.db"));
  let params = file_cfg.params;
  params
    .validate()
    .context("invalid engine parameters in config")?;

  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("opening store at {}", store_path.display()))?;

  match cli.command {
    Command::Init { seeds } => commands::init(&store, seeds.as_deref()).await,
    Command::Cluster { observations } => {
      commands::cluster(&store, &params, observations.as_deref()).await
    }
    Command::Propagate => commands::propagate(&store, &params).await,
    Command::Cleanup => commands::cleanup(&store, &params).await,
    Command::Query(args) => commands::query(&store, &args).await,
    Command::Export { output } => {
      commands::export(&store, output.as_deref()).await
    }
  }
}
