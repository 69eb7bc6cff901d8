//! Umbra full node binary.
//!
//! Starts a full node: opens RocksDB chain storage (connecting genesis if
//! empty), indexes the configured plot directories into the farming
//! index, and spins up the consensus dispatcher and miner loop as
//! background tasks. The HTTP/RPC and P2P surfaces are out of scope for
//! the core; this binary only drives [`Node`]'s own command methods and
//! logs the chain tip on startup and on shutdown.

use std::path::PathBuf;
use std::process;

use clap::Parser;
use tracing::{error, info};
use umbra_node_lib::{Node, NodeConfig};

/// Umbra full node.
#[derive(Parser, Debug)]
#[command(name = "umbra-node", version, about = "Umbra full node: plot-backed proof-of-storage consensus")]
struct Args {
    /// Data directory for chain storage, farming index, and identity key.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Directories scanned for plot files (may be repeated).
    #[arg(long = "plot-dir")]
    plot_dirs: Vec<PathBuf>,

    /// Minimum transaction fee accepted by the mempool, in satoshi.
    #[arg(long)]
    min_fee_satoshi: Option<u64>,

    /// Target seconds between blocks.
    #[arg(long)]
    block_target_seconds: Option<u64>,

    /// Blocks between difficulty retargets.
    #[arg(long)]
    retarget_interval: Option<u64>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log output format ("pretty" or "json").
    #[arg(long, default_value = "pretty")]
    log_format: String,
}

impl Args {
    /// Layer CLI flags on top of `NodeConfig::load()`'s defaults/
    /// config-file/environment precedence (§6).
    fn apply(self, mut config: NodeConfig) -> NodeConfig {
        if let Some(data_dir) = self.data_dir {
            config.data_dir = data_dir;
        }
        if !self.plot_dirs.is_empty() {
            config.plot_dirs = self.plot_dirs;
        }
        if let Some(v) = self.min_fee_satoshi {
            config.min_fee_satoshi = v;
        }
        if let Some(v) = self.block_target_seconds {
            config.block_target_seconds = v;
        }
        if let Some(v) = self.retarget_interval {
            config.retarget_interval = v;
        }
        config.log_level = self.log_level;
        config.log_format = self.log_format;
        config
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match NodeConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load node configuration: {e}");
            process::exit(1);
        }
    };
    let config = args.apply(config);

    init_logging(&config.log_level, &config.log_format);

    info!("Umbra full node v{}", env!("CARGO_PKG_VERSION"));
    info!(data_dir = %config.data_dir.display(), "data directory");
    info!(plot_dirs = ?config.plot_dirs, "plot directories");
    info!(
        block_target_seconds = config.block_target_seconds,
        retarget_interval = config.retarget_interval,
        min_fee_satoshi = config.min_fee_satoshi,
        "consensus parameters"
    );

    let node = match Node::new(config) {
        Ok(node) => node,
        Err(e) => {
            error!("failed to initialize node: {e}");
            process::exit(1);
        }
    };

    if let Ok((height, hash)) = node.get_tip() {
        info!(height, hash = %hex::encode(hash.as_bytes()), "chain tip");
    }
    info!(plots = node.loaded_plot_count(), "plots loaded");

    if let Err(e) = node.node_start() {
        error!("failed to start node: {e}");
        process::exit(1);
    }
    info!("node running (Ctrl+C to stop)");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to install Ctrl+C handler: {e}");
    }
    info!("received Ctrl+C, shutting down");

    if let Err(e) = node.node_stop().await {
        error!("error stopping node: {e}");
    }
    info!("node shutdown complete");
}

/// Initialize the tracing subscriber. `format = "json"` emits structured
/// JSON suitable for log aggregation; anything else is human-readable text.
fn init_logging(level_str: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_str));

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
