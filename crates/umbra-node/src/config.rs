//! Node configuration (§6).
//!
//! [`NodeConfig`] loads in precedence order: compiled defaults →
//! `config.toml` in `DATA_DIR` → the environment variables named in §6
//! (`DATA_DIR`, `PLOT_DIRS`, `MIN_FEE_SATOSHI`, `BLOCK_TARGET_SECONDS`,
//! `RETARGET_INTERVAL`) → CLI flags parsed by the binary crate.

use std::path::PathBuf;

use config::{Config, File};
use serde::{Deserialize, Serialize};

use umbra_core::constants::{
    DEFAULT_BLOCK_TARGET_SECONDS, DEFAULT_MIN_FEE_SATOSHI, DEFAULT_RETARGET_INTERVAL,
};
use umbra_core::error::ConfigError;

/// Configuration for a full node instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Root directory for all persistent data (chain state, config file).
    pub data_dir: PathBuf,
    /// Directories scanned for plot files (`PLOT_DIRS`, colon-separated).
    pub plot_dirs: Vec<PathBuf>,
    /// Minimum transaction fee accepted by the mempool, in satoshi.
    pub min_fee_satoshi: u64,
    /// Target seconds between blocks.
    pub block_target_seconds: u64,
    /// Blocks between difficulty retargets.
    pub retarget_interval: u64,
    /// Log level filter string (e.g. "info", "debug", "umbra_node=trace").
    pub log_level: String,
    /// Log output format: "pretty" or "json".
    pub log_format: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("umbra");

        Self {
            data_dir,
            plot_dirs: Vec::new(),
            min_fee_satoshi: DEFAULT_MIN_FEE_SATOSHI,
            block_target_seconds: DEFAULT_BLOCK_TARGET_SECONDS,
            retarget_interval: DEFAULT_RETARGET_INTERVAL,
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

impl NodeConfig {
    /// Path to the RocksDB chain data directory.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("chaindata")
    }

    /// Path to the optional `config.toml` inside `data_dir`.
    pub fn config_file_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }

    /// Path to the farming index's own RocksDB directory (plot metadata
    /// cache), kept separate from `db_path()`'s chain state.
    pub fn farming_index_path(&self) -> PathBuf {
        self.data_dir.join("farming_index")
    }

    /// Path to this node's persisted farmer identity secret key.
    pub fn identity_key_path(&self) -> PathBuf {
        self.data_dir.join("identity.key")
    }

    /// Path to this node's persisted farmer identity public key. ML-DSA
    /// secret keys don't embed the public key, so it's kept alongside as
    /// its own file rather than re-derived on load.
    pub fn identity_pubkey_path(&self) -> PathBuf {
        self.data_dir.join("identity.pub")
    }

    /// Load configuration: compiled defaults, then `config.toml` in the
    /// default data directory if present, then the §6 environment
    /// variables. CLI flags (parsed by the binary crate) are applied on
    /// top of the returned value by the caller.
    pub fn load() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config_path = defaults.config_file_path();

        let mut builder = Config::builder().add_source(Config::try_from(&defaults).map_err(|e| {
            ConfigError::Invalid { key: "<defaults>".into(), reason: e.to_string() }
        })?);

        if config_path.is_file() {
            builder = builder.add_source(File::from(config_path));
        }

        let built = builder.build().map_err(|e| ConfigError::Io(e.to_string()))?;
        let mut cfg: NodeConfig = built
            .try_deserialize()
            .map_err(|e| ConfigError::Invalid { key: "<root>".into(), reason: e.to_string() })?;

        // §6 environment variables take precedence over config.toml.
        if let Ok(v) = std::env::var("DATA_DIR") {
            cfg.data_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("PLOT_DIRS") {
            cfg.plot_dirs = v.split(':').filter(|s| !s.is_empty()).map(PathBuf::from).collect();
        }
        if let Ok(v) = std::env::var("MIN_FEE_SATOSHI") {
            cfg.min_fee_satoshi = v
                .parse()
                .map_err(|_| ConfigError::Invalid { key: "MIN_FEE_SATOSHI".into(), reason: "not a u64".into() })?;
        }
        if let Ok(v) = std::env::var("BLOCK_TARGET_SECONDS") {
            cfg.block_target_seconds = v.parse().map_err(|_| ConfigError::Invalid {
                key: "BLOCK_TARGET_SECONDS".into(),
                reason: "not a u64".into(),
            })?;
        }
        if let Ok(v) = std::env::var("RETARGET_INTERVAL") {
            cfg.retarget_interval = v.parse().map_err(|_| ConfigError::Invalid {
                key: "RETARGET_INTERVAL".into(),
                reason: "not a u64".into(),
            })?;
        }

        Ok(cfg)
    }
}
