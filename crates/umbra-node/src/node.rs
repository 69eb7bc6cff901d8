//! Full node composition (§5, §6).
//!
//! [`Node`] wires RocksDB storage, the mempool, the consensus dispatcher,
//! and the farming/mining loop into the six callables that make up the
//! core's entire external surface: `node_start`, `node_stop`,
//! `submit_tx`, `submit_block`, `get_tip`, `get_utxo`, `force_mine`.
//! HTTP/RPC and P2P transports are out of scope; a caller embeds `Node`
//! directly or drives it from the `umbra-node` binary's CLI.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;

use umbra_consensus::dispatch::{ChainParams, ConsensusEvent, ConsensusLoop, DispatchError};
use umbra_consensus::miner::{Miner, MinerConfig};
use umbra_core::address::Address;
use umbra_core::chain_state::{ChainStore, MemoryChainStore};
use umbra_core::crypto::{CryptoError, KeyPair};
use umbra_core::error::{FarmingError, MempoolError, UmbraError};
use umbra_core::genesis;
use umbra_core::mempool::Mempool;
use umbra_core::traits::{Clock, NullPeerIngress, SystemClock};
use umbra_core::types::{Block, Hash256, OutPoint, TxEnvelope, UtxoEntry};
use umbra_farm::FarmingIndex;

use crate::config::NodeConfig;
use crate::storage::RocksStore;

/// Errors surfaced by [`Node`]'s command methods.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error(transparent)]
    Chain(#[from] UmbraError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Farming(#[from] FarmingError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Mempool(#[from] MempoolError),
    #[error("io error: {0}")]
    Io(String),
    #[error("node already running")]
    AlreadyRunning,
    #[error("node not running")]
    NotRunning,
    #[error("miner error: {0}")]
    Miner(String),
}

/// Join handles for the background tasks started by [`Node::node_start`].
struct RunningTasks {
    shutdown: watch::Sender<bool>,
    consensus: JoinHandle<()>,
    miner: JoinHandle<()>,
}

/// The full node: storage, mempool, consensus dispatcher, and farming
/// loop, composed behind the capability-object seams declared in
/// `umbra-core::traits`.
pub struct Node {
    chain: Arc<RwLock<Box<dyn ChainStore>>>,
    mempool: Arc<Mutex<Mempool>>,
    farming_index: Arc<FarmingIndex>,
    consensus: Arc<ConsensusLoop>,
    events_tx: mpsc::Sender<ConsensusEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<ConsensusEvent>>>,
    miner: Arc<Miner>,
    chain_params: ChainParams,
    config: NodeConfig,
    running: Mutex<Option<RunningTasks>>,
}

/// Size of the consensus event channel between `submit_block`/the miner
/// loop and the serial [`ConsensusLoop`].
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Bytes/transaction-count budget handed to [`MinerConfig`]; conservative
/// relative to [`umbra_core::constants::MAX_BLOCK_SIZE`] to leave headroom
/// for the coinbase and header overhead.
const MINER_MAX_BLOCK_TXS: usize = 4_000;

impl Node {
    /// Open (or create) a node at `config.data_dir`.
    ///
    /// Opens RocksDB storage (auto-connecting genesis if empty), opens the
    /// farming index and indexes `config.plot_dirs`, and loads or generates
    /// this node's own farmer identity (the address the coinbase pays when
    /// this node's plots answer a challenge).
    pub fn new(config: NodeConfig) -> Result<Arc<Self>, NodeError> {
        std::fs::create_dir_all(&config.data_dir).map_err(|e| NodeError::Io(e.to_string()))?;

        let store = RocksStore::open(config.db_path()).map_err(NodeError::Chain)?;
        let chain: Arc<RwLock<Box<dyn ChainStore>>> = Arc::new(RwLock::new(Box::new(store)));
        Self::build(config, chain)
    }

    /// A node backed by [`MemoryChainStore`] instead of RocksDB, for tests
    /// that don't want to exercise the on-disk storage path.
    #[cfg(any(test, feature = "testing"))]
    pub fn in_memory(config: NodeConfig) -> Result<Arc<Self>, NodeError> {
        std::fs::create_dir_all(&config.data_dir).map_err(|e| NodeError::Io(e.to_string()))?;
        let chain: Arc<RwLock<Box<dyn ChainStore>>> =
            Arc::new(RwLock::new(Box::new(MemoryChainStore::new())));
        Self::build(config, chain)
    }

    fn build(config: NodeConfig, chain: Arc<RwLock<Box<dyn ChainStore>>>) -> Result<Arc<Self>, NodeError> {
        let mempool = Arc::new(Mutex::new(Mempool::default()));

        let farming_index = Arc::new(FarmingIndex::open(config.farming_index_path())?);
        let indexed = farming_index.index(&config.plot_dirs)?;
        info!(plots = indexed, dirs = config.plot_dirs.len(), "indexed plot directories");

        let identity = Self::load_or_create_identity(
            &config.identity_key_path(),
            &config.identity_pubkey_path(),
        )?;

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let chain_params = ChainParams {
            retarget_interval: config.retarget_interval,
            target_interval_seconds: config.block_target_seconds,
        };

        let consensus = Arc::new(ConsensusLoop::new(
            Arc::clone(&chain),
            Arc::clone(&mempool),
            Arc::new(NullPeerIngress::new()),
            Arc::new(SystemClock),
            chain_params,
        ));

        let miner_config = MinerConfig {
            block_target_seconds: config.block_target_seconds,
            retarget_interval: config.retarget_interval,
            max_block_bytes: umbra_core::constants::MAX_BLOCK_SIZE,
            max_block_txs: MINER_MAX_BLOCK_TXS,
        };
        let miner = Arc::new(Miner::new(
            farming_index.clone() as Arc<dyn umbra_core::traits::FarmingIndex>,
            Arc::new(SystemClock),
            identity,
            miner_config,
        ));

        Ok(Arc::new(Self {
            chain,
            mempool,
            farming_index,
            consensus,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            miner,
            chain_params,
            config,
            running: Mutex::new(None),
        }))
    }

    /// Load this node's persisted farmer identity, or generate and persist
    /// a new one. ML-DSA secret keys don't embed the public key, so the
    /// public key is kept alongside in a sibling file (`pubkey_path`)
    /// rather than re-derived from `secret_path` on load.
    fn load_or_create_identity(secret_path: &PathBuf, pubkey_path: &PathBuf) -> Result<KeyPair, NodeError> {
        if let (Ok(secret_bytes), Ok(public_bytes)) =
            (std::fs::read(secret_path), std::fs::read(pubkey_path))
        {
            return Ok(KeyPair::from_parts(&secret_bytes, &public_bytes)?);
        }
        let identity = KeyPair::generate();
        if let Some(parent) = secret_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| NodeError::Io(e.to_string()))?;
        }
        std::fs::write(secret_path, identity.secret_bytes()).map_err(|e| NodeError::Io(e.to_string()))?;
        std::fs::write(pubkey_path, identity.public_key().to_bytes())
            .map_err(|e| NodeError::Io(e.to_string()))?;
        Ok(identity)
    }

    /// `node_start` (§6): spin up the consensus dispatcher and farming loop
    /// as background tasks. Returns [`NodeError::AlreadyRunning`] if
    /// already started.
    pub fn node_start(self: &Arc<Self>) -> Result<(), NodeError> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Err(NodeError::AlreadyRunning);
        }

        let events_rx = self
            .events_rx
            .lock()
            .take()
            .ok_or(NodeError::AlreadyRunning)?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let consensus = Arc::clone(&self.consensus);
        let consensus_shutdown = shutdown_rx.clone();
        let consensus_handle = tokio::spawn(async move {
            consensus.run(events_rx, consensus_shutdown).await;
        });

        let miner = Arc::clone(&self.miner);
        let chain = Arc::clone(&self.chain);
        let mempool = Arc::clone(&self.mempool);
        let events_tx = self.events_tx.clone();
        let miner_shutdown = shutdown_rx.clone();
        let retarget_interval = self.chain_params.retarget_interval;
        let block_target_seconds = self.chain_params.target_interval_seconds;
        let miner_handle = tokio::spawn(async move {
            miner
                .run_loop(
                    chain,
                    mempool,
                    events_tx,
                    miner_shutdown,
                    retarget_interval,
                    block_target_seconds,
                )
                .await;
        });

        *running = Some(RunningTasks {
            shutdown: shutdown_tx,
            consensus: consensus_handle,
            miner: miner_handle,
        });

        info!(data_dir = %self.config.data_dir.display(), "node started");
        Ok(())
    }

    /// `node_stop` (§6): signal the background tasks to shut down and wait
    /// for them to exit. Returns [`NodeError::NotRunning`] if not started.
    pub async fn node_stop(&self) -> Result<(), NodeError> {
        let tasks = self.running.lock().take().ok_or(NodeError::NotRunning)?;
        let _ = tasks.shutdown.send(true);
        let _ = tasks.consensus.await;
        let _ = tasks.miner.await;
        info!("node stopped");
        Ok(())
    }

    /// `submit_tx(envelope)` (§6): admit a transaction envelope into the
    /// mempool against the current chain tip's UTXO view.
    pub fn submit_tx(&self, envelope: TxEnvelope) -> Result<Hash256, NodeError> {
        let chain = self.chain.read();
        let (height, _) = chain.chain_tip()?;
        let now = SystemClock.now();
        let tx_hash = self.mempool.lock().admit(
            envelope,
            |op: &OutPoint| chain.get_utxo(op).ok().flatten(),
            height,
            now,
        )?;
        Ok(tx_hash)
    }

    /// `submit_block(block)` (§6): validate and connect an externally
    /// produced block, exactly as a locally mined one would be, then
    /// reconcile the mempool. Runs synchronously — `ConsensusLoop::dispatch`
    /// doesn't require the async event-channel loop.
    pub fn submit_block(&self, block: Block) -> Result<(), NodeError> {
        self.consensus
            .dispatch(ConsensusEvent::PeerBlock { block, peer_id: "submit_block".to_string() })?;
        Ok(())
    }

    /// `get_tip()` (§6): current chain tip as `(height, block_hash)`.
    pub fn get_tip(&self) -> Result<(u64, Hash256), NodeError> {
        Ok(self.chain.read().chain_tip()?)
    }

    /// `get_utxo(address)` (§6): UTXOs currently paying `address`.
    pub fn get_utxo(&self, address: &Address) -> Result<Vec<(OutPoint, UtxoEntry)>, NodeError> {
        Ok(self.chain.read().get_utxos_by_address(address)?)
    }

    /// `force_mine()` (§6): attempt a single mining pass against the
    /// current tip outside the background loop's cadence, for tests and
    /// manual operation. Returns `Ok(None)` if no loaded plot currently
    /// answers the challenge.
    pub fn force_mine(&self) -> Result<Option<Block>, NodeError> {
        let ctx = {
            let chain = self.chain.read();
            umbra_consensus::miner::build_mining_context(
                chain.as_ref(),
                &umbra_core::reward::RewardSchedule::default(),
                self.chain_params.retarget_interval,
                self.chain_params.target_interval_seconds,
            )
            .map_err(|e| NodeError::Miner(e.to_string()))?
        };

        let attempt = {
            let pool = self.mempool.lock();
            self.miner
                .try_mine(&ctx, &pool, 0)
                .map_err(|e| NodeError::Miner(e.to_string()))?
        };

        if let Some(block) = attempt.clone() {
            self.submit_block(block)?;
        }
        Ok(attempt)
    }

    /// Number of plots currently loaded by the farming index.
    pub fn loaded_plot_count(&self) -> usize {
        self.farming_index.loaded_plot_count()
    }

    /// Current mempool size, in transactions.
    pub fn mempool_len(&self) -> usize {
        self.mempool.lock().len()
    }

    /// Node configuration reference.
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Whether the stored chain's block 0 matches the compiled genesis.
    pub fn has_genesis(&self) -> bool {
        self.chain
            .read()
            .get_block_hash(0)
            .ok()
            .flatten()
            .map(|h| h == genesis::genesis_hash())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use umbra_core::crypto::KeyPair as TestKeyPair;
    use umbra_core::types::{Transaction, TxInput, TxOutput};

    fn test_config() -> (NodeConfig, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = NodeConfig { data_dir: dir.path().to_path_buf(), ..NodeConfig::default() };
        (config, dir)
    }

    #[test]
    fn new_node_starts_at_genesis() {
        let (config, _dir) = test_config();
        let node = Node::in_memory(config).unwrap();
        let (height, hash) = node.get_tip().unwrap();
        assert_eq!(height, 0);
        assert_eq!(hash, genesis::genesis_hash());
        assert!(node.has_genesis());
    }

    #[test]
    fn identity_key_persists_across_reopen() {
        let (config, _dir) = test_config();
        let node1 = Node::in_memory(config.clone()).unwrap();
        drop(node1);
        let bytes_before = std::fs::read(config.identity_key_path()).unwrap();

        let node2 = Node::in_memory(config.clone()).unwrap();
        drop(node2);
        let bytes_after = std::fs::read(config.identity_key_path()).unwrap();
        assert_eq!(bytes_before, bytes_after);

        // The reloaded keypair must derive the same public key/address as
        // the one generated on first run, not just carry identical raw
        // secret-key bytes (ML-DSA secret keys don't embed the public key).
        let public_bytes = std::fs::read(config.identity_pubkey_path()).unwrap();
        let reloaded = Node::load_or_create_identity(
            &config.identity_key_path(),
            &config.identity_pubkey_path(),
        )
        .unwrap();
        assert_eq!(reloaded.public_key().to_bytes(), public_bytes);
    }

    #[test]
    fn get_utxo_returns_genesis_allocation() {
        let (config, _dir) = test_config();
        let node = Node::in_memory(config).unwrap();
        let addr = genesis::genesis_allocation_address();
        let utxos = node.get_utxo(&addr).unwrap();
        assert_eq!(utxos.len(), 1);
    }

    #[test]
    fn submit_tx_rejects_unknown_input() {
        let (config, _dir) = test_config();
        let node = Node::in_memory(config).unwrap();
        let kp = TestKeyPair::generate();
        let raw_tx = Transaction {
            version: 1,
            inputs: vec![TxInput::spending(OutPoint { tx_hash: Hash256([0x77; 32]), index: 0 })],
            outputs: vec![TxOutput {
                value: 1,
                address: Address::from_public_key(&kp.public_key()),
                script_pubkey: vec![],
            }],
            token_ops: vec![],
            not_until: 0,
            timestamp: 0,
            nonce: 0,
        };
        let tx_hash = raw_tx.hash().unwrap();
        let sig = kp.sign(tx_hash.as_ref());
        let envelope = TxEnvelope::new(raw_tx, sig, kp.public_key().to_bytes()).unwrap();

        assert!(node.submit_tx(envelope).is_err());
    }

    #[test]
    fn submit_block_rejects_structurally_invalid_block() {
        let (config, _dir) = test_config();
        let node = Node::in_memory(config).unwrap();
        let mut block = genesis::genesis_block().clone();
        block.header.height = 1;
        block.header.prev_hash = genesis::genesis_hash();
        assert!(node.submit_block(block).is_err());
        assert_eq!(node.get_tip().unwrap().0, 0);
    }

    #[test]
    fn node_start_twice_errors() {
        let (config, _dir) = test_config();
        let node = Node::in_memory(config).unwrap();
        node.node_start().unwrap();
        assert!(matches!(node.node_start(), Err(NodeError::AlreadyRunning)));
    }

    #[test]
    fn mempool_len_starts_zero() {
        let (config, _dir) = test_config();
        let node = Node::in_memory(config).unwrap();
        assert_eq!(node.mempool_len(), 0);
    }

    #[test]
    fn loaded_plot_count_zero_with_no_plot_dirs() {
        let (config, _dir) = test_config();
        let node = Node::in_memory(config).unwrap();
        assert_eq!(node.loaded_plot_count(), 0);
    }
}
