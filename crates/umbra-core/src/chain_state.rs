//! Chain state storage interface and in-memory implementation.
//!
//! Provides the [`ChainStore`] trait for UTXO set management, block storage,
//! and chain tip tracking. The [`MemoryChainStore`] is suitable for testing;
//! the production node uses RocksDB (umbra-node).
//!
//! Blocks passed to [`ChainStore::connect_block`] must already be validated.
//! The store only performs minimal sanity checks (height consistency, no
//! duplicate blocks).

use std::collections::HashMap;

use crate::error::{ChainStateError, UmbraError};
use crate::types::{Block, BlockHeader, Hash256, OutPoint, TxEnvelope, UtxoEntry};

/// Result of connecting a block to the chain state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectBlockResult {
    /// Number of new UTXOs created by this block's transactions.
    pub utxos_created: usize,
    /// Number of UTXOs spent by this block's non-coinbase inputs.
    pub utxos_spent: usize,
}

/// Result of disconnecting the tip block from the chain state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DisconnectBlockResult {
    /// Number of UTXOs restored (previously spent, now unspent again).
    pub utxos_restored: usize,
    /// Number of UTXOs removed (created by the disconnected block).
    pub utxos_removed: usize,
}

/// Undo data for reverting a connected block.
///
/// Stores the UTXOs consumed by the block's transactions so they can be
/// restored during chain reorganization.
#[derive(Clone, Debug)]
struct BlockUndo {
    /// Spent UTXOs in the order they were consumed.
    spent_utxos: Vec<(OutPoint, UtxoEntry)>,
}

/// Mutable chain state storage interface.
///
/// Provides UTXO set management, block storage, and chain tip tracking.
/// Assumes all blocks passed to [`connect_block`](ChainStore::connect_block)
/// have already been validated by the consensus layer.
///
/// Not thread-safe — callers should wrap in a `Mutex` or `RwLock` if
/// concurrent access is needed.
pub trait ChainStore: Send + Sync {
    /// Connect a validated block at the given height.
    ///
    /// Updates the UTXO set (spends inputs, creates outputs), stores the
    /// block and header, and advances the chain tip. Stores undo data
    /// for later disconnection.
    ///
    /// # Errors
    ///
    /// - [`ChainStateError::HeightMismatch`] if `height` is not the expected next height
    /// - [`ChainStateError::DuplicateBlock`] if the block hash already exists
    /// - [`ChainStateError::MissingUtxo`] if an input spends an outpoint not in the set
    fn connect_block(&mut self, block: &Block, height: u64) -> Result<ConnectBlockResult, UmbraError>;

    /// Disconnect the current tip block, reverting UTXO changes.
    ///
    /// Uses stored undo data to restore spent UTXOs and remove created
    /// UTXOs. The chain tip moves to the previous block.
    ///
    /// # Errors
    ///
    /// - [`ChainStateError::EmptyChain`] if no blocks are connected
    /// - [`ChainStateError::BlockNotFound`] if the tip block is missing
    /// - [`ChainStateError::UndoDataMissing`] if undo data was not stored
    fn disconnect_tip(&mut self) -> Result<DisconnectBlockResult, UmbraError>;

    /// Look up a UTXO by outpoint. Returns `None` if spent or unknown.
    fn get_utxo(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, UmbraError>;

    /// Check whether a UTXO exists and is unspent.
    ///
    /// Default implementation delegates to [`get_utxo`](Self::get_utxo).
    fn contains_utxo(&self, outpoint: &OutPoint) -> Result<bool, UmbraError> {
        Ok(self.get_utxo(outpoint)?.is_some())
    }

    /// Current chain tip as `(height, block_hash)`.
    ///
    /// Returns `(0, Hash256::ZERO)` if no blocks have been connected.
    fn chain_tip(&self) -> Result<(u64, Hash256), UmbraError>;

    /// Get a block header by its hash. Returns `None` if not found.
    fn get_block_header(&self, hash: &Hash256) -> Result<Option<BlockHeader>, UmbraError>;

    /// Get a full block by its hash. Returns `None` if not found.
    fn get_block(&self, hash: &Hash256) -> Result<Option<Block>, UmbraError>;

    /// Get the block hash at a given height. Returns `None` if height exceeds tip.
    fn get_block_hash(&self, height: u64) -> Result<Option<Hash256>, UmbraError>;

    /// Number of unspent transaction outputs in the set.
    fn utxo_count(&self) -> usize;

    /// Whether no blocks have been connected.
    fn is_empty(&self) -> bool;

    /// Iterate over all UTXOs. Used for balance queries and UTXO scanning.
    /// Default implementation returns empty vec (override for production).
    fn iter_utxos(&self) -> Result<Vec<(OutPoint, UtxoEntry)>, UmbraError> {
        Ok(Vec::new())
    }

    /// UTXOs paying `address`. Default implementation scans the full set
    /// via [`iter_utxos`](Self::iter_utxos); a backend with a dedicated
    /// address index (e.g. `umbra-node`'s RocksDB store) should override
    /// this with a prefix lookup instead.
    fn get_utxos_by_address(
        &self,
        address: &crate::address::Address,
    ) -> Result<Vec<(OutPoint, UtxoEntry)>, UmbraError> {
        Ok(self
            .iter_utxos()?
            .into_iter()
            .filter(|(_, entry)| &entry.output.address == address)
            .collect())
    }
}

/// In-memory chain state storage for testing.
///
/// Stores everything in `HashMap`s with no persistence. Not suitable for
/// production use (no crash recovery, unbounded memory growth).
pub struct MemoryChainStore {
    /// UTXO set: outpoint → entry.
    utxos: HashMap<OutPoint, UtxoEntry>,
    /// Full blocks by hash.
    blocks: HashMap<Hash256, Block>,
    /// Block headers by hash.
    headers: HashMap<Hash256, BlockHeader>,
    /// Height → block hash mapping.
    height_to_hash: HashMap<u64, Hash256>,
    /// Undo data by block hash (for disconnect_tip).
    undo_data: HashMap<Hash256, BlockUndo>,
    /// Current tip height.
    tip_height: u64,
    /// Current tip block hash. `Hash256::ZERO` means empty chain.
    tip_hash: Hash256,
}

impl MemoryChainStore {
    /// Create a new empty chain store.
    pub fn new() -> Self {
        Self {
            utxos: HashMap::new(),
            blocks: HashMap::new(),
            headers: HashMap::new(),
            height_to_hash: HashMap::new(),
            undo_data: HashMap::new(),
            tip_height: 0,
            tip_hash: Hash256::ZERO,
        }
    }

    /// Number of full blocks stored.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Number of undo records stored.
    pub fn undo_count(&self) -> usize {
        self.undo_data.len()
    }

    /// Process an envelope's inputs: remove spent UTXOs, record undo data.
    ///
    /// Coinbase transactions are skipped (no real inputs to spend).
    /// Returns the number of UTXOs spent, or an error if a UTXO is missing.
    fn spend_inputs(
        &mut self,
        envelope: &TxEnvelope,
        undo: &mut BlockUndo,
    ) -> Result<usize, UmbraError> {
        if envelope.is_coinbase() {
            return Ok(0);
        }
        let mut spent = 0;
        for input in &envelope.raw_tx.inputs {
            let entry = self.utxos.remove(&input.previous_output).ok_or_else(|| {
                UmbraError::ChainState(ChainStateError::MissingUtxo(
                    input.previous_output.to_string(),
                ))
            })?;
            undo.spent_utxos.push((input.previous_output.clone(), entry));
            spent += 1;
        }
        Ok(spent)
    }

    /// Process an envelope's outputs: create new UTXOs.
    fn create_outputs(&mut self, envelope: &TxEnvelope, height: u64) -> usize {
        let is_coinbase = envelope.is_coinbase();
        let mut created = 0;
        for (index, output) in envelope.raw_tx.outputs.iter().enumerate() {
            let outpoint = OutPoint {
                tx_hash: envelope.tx_hash,
                index: index as u64,
            };
            let entry = UtxoEntry {
                output: output.clone(),
                block_height: height,
                is_coinbase,
            };
            self.utxos.insert(outpoint, entry);
            created += 1;
        }
        created
    }
}

impl Default for MemoryChainStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainStore for MemoryChainStore {
    fn connect_block(&mut self, block: &Block, height: u64) -> Result<ConnectBlockResult, UmbraError> {
        // Validate height consistency.
        if self.tip_hash == Hash256::ZERO {
            if height != 0 {
                return Err(ChainStateError::HeightMismatch {
                    expected: 0,
                    got: height,
                }.into());
            }
        } else if height != self.tip_height + 1 {
            return Err(ChainStateError::HeightMismatch {
                expected: self.tip_height + 1,
                got: height,
            }.into());
        }

        let block_hash = block.header.hash();

        // Reject duplicate blocks.
        if self.blocks.contains_key(&block_hash) {
            return Err(ChainStateError::DuplicateBlock(block_hash.to_string()).into());
        }

        let mut undo = BlockUndo { spent_utxos: Vec::new() };
        let mut total_spent = 0;
        let mut total_created = 0;

        // Process transactions: spend inputs, then create outputs.
        for envelope in &block.transactions {
            total_spent += self.spend_inputs(envelope, &mut undo)?;
            total_created += self.create_outputs(envelope, height);
        }

        // Store block, header, height mapping, undo data.
        self.headers.insert(block_hash, block.header.clone());
        self.blocks.insert(block_hash, block.clone());
        self.height_to_hash.insert(height, block_hash);
        self.undo_data.insert(block_hash, undo);

        // Update tip.
        self.tip_height = height;
        self.tip_hash = block_hash;

        Ok(ConnectBlockResult {
            utxos_created: total_created,
            utxos_spent: total_spent,
        })
    }

    fn disconnect_tip(&mut self) -> Result<DisconnectBlockResult, UmbraError> {
        if self.tip_hash == Hash256::ZERO {
            return Err(ChainStateError::EmptyChain.into());
        }

        let tip_hash = self.tip_hash;
        let tip_height = self.tip_height;

        // Get the tip block.
        let block = self.blocks.get(&tip_hash)
            .cloned()
            .ok_or_else(|| ChainStateError::BlockNotFound(tip_hash.to_string()))?;

        // Get undo data.
        let undo = self.undo_data.remove(&tip_hash)
            .ok_or_else(|| ChainStateError::UndoDataMissing(tip_hash.to_string()))?;

        // Remove UTXOs created by this block (reverse transaction order).
        let mut total_removed = 0;
        for envelope in block.transactions.iter().rev() {
            for (index, _) in envelope.raw_tx.outputs.iter().enumerate() {
                let outpoint = OutPoint {
                    tx_hash: envelope.tx_hash,
                    index: index as u64,
                };
                if self.utxos.remove(&outpoint).is_some() {
                    total_removed += 1;
                }
            }
        }

        // Restore spent UTXOs from undo data.
        let total_restored = undo.spent_utxos.len();
        for (outpoint, entry) in undo.spent_utxos {
            self.utxos.insert(outpoint, entry);
        }

        // Remove block from height index.
        self.height_to_hash.remove(&tip_height);

        // Update tip.
        if tip_height == 0 {
            // Disconnected genesis — back to empty chain.
            self.tip_height = 0;
            self.tip_hash = Hash256::ZERO;
        } else {
            self.tip_height = tip_height - 1;
            self.tip_hash = block.header.prev_hash;
        }

        Ok(DisconnectBlockResult {
            utxos_restored: total_restored,
            utxos_removed: total_removed,
        })
    }

    fn get_utxo(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, UmbraError> {
        Ok(self.utxos.get(outpoint).cloned())
    }

    fn chain_tip(&self) -> Result<(u64, Hash256), UmbraError> {
        Ok((self.tip_height, self.tip_hash))
    }

    fn get_block_header(&self, hash: &Hash256) -> Result<Option<BlockHeader>, UmbraError> {
        Ok(self.headers.get(hash).cloned())
    }

    fn get_block(&self, hash: &Hash256) -> Result<Option<Block>, UmbraError> {
        Ok(self.blocks.get(hash).cloned())
    }

    fn get_block_hash(&self, height: u64) -> Result<Option<Hash256>, UmbraError> {
        Ok(self.height_to_hash.get(&height).copied())
    }

    fn utxo_count(&self) -> usize {
        self.utxos.len()
    }

    fn is_empty(&self) -> bool {
        self.tip_hash == Hash256::ZERO
    }

    fn iter_utxos(&self) -> Result<Vec<(OutPoint, UtxoEntry)>, UmbraError> {
        Ok(self.utxos.iter().map(|(op, entry)| (op.clone(), entry.clone())).collect())
    }
}
