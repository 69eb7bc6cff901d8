//! RocksDB-backed persistent chain state storage (§4.4).
//!
//! Implements [`ChainStore`] using RocksDB column families for blocks,
//! headers, UTXOs, height index, undo data, and metadata, plus an
//! `address_index` column family so UTXO-by-address lookups (§6's
//! `get_utxo` command) don't require a full UTXO scan. All mutations use an
//! atomic [`WriteBatch`] for crash safety.
//!
//! On first open, automatically connects the genesis block.

use std::path::Path;

use rocksdb::{ColumnFamilyDescriptor, Options, SliceTransform, WriteBatch, DB};

use umbra_core::chain_state::{ChainStore, ConnectBlockResult, DisconnectBlockResult};
use umbra_core::error::{ChainStateError, UmbraError};
use umbra_core::genesis;
use umbra_core::types::{Block, BlockHeader, Hash256, OutPoint, TxEnvelope, UtxoEntry};

// --- Column family names ---

const CF_BLOCKS: &str = "blocks";
const CF_HEADERS: &str = "headers";
const CF_UTXOS: &str = "utxos";
const CF_HEIGHT_INDEX: &str = "height_index";
const CF_UNDO: &str = "undo";
const CF_METADATA: &str = "metadata";
const CF_ADDRESS_INDEX: &str = "address_index";

const ALL_CFS: &[&str] = &[
    CF_BLOCKS,
    CF_HEADERS,
    CF_UTXOS,
    CF_HEIGHT_INDEX,
    CF_UNDO,
    CF_METADATA,
    CF_ADDRESS_INDEX,
];

const META_UTXO_COUNT: &[u8] = b"utxo_count";

/// Undo data for reverting a connected block.
#[derive(bincode::Encode, bincode::Decode)]
struct BlockUndo {
    /// Spent UTXOs in the order they were consumed.
    spent_utxos: Vec<(OutPoint, UtxoEntry)>,
}

/// RocksDB-backed persistent chain state storage.
///
/// Stores blocks, headers, UTXOs, height index, undo data, and an
/// address-keyed UTXO index in separate column families. On first open,
/// automatically connects the genesis block.
pub struct RocksStore {
    db: DB,
}

impl RocksStore {
    /// Open or create a RocksDB database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, UmbraError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| {
                let mut opts = Options::default();
                // pubkey_hash is a fixed 20-byte prefix of the address-index key.
                if *name == CF_ADDRESS_INDEX {
                    opts.set_prefix_extractor(SliceTransform::create_fixed_prefix(20));
                }
                ColumnFamilyDescriptor::new(*name, opts)
            })
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path.as_ref(), cf_descriptors)
            .map_err(|e| UmbraError::Storage(e.to_string()))?;

        let mut store = Self { db };

        if store.is_empty() {
            store.connect_block(genesis::genesis_block(), 0)?;
        }

        store.migrate_address_index()?;

        Ok(store)
    }

    /// Flush all in-memory buffers to disk.
    pub fn flush(&self) -> Result<(), UmbraError> {
        self.db.flush().map_err(|e| UmbraError::Storage(e.to_string()))
    }

    /// Trigger manual compaction across all column families.
    pub fn compact(&self) -> Result<(), UmbraError> {
        for cf_name in ALL_CFS {
            let cf = self.cf_handle(cf_name)?;
            self.db.compact_range_cf(&cf, None::<&[u8]>, None::<&[u8]>);
        }
        Ok(())
    }

    /// Delete full block data for blocks older than `keep_recent` blocks
    /// from the current tip. Headers and undo data are preserved. Returns
    /// the number of blocks pruned.
    pub fn prune_blocks(&self, keep_recent: u64) -> Result<u64, UmbraError> {
        let (tip_height, _) = self.chain_tip()?;
        let cutoff = tip_height.saturating_sub(keep_recent);
        if cutoff == 0 {
            return Ok(0);
        }

        let cf_blocks = self.cf_handle(CF_BLOCKS)?;
        let cf_height = self.cf_handle(CF_HEIGHT_INDEX)?;
        let mut batch = WriteBatch::default();
        let mut pruned = 0u64;

        for height in 1..=cutoff {
            let hash_bytes = match self
                .db
                .get_cf(&cf_height, Self::height_key(height))
                .map_err(|e| UmbraError::Storage(e.to_string()))?
            {
                Some(bytes) if bytes.len() == 32 => bytes,
                _ => continue,
            };

            if self
                .db
                .get_cf(&cf_blocks, &hash_bytes)
                .map_err(|e| UmbraError::Storage(e.to_string()))?
                .is_some()
            {
                batch.delete_cf(cf_blocks, &hash_bytes);
                pruned += 1;
            }
        }

        if pruned > 0 {
            self.db.write(batch).map_err(|e| UmbraError::Storage(e.to_string()))?;
            tracing::info!(pruned, cutoff, "pruned full block data");
        }

        Ok(pruned)
    }

    /// Returns true if the block at `height` has had its full body pruned
    /// (header present, body absent).
    pub fn is_block_pruned(&self, height: u64) -> Result<bool, UmbraError> {
        let hash = match self.get_block_hash(height)? {
            Some(h) => h,
            None => return Ok(false),
        };
        if self.get_block_header(&hash)?.is_none() {
            return Ok(false);
        }
        let cf_blocks = self.cf_handle(CF_BLOCKS)?;
        let present = self
            .db
            .get_cf(&cf_blocks, hash.as_bytes())
            .map_err(|e| UmbraError::Storage(e.to_string()))?
            .is_some();
        Ok(!present)
    }

    /// All UTXOs currently owned by `address`, via the `address_index`
    /// prefix iterator.
    pub fn get_utxos_by_address(
        &self,
        address: &umbra_core::address::Address,
    ) -> Result<Vec<(OutPoint, UtxoEntry)>, UmbraError> {
        let cf_addr = self.cf_handle(CF_ADDRESS_INDEX)?;
        let cf_utxos = self.cf_handle(CF_UTXOS)?;
        let prefix = address.hash;

        let mut result = Vec::new();
        for item in self.db.prefix_iterator_cf(&cf_addr, prefix) {
            let (key_bytes, _) = item.map_err(|e| UmbraError::Storage(e.to_string()))?;
            if key_bytes.len() != 60 || key_bytes[0..20] != prefix {
                break;
            }
            let mut tx_hash_bytes = [0u8; 32];
            tx_hash_bytes.copy_from_slice(&key_bytes[20..52]);
            let index = u64::from_be_bytes(key_bytes[52..60].try_into().unwrap());
            let outpoint = OutPoint {
                tx_hash: Hash256(tx_hash_bytes),
                index,
            };

            let utxo_key = Self::encode_outpoint(&outpoint)?;
            if let Some(bytes) = self
                .db
                .get_cf(&cf_utxos, &utxo_key)
                .map_err(|e| UmbraError::Storage(e.to_string()))?
            {
                let (entry, _): (UtxoEntry, _) =
                    bincode::decode_from_slice(&bytes, bincode::config::standard())
                        .map_err(|e| UmbraError::Storage(e.to_string()))?;
                result.push((outpoint, entry));
            }
        }
        Ok(result)
    }

    // --- internal helpers ---

    fn cf_handle(&self, name: &str) -> Result<&rocksdb::ColumnFamily, UmbraError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| UmbraError::Storage(format!("missing column family: {name}")))
    }

    fn encode_outpoint(outpoint: &OutPoint) -> Result<Vec<u8>, UmbraError> {
        bincode::encode_to_vec(outpoint, bincode::config::standard())
            .map_err(|e| UmbraError::Storage(e.to_string()))
    }

    /// Big-endian height key so `height_index` iterates in chain order.
    fn height_key(height: u64) -> [u8; 8] {
        height.to_be_bytes()
    }

    /// `pubkey_hash ∥ tx_hash ∥ index(BE)` — the `address_index` key.
    fn encode_address_index_key(address: &umbra_core::address::Address, outpoint: &OutPoint) -> [u8; 60] {
        let mut key = [0u8; 60];
        key[0..20].copy_from_slice(&address.hash);
        key[20..52].copy_from_slice(outpoint.tx_hash.as_bytes());
        key[52..60].copy_from_slice(&outpoint.index.to_be_bytes());
        key
    }

    fn get_meta_u64(&self, key: &[u8]) -> Result<u64, UmbraError> {
        let cf = self.cf_handle(CF_METADATA)?;
        match self.db.get_cf(&cf, key).map_err(|e| UmbraError::Storage(e.to_string()))? {
            Some(bytes) if bytes.len() == 8 => Ok(u64::from_le_bytes(bytes.try_into().unwrap())),
            Some(_) => Err(UmbraError::Storage("invalid metadata value length".into())),
            None => Ok(0),
        }
    }

    /// One-time migration: build the address index from existing UTXOs if
    /// it's empty but the UTXO set is not (e.g. data written before the
    /// index existed).
    fn migrate_address_index(&self) -> Result<(), UmbraError> {
        let cf_addr = self.cf_handle(CF_ADDRESS_INDEX)?;
        if self.db.iterator_cf(&cf_addr, rocksdb::IteratorMode::Start).next().is_some() {
            return Ok(());
        }

        let utxo_count = self.get_meta_u64(META_UTXO_COUNT)?;
        if utxo_count == 0 {
            return Ok(());
        }

        tracing::info!(utxo_count, "migrating address index");
        let cf_utxos = self.cf_handle(CF_UTXOS)?;
        let mut batch = WriteBatch::default();
        let mut count = 0u64;

        for item in self.db.iterator_cf(&cf_utxos, rocksdb::IteratorMode::Start) {
            let (key_bytes, value_bytes) = item.map_err(|e| UmbraError::Storage(e.to_string()))?;
            let (outpoint, _): (OutPoint, _) =
                bincode::decode_from_slice(&key_bytes, bincode::config::standard())
                    .map_err(|e| UmbraError::Storage(e.to_string()))?;
            let (entry, _): (UtxoEntry, _) =
                bincode::decode_from_slice(&value_bytes, bincode::config::standard())
                    .map_err(|e| UmbraError::Storage(e.to_string()))?;

            let addr_key = Self::encode_address_index_key(&entry.output.address, &outpoint);
            batch.put_cf(cf_addr, addr_key, []);
            count += 1;
        }

        if count > 0 {
            self.db.write(batch).map_err(|e| UmbraError::Storage(e.to_string()))?;
            tracing::info!(count, "address index migration complete");
        }
        Ok(())
    }

    /// Process an envelope's inputs: look up spent UTXOs, stage their
    /// deletion, and record undo data. Returns the number spent.
    fn collect_spent_utxos(
        &self,
        envelope: &TxEnvelope,
        batch: &mut WriteBatch,
        undo: &mut BlockUndo,
    ) -> Result<usize, UmbraError> {
        if envelope.is_coinbase() {
            return Ok(0);
        }

        let cf_utxos = self.cf_handle(CF_UTXOS)?;
        let cf_addr = self.cf_handle(CF_ADDRESS_INDEX)?;
        let mut spent = 0;

        for input in &envelope.raw_tx.inputs {
            let key = Self::encode_outpoint(&input.previous_output)?;
            let data = self
                .db
                .get_cf(&cf_utxos, &key)
                .map_err(|e| UmbraError::Storage(e.to_string()))?
                .ok_or_else(|| {
                    UmbraError::ChainState(ChainStateError::MissingUtxo(
                        input.previous_output.to_string(),
                    ))
                })?;
            let (entry, _): (UtxoEntry, _) =
                bincode::decode_from_slice(&data, bincode::config::standard())
                    .map_err(|e| UmbraError::Storage(e.to_string()))?;

            batch.delete_cf(cf_utxos, &key);
            batch.delete_cf(
                cf_addr,
                Self::encode_address_index_key(&entry.output.address, &input.previous_output),
            );
            undo.spent_utxos.push((input.previous_output.clone(), entry));
            spent += 1;
        }

        Ok(spent)
    }

    /// Process an envelope's outputs: stage new UTXO and address-index
    /// entries. Returns the number created.
    fn stage_created_outputs(
        &self,
        envelope: &TxEnvelope,
        height: u64,
        batch: &mut WriteBatch,
    ) -> Result<usize, UmbraError> {
        let cf_utxos = self.cf_handle(CF_UTXOS)?;
        let cf_addr = self.cf_handle(CF_ADDRESS_INDEX)?;
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
            let key = Self::encode_outpoint(&outpoint)?;
            let value = bincode::encode_to_vec(&entry, bincode::config::standard())
                .map_err(|e| UmbraError::Storage(e.to_string()))?;
            batch.put_cf(cf_utxos, &key, &value);
            batch.put_cf(cf_addr, Self::encode_address_index_key(&output.address, &outpoint), []);
            created += 1;
        }

        Ok(created)
    }
}

impl ChainStore for RocksStore {
    fn connect_block(&mut self, block: &Block, height: u64) -> Result<ConnectBlockResult, UmbraError> {
        let (tip_height, tip_hash) = self.chain_tip()?;
        if tip_hash == Hash256::ZERO {
            if height != 0 {
                return Err(ChainStateError::HeightMismatch { expected: 0, got: height }.into());
            }
        } else if height != tip_height + 1 {
            return Err(ChainStateError::HeightMismatch {
                expected: tip_height + 1,
                got: height,
            }
            .into());
        }

        let block_hash = block.header.hash();
        let cf_blocks = self.cf_handle(CF_BLOCKS)?;
        if self
            .db
            .get_cf(&cf_blocks, block_hash.as_bytes())
            .map_err(|e| UmbraError::Storage(e.to_string()))?
            .is_some()
        {
            return Err(ChainStateError::DuplicateBlock(block_hash.to_string()).into());
        }

        let mut batch = WriteBatch::default();
        let mut undo = BlockUndo { spent_utxos: Vec::new() };
        let mut total_spent = 0;
        let mut total_created = 0;

        for envelope in &block.transactions {
            total_spent += self.collect_spent_utxos(envelope, &mut batch, &mut undo)?;
            total_created += self.stage_created_outputs(envelope, height, &mut batch)?;
        }

        let block_bytes = bincode::encode_to_vec(block, bincode::config::standard())
            .map_err(|e| UmbraError::Storage(e.to_string()))?;
        let header_bytes = bincode::encode_to_vec(&block.header, bincode::config::standard())
            .map_err(|e| UmbraError::Storage(e.to_string()))?;
        let undo_bytes = bincode::encode_to_vec(&undo, bincode::config::standard())
            .map_err(|e| UmbraError::Storage(e.to_string()))?;

        let cf_headers = self.cf_handle(CF_HEADERS)?;
        let cf_height = self.cf_handle(CF_HEIGHT_INDEX)?;
        let cf_undo = self.cf_handle(CF_UNDO)?;
        let cf_meta = self.cf_handle(CF_METADATA)?;

        batch.put_cf(cf_blocks, block_hash.as_bytes(), &block_bytes);
        batch.put_cf(cf_headers, block_hash.as_bytes(), &header_bytes);
        batch.put_cf(cf_height, Self::height_key(height), block_hash.as_bytes());
        batch.put_cf(cf_undo, block_hash.as_bytes(), &undo_bytes);
        batch.put_cf(cf_meta, b"tip_height", height.to_le_bytes());
        batch.put_cf(cf_meta, b"tip_hash", block_hash.as_bytes());

        let new_utxo_count = self.get_meta_u64(META_UTXO_COUNT)?
            + total_created as u64
            - total_spent as u64;
        batch.put_cf(cf_meta, META_UTXO_COUNT, new_utxo_count.to_le_bytes());

        self.db.write(batch).map_err(|e| UmbraError::Storage(e.to_string()))?;

        Ok(ConnectBlockResult {
            utxos_created: total_created,
            utxos_spent: total_spent,
        })
    }

    fn disconnect_tip(&mut self) -> Result<DisconnectBlockResult, UmbraError> {
        let (tip_height, tip_hash) = self.chain_tip()?;
        if tip_hash == Hash256::ZERO {
            return Err(ChainStateError::EmptyChain.into());
        }

        let block = self
            .get_block(&tip_hash)?
            .ok_or_else(|| ChainStateError::BlockNotFound(tip_hash.to_string()))?;

        let cf_undo = self.cf_handle(CF_UNDO)?;
        let undo_bytes = self
            .db
            .get_cf(&cf_undo, tip_hash.as_bytes())
            .map_err(|e| UmbraError::Storage(e.to_string()))?
            .ok_or_else(|| ChainStateError::UndoDataMissing(tip_hash.to_string()))?;
        let (undo, _): (BlockUndo, _) =
            bincode::decode_from_slice(&undo_bytes, bincode::config::standard())
                .map_err(|e| UmbraError::Storage(e.to_string()))?;

        let mut batch = WriteBatch::default();
        let cf_utxos = self.cf_handle(CF_UTXOS)?;
        let cf_addr = self.cf_handle(CF_ADDRESS_INDEX)?;
        let cf_height = self.cf_handle(CF_HEIGHT_INDEX)?;
        let cf_meta = self.cf_handle(CF_METADATA)?;

        let mut total_removed = 0;
        for envelope in block.transactions.iter().rev() {
            for (index, output) in envelope.raw_tx.outputs.iter().enumerate() {
                let outpoint = OutPoint { tx_hash: envelope.tx_hash, index: index as u64 };
                let key = Self::encode_outpoint(&outpoint)?;
                if self
                    .db
                    .get_cf(&cf_utxos, &key)
                    .map_err(|e| UmbraError::Storage(e.to_string()))?
                    .is_some()
                {
                    batch.delete_cf(cf_utxos, &key);
                    batch.delete_cf(cf_addr, Self::encode_address_index_key(&output.address, &outpoint));
                    total_removed += 1;
                }
            }
        }

        let total_restored = undo.spent_utxos.len();
        for (outpoint, entry) in &undo.spent_utxos {
            let key = Self::encode_outpoint(outpoint)?;
            let value = bincode::encode_to_vec(entry, bincode::config::standard())
                .map_err(|e| UmbraError::Storage(e.to_string()))?;
            batch.put_cf(cf_utxos, &key, &value);
            batch.put_cf(cf_addr, Self::encode_address_index_key(&entry.output.address, outpoint), []);
        }

        batch.delete_cf(cf_height, Self::height_key(tip_height));
        batch.delete_cf(cf_undo, tip_hash.as_bytes());

        let (new_tip_height, new_tip_hash) = if tip_height == 0 {
            (0u64, Hash256::ZERO)
        } else {
            (tip_height - 1, block.header.prev_hash)
        };
        batch.put_cf(cf_meta, b"tip_height", new_tip_height.to_le_bytes());
        batch.put_cf(cf_meta, b"tip_hash", new_tip_hash.as_bytes());

        let new_utxo_count = (self.get_meta_u64(META_UTXO_COUNT)? + total_restored as u64)
            .saturating_sub(total_removed as u64);
        batch.put_cf(cf_meta, META_UTXO_COUNT, new_utxo_count.to_le_bytes());

        self.db.write(batch).map_err(|e| UmbraError::Storage(e.to_string()))?;

        Ok(DisconnectBlockResult {
            utxos_restored: total_restored,
            utxos_removed: total_removed,
        })
    }

    fn get_utxo(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, UmbraError> {
        let cf = self.cf_handle(CF_UTXOS)?;
        let key = Self::encode_outpoint(outpoint)?;
        match self.db.get_cf(&cf, &key).map_err(|e| UmbraError::Storage(e.to_string()))? {
            Some(bytes) => {
                let (entry, _): (UtxoEntry, _) =
                    bincode::decode_from_slice(&bytes, bincode::config::standard())
                        .map_err(|e| UmbraError::Storage(e.to_string()))?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    fn chain_tip(&self) -> Result<(u64, Hash256), UmbraError> {
        let cf = self.cf_handle(CF_METADATA)?;
        let height = match self.db.get_cf(&cf, b"tip_height").map_err(|e| UmbraError::Storage(e.to_string()))? {
            Some(bytes) if bytes.len() == 8 => u64::from_le_bytes(bytes.try_into().unwrap()),
            _ => return Ok((0, Hash256::ZERO)),
        };
        let hash = match self.db.get_cf(&cf, b"tip_hash").map_err(|e| UmbraError::Storage(e.to_string()))? {
            Some(bytes) if bytes.len() == 32 => {
                let mut arr = [0u8; 32];
                arr.copy_from_slice(&bytes);
                Hash256(arr)
            }
            _ => return Ok((0, Hash256::ZERO)),
        };
        Ok((height, hash))
    }

    fn get_block_header(&self, hash: &Hash256) -> Result<Option<BlockHeader>, UmbraError> {
        let cf = self.cf_handle(CF_HEADERS)?;
        match self.db.get_cf(&cf, hash.as_bytes()).map_err(|e| UmbraError::Storage(e.to_string()))? {
            Some(bytes) => {
                let (header, _): (BlockHeader, _) =
                    bincode::decode_from_slice(&bytes, bincode::config::standard())
                        .map_err(|e| UmbraError::Storage(e.to_string()))?;
                Ok(Some(header))
            }
            None => Ok(None),
        }
    }

    fn get_block(&self, hash: &Hash256) -> Result<Option<Block>, UmbraError> {
        let cf = self.cf_handle(CF_BLOCKS)?;
        match self.db.get_cf(&cf, hash.as_bytes()).map_err(|e| UmbraError::Storage(e.to_string()))? {
            Some(bytes) => {
                let (block, _): (Block, _) =
                    bincode::decode_from_slice(&bytes, bincode::config::standard())
                        .map_err(|e| UmbraError::Storage(e.to_string()))?;
                Ok(Some(block))
            }
            None => Ok(None),
        }
    }

    fn get_block_hash(&self, height: u64) -> Result<Option<Hash256>, UmbraError> {
        let cf = self.cf_handle(CF_HEIGHT_INDEX)?;
        match self
            .db
            .get_cf(&cf, Self::height_key(height))
            .map_err(|e| UmbraError::Storage(e.to_string()))?
        {
            Some(bytes) if bytes.len() == 32 => {
                let mut arr = [0u8; 32];
                arr.copy_from_slice(&bytes);
                Ok(Some(Hash256(arr)))
            }
            _ => Ok(None),
        }
    }

    fn utxo_count(&self) -> usize {
        self.get_meta_u64(META_UTXO_COUNT).unwrap_or(0) as usize
    }

    fn is_empty(&self) -> bool {
        matches!(self.chain_tip(), Ok((0, hash)) if hash == Hash256::ZERO)
    }

    fn iter_utxos(&self) -> Result<Vec<(OutPoint, UtxoEntry)>, UmbraError> {
        let cf = self.cf_handle(CF_UTXOS)?;
        let mut out = Vec::new();
        for item in self.db.iterator_cf(&cf, rocksdb::IteratorMode::Start) {
            let (key_bytes, value_bytes) = item.map_err(|e| UmbraError::Storage(e.to_string()))?;
            let (outpoint, _): (OutPoint, _) =
                bincode::decode_from_slice(&key_bytes, bincode::config::standard())
                    .map_err(|e| UmbraError::Storage(e.to_string()))?;
            let (entry, _): (UtxoEntry, _) =
                bincode::decode_from_slice(&value_bytes, bincode::config::standard())
                    .map_err(|e| UmbraError::Storage(e.to_string()))?;
            out.push((outpoint, entry));
        }
        Ok(out)
    }

    fn get_utxos_by_address(
        &self,
        address: &umbra_core::address::Address,
    ) -> Result<Vec<(OutPoint, UtxoEntry)>, UmbraError> {
        RocksStore::get_utxos_by_address(self, address)
    }
}
