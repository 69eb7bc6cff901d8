//! Standalone coverage for the RocksDB-backed chain store: genesis
//! auto-connects on first open, connected blocks update the UTXO set and
//! its per-address index, pruning drops bodies but keeps headers, and
//! reopening the same path picks up exactly where it left off.

use umbra_core::address::Address;
use umbra_core::chain_state::ChainStore;
use umbra_core::genesis;
use umbra_core::merkle;
use umbra_core::types::{Block, BlockHeader, Hash256, OutPoint, Transaction, TxEnvelope, TxInput, TxOutput};
use umbra_node_lib::storage::RocksStore;

fn addr(seed: u8) -> Address {
    Address::standard([seed; 20])
}

fn make_coinbase(value: u64, address: Address, height: u64) -> TxEnvelope {
    let raw_tx = Transaction {
        version: 1,
        inputs: vec![TxInput::coinbase(height.to_le_bytes().to_vec())],
        outputs: vec![TxOutput { value, address, script_pubkey: vec![] }],
        token_ops: vec![],
        not_until: 0,
        timestamp: genesis::GENESIS_TIMESTAMP + height,
        nonce: 0,
    };
    TxEnvelope::new_coinbase(raw_tx).unwrap()
}

fn make_block(prev_hash: Hash256, height: u64, timestamp: u64, txs: Vec<TxEnvelope>) -> Block {
    let hashes: Vec<Hash256> = txs.iter().map(|e| e.tx_hash).collect();
    let root = merkle::merkle_root(&hashes);
    Block {
        header: BlockHeader {
            version: 1,
            prev_hash,
            merkle_root: root,
            timestamp,
            height,
            nonce: 0,
            difficulty_target: u64::MAX,
            challenge_seed: Hash256::ZERO,
            proof_hash: Hash256::ZERO,
            farmer_address: addr(0xAA),
            plot_id: Hash256::ZERO,
            challenge: Hash256::ZERO,
            proof: vec![],
            farmer_pubkey: vec![],
        },
        tx_count: txs.len() as u64,
        transactions_hash: root,
        transactions: txs,
    }
}

/// Opening a fresh database connects genesis automatically, and its
/// allocation coinbase is already present in the UTXO set.
#[test]
fn opening_a_fresh_store_auto_connects_genesis() {
    let dir = tempfile::tempdir().unwrap();
    let store = RocksStore::open(dir.path().join("chaindata")).unwrap();

    assert_eq!(store.chain_tip().unwrap(), (0, genesis::genesis_hash()));
    let outpoint = genesis::genesis_coinbase_outpoint();
    assert!(store.get_utxo(&outpoint).unwrap().is_some());
}

/// A connected block's coinbase output shows up both under a direct
/// outpoint lookup and under the paying address's index.
#[test]
fn connected_block_updates_utxo_set_and_address_index() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = RocksStore::open(dir.path().join("chaindata")).unwrap();
    let genesis_hash = genesis::genesis_hash();
    let recipient = addr(0xBB);

    let cb1 = make_coinbase(50_000_000, recipient, 1);
    let cb1_hash = cb1.tx_hash;
    let block1 = make_block(genesis_hash, 1, genesis::GENESIS_TIMESTAMP + 60, vec![cb1]);
    store.connect_block(&block1, 1).unwrap();

    let outpoint = OutPoint { tx_hash: cb1_hash, index: 0 };
    let entry = store.get_utxo(&outpoint).unwrap().expect("coinbase output should be present");
    assert_eq!(entry.output.value, 50_000_000);
    assert!(entry.is_coinbase);

    let by_address = store.get_utxos_by_address(&recipient).unwrap();
    assert_eq!(by_address.len(), 1);
    assert_eq!(by_address[0].0, outpoint);

    assert_eq!(store.chain_tip().unwrap(), (1, block1.header.hash()));
}

/// Pruning deletes stored bodies for blocks older than the retention
/// window while keeping their headers reachable.
#[test]
fn prune_blocks_drops_old_bodies_but_keeps_headers() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = RocksStore::open(dir.path().join("chaindata")).unwrap();
    let mut prev_hash = genesis::genesis_hash();
    let mut prev_block_hash = prev_hash;

    for height in 1..=5u64 {
        let cb = make_coinbase(1_000_000, addr(height as u8), height);
        let block = make_block(prev_hash, height, genesis::GENESIS_TIMESTAMP + height * 60, vec![cb]);
        store.connect_block(&block, height).unwrap();
        prev_block_hash = block.header.hash();
        prev_hash = prev_block_hash;
    }

    let pruned = store.prune_blocks(2).unwrap();
    assert_eq!(pruned, 3, "heights 1..=3 fall outside the 2-block retention window");

    assert!(store.is_block_pruned(1).unwrap());
    assert!(store.is_block_pruned(3).unwrap());
    assert!(!store.is_block_pruned(4).unwrap());
    assert!(!store.is_block_pruned(5).unwrap());

    assert_eq!(store.chain_tip().unwrap(), (5, prev_block_hash));
}

/// Disconnecting the tip reverts the UTXO set to its pre-connect state,
/// re-creating any output the disconnected block had spent.
#[test]
fn disconnect_tip_reverts_utxo_set() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = RocksStore::open(dir.path().join("chaindata")).unwrap();
    let genesis_hash = genesis::genesis_hash();
    let recipient = addr(0xCC);

    let cb1 = make_coinbase(10_000_000, recipient, 1);
    let block1 = make_block(genesis_hash, 1, genesis::GENESIS_TIMESTAMP + 60, vec![cb1]);
    store.connect_block(&block1, 1).unwrap();
    assert_eq!(store.chain_tip().unwrap().0, 1);

    store.disconnect_tip().unwrap();

    assert_eq!(store.chain_tip().unwrap(), (0, genesis_hash));
    assert!(store.get_utxos_by_address(&recipient).unwrap().is_empty());
}

/// Data written to a RocksDB path survives closing and reopening the
/// store at the same path.
#[test]
fn reopening_the_same_path_preserves_chain_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chaindata");
    let recipient = addr(0xDD);
    let block1_hash;

    {
        let mut store = RocksStore::open(&path).unwrap();
        let cb1 = make_coinbase(7_500_000, recipient, 1);
        let block1 = make_block(genesis::genesis_hash(), 1, genesis::GENESIS_TIMESTAMP + 60, vec![cb1]);
        store.connect_block(&block1, 1).unwrap();
        block1_hash = block1.header.hash();
    }

    let reopened = RocksStore::open(&path).unwrap();
    assert_eq!(reopened.chain_tip().unwrap(), (1, block1_hash));
    assert_eq!(reopened.get_utxos_by_address(&recipient).unwrap().len(), 1);
}
