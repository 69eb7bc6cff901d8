//! Criterion benchmarks for umbra-node storage operations.
//!
//! Covers: `connect_block` and UTXO lookup via RocksDB-backed storage.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tempfile::TempDir;

use umbra_core::address::Address;
use umbra_core::chain_state::ChainStore;
use umbra_core::crypto::KeyPair;
use umbra_core::types::{Block, BlockHeader, Hash256, OutPoint, Transaction, TxInput, TxOutput, TxEnvelope};
use umbra_core::{genesis, merkle, reward};

use umbra_node_lib::storage::RocksStore;

/// Build a valid block at `height` on top of the store's current tip,
/// using an always-matching (`u64::MAX`) difficulty target.
fn build_block(store: &RocksStore, height: u64) -> Block {
    let (_, prev_hash) = store.chain_tip().unwrap();
    let parent_header = store.get_block_header(&prev_hash).unwrap().unwrap();

    let farmer = KeyPair::generate();
    let pubkey = farmer.public_key();
    let address = Address::from_public_key(&pubkey);
    let challenge_seed = Hash256([height as u8; 32]);
    let signature = farmer.sign(challenge_seed.as_bytes());
    let proof_hash = Hash256(*blake3::hash(&signature).as_bytes());

    let coinbase_raw = Transaction {
        version: 1,
        inputs: vec![TxInput::coinbase(height.to_le_bytes().to_vec())],
        outputs: vec![TxOutput {
            value: reward::block_reward(height),
            address,
            script_pubkey: vec![],
        }],
        token_ops: vec![],
        not_until: 0,
        timestamp: parent_header.timestamp + 60,
        nonce: 0,
    };
    let coinbase = TxEnvelope::new_coinbase(coinbase_raw).unwrap();
    let root = merkle::merkle_root(&[coinbase.tx_hash]);

    Block {
        header: BlockHeader {
            version: 1,
            prev_hash,
            merkle_root: root,
            timestamp: parent_header.timestamp + 60,
            height,
            nonce: 0,
            difficulty_target: u64::MAX,
            challenge_seed,
            proof_hash,
            farmer_address: address,
            plot_id: Hash256([0x9; 32]),
            challenge: Hash256([0u8; 32]),
            proof: signature,
            farmer_pubkey: pubkey.to_bytes(),
        },
        tx_count: 1,
        transactions_hash: root,
        transactions: vec![coinbase],
    }
}

fn bench_connect_block(c: &mut Criterion) {
    // Each iteration opens a fresh store and connects one block above genesis.
    // Block construction happens outside the timed section.
    c.bench_function("connect_block", |b| {
        b.iter_with_setup(
            || {
                let dir = TempDir::new().unwrap();
                let store = RocksStore::open(dir.path()).unwrap();
                let block = build_block(&store, 1);
                (dir, store, block)
            },
            |(_dir, mut store, block)| {
                store.connect_block(black_box(&block), 1).unwrap();
            },
        )
    });
}

fn bench_utxo_lookup(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let mut store = RocksStore::open(dir.path()).unwrap();

    for h in 1..=10 {
        let block = build_block(&store, h);
        store.connect_block(&block, h).unwrap();
    }

    let genesis = genesis::genesis_block();
    let existing_outpoint = OutPoint {
        tx_hash: genesis.transactions[0].tx_hash,
        index: 0,
    };

    let missing_outpoint = OutPoint {
        tx_hash: Hash256([0xFF; 32]),
        index: 999,
    };

    c.bench_function("utxo_lookup", |b| {
        b.iter(|| store.get_utxo(black_box(&existing_outpoint)))
    });

    c.bench_function("utxo_lookup_miss", |b| {
        b.iter(|| store.get_utxo(black_box(&missing_outpoint)))
    });
}

criterion_group!(benches, bench_connect_block, bench_utxo_lookup);
criterion_main!(benches);
