//! Criterion benchmarks for umbra-core critical operations.
//!
//! Covers: Merkle tree construction, block header hashing, ML-DSA-87
//! sign/verify, and transaction serialization.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use umbra_core::address::Address;
use umbra_core::crypto::KeyPair;
use umbra_core::merkle::merkle_root;
use umbra_core::types::{BlockHeader, Hash256, OutPoint, Transaction, TxInput, TxOutput};

/// Generate `n` deterministic 32-byte hashes for Merkle benchmarks.
fn make_txids(n: usize) -> Vec<Hash256> {
    (0..n)
        .map(|i| {
            let bytes = blake3::hash(&(i as u64).to_le_bytes());
            Hash256(*bytes.as_bytes())
        })
        .collect()
}

fn sample_block_header() -> BlockHeader {
    BlockHeader {
        version: 1,
        prev_hash: Hash256([0xAA; 32]),
        merkle_root: Hash256([0xBB; 32]),
        timestamp: 1_700_000_000,
        height: 1,
        nonce: 42,
        difficulty_target: u64::MAX,
        challenge_seed: Hash256([0xCC; 32]),
        proof_hash: Hash256([0xDD; 32]),
        farmer_address: Address::standard([0x11; 20]),
        plot_id: Hash256([0xEE; 32]),
        challenge: Hash256([0xFF; 32]),
        proof: vec![0u8; 4627],
        farmer_pubkey: vec![0u8; 2592],
    }
}

fn sample_transaction() -> Transaction {
    Transaction {
        version: 1,
        inputs: vec![TxInput::spending(OutPoint {
            tx_hash: Hash256([0x11; 32]),
            index: 0,
        })],
        outputs: vec![
            TxOutput {
                value: 50 * 100_000_000,
                address: Address::standard([0xCC; 20]),
                script_pubkey: vec![],
            },
            TxOutput {
                value: 25 * 100_000_000,
                address: Address::standard([0xDD; 20]),
                script_pubkey: vec![],
            },
        ],
        token_ops: vec![],
        not_until: 0,
        timestamp: 1_700_000_000,
        nonce: 0,
    }
}

fn bench_merkle_root(c: &mut Criterion) {
    let txids_10 = make_txids(10);
    let txids_1000 = make_txids(1000);

    c.bench_function("merkle_root_10_txids", |b| {
        b.iter(|| merkle_root(black_box(&txids_10)))
    });

    c.bench_function("merkle_root_1000_txids", |b| {
        b.iter(|| merkle_root(black_box(&txids_1000)))
    });
}

fn bench_block_header_hash(c: &mut Criterion) {
    let header = sample_block_header();

    c.bench_function("block_header_hash", |b| {
        b.iter(|| black_box(&header).hash())
    });
}

fn bench_ml_dsa(c: &mut Criterion) {
    let keypair = KeyPair::generate();
    let message = blake3::hash(b"bench message");
    let msg_bytes = message.as_bytes();
    let signature = keypair.sign(msg_bytes);
    let pubkey = keypair.public_key();

    c.bench_function("ml_dsa_sign", |b| {
        b.iter(|| keypair.sign(black_box(msg_bytes)))
    });

    c.bench_function("ml_dsa_verify", |b| {
        b.iter(|| pubkey.verify(black_box(msg_bytes), black_box(&signature)))
    });
}

fn bench_transaction_serde(c: &mut Criterion) {
    let tx = sample_transaction();
    let encoded =
        bincode::encode_to_vec(&tx, bincode::config::standard()).expect("encode failed");

    c.bench_function("transaction_serialization", |b| {
        b.iter(|| bincode::encode_to_vec(black_box(&tx), bincode::config::standard()))
    });

    c.bench_function("transaction_deserialization", |b| {
        b.iter(|| {
            let (decoded, _): (Transaction, usize) =
                bincode::decode_from_slice(black_box(&encoded), bincode::config::standard())
                    .expect("decode failed");
            decoded
        })
    });
}

criterion_group!(
    benches,
    bench_merkle_root,
    bench_block_header_hash,
    bench_ml_dsa,
    bench_transaction_serde,
);
criterion_main!(benches);
