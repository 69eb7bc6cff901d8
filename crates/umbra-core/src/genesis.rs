//! Genesis block definition for the Umbra network.
//!
//! The genesis block is the first block in the chain (height 0). It
//! contains a single coinbase transaction paying the height-0 schedule
//! reward to a fixed, publicly known address; no premine. Every node
//! computes the identical genesis block.

use std::sync::LazyLock;

use crate::address::Address;
use crate::merkle;
use crate::reward;
use crate::types::{Block, BlockHeader, Hash256, OutPoint, Transaction, TxEnvelope, TxInput, TxOutput};

/// Genesis block timestamp: January 1, 2026 00:00:00 UTC.
pub const GENESIS_TIMESTAMP: u64 = 1_767_225_600;

/// Message embedded in the genesis coinbase (like Bitcoin's "The Times" headline).
pub const GENESIS_MESSAGE: &[u8] = b"Proof of storage, not proof of burn. Umbra genesis 2026.";

/// Cached genesis data, computed once on first access.
struct GenesisData {
    block: Block,
    hash: Hash256,
    coinbase_tx_hash: Hash256,
}

static GENESIS: LazyLock<GenesisData> = LazyLock::new(build_genesis);

/// Build the genesis block and cache derived values.
fn build_genesis() -> GenesisData {
    let envelope = build_genesis_coinbase();
    let mr = merkle::merkle_root(&[envelope.tx_hash]);

    let header = BlockHeader {
        version: 1,
        prev_hash: Hash256::ZERO,
        merkle_root: mr,
        timestamp: GENESIS_TIMESTAMP,
        height: 0,
        nonce: 0,
        difficulty_target: u64::MAX,
        challenge_seed: Hash256::ZERO,
        proof_hash: Hash256::ZERO,
        farmer_address: genesis_allocation_address(),
        plot_id: Hash256::ZERO,
        challenge: Hash256::ZERO,
        proof: Vec::new(),
        farmer_pubkey: Vec::new(),
    };
    let hash = header.hash();
    let coinbase_tx_hash = envelope.tx_hash;

    let block = Block {
        header,
        transactions: vec![envelope],
        tx_count: 1,
        transactions_hash: mr,
    };

    GenesisData {
        block,
        hash,
        coinbase_tx_hash,
    }
}

/// Build the genesis coinbase transaction.
///
/// Contains the genesis message in the coinbase input and a single output
/// paying the height-0 schedule reward to [`genesis_allocation_address`].
fn build_genesis_coinbase() -> TxEnvelope {
    let raw_tx = Transaction {
        version: 1,
        inputs: vec![TxInput::coinbase(GENESIS_MESSAGE.to_vec())],
        outputs: vec![TxOutput {
            value: reward::block_reward(0),
            address: genesis_allocation_address(),
            script_pubkey: Vec::new(),
        }],
        token_ops: Vec::new(),
        not_until: 0,
        timestamp: GENESIS_TIMESTAMP,
        nonce: 0,
    };
    // Hardcoded coinbase — canonical encoding cannot fail.
    TxEnvelope::new_coinbase(raw_tx).expect("genesis coinbase is hardcoded valid data")
}

/// The address that receives the genesis allocation.
///
/// Derived deterministically as `SHA-256(b"umbra genesis allocation")[0..20]`
/// so the address is reproducible without a real keypair. In production
/// this would be replaced by a known, audited address.
pub fn genesis_allocation_address() -> Address {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(b"umbra genesis allocation");
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&digest[0..20]);
    Address::standard(hash)
}

/// The genesis block (height 0).
pub fn genesis_block() -> &'static Block {
    &GENESIS.block
}

/// The genesis block header hash.
pub fn genesis_hash() -> Hash256 {
    GENESIS.hash
}

/// The transaction hash of the genesis coinbase.
pub fn genesis_coinbase_tx_hash() -> Hash256 {
    GENESIS.coinbase_tx_hash
}

/// Check whether a block is the genesis block by comparing header hashes.
pub fn is_genesis(block: &Block) -> bool {
    block.header.hash() == GENESIS.hash
}

/// The null outpoint referencing the genesis coinbase output, useful for
/// tests that want to spend it directly.
pub fn genesis_coinbase_outpoint() -> OutPoint {
    OutPoint {
        tx_hash: genesis_coinbase_tx_hash(),
        index: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_timestamp_is_jan_1_2026() {
        assert_eq!(GENESIS_TIMESTAMP, 20454 * 86400);
    }

    #[test]
    fn genesis_block_deterministic() {
        assert_eq!(genesis_block(), genesis_block());
    }

    #[test]
    fn genesis_block_has_one_transaction() {
        assert_eq!(genesis_block().transactions.len(), 1);
    }

    #[test]
    fn genesis_coinbase_is_coinbase() {
        assert!(genesis_block().coinbase().unwrap().is_coinbase());
    }

    #[test]
    fn genesis_coinbase_has_message() {
        let tx = &genesis_block().transactions[0].raw_tx;
        assert_eq!(tx.inputs[0].coinbase_data, GENESIS_MESSAGE);
    }

    #[test]
    fn genesis_coinbase_pays_schedule_reward() {
        let tx = &genesis_block().transactions[0].raw_tx;
        assert_eq!(tx.outputs[0].value, reward::block_reward(0));
        assert_eq!(tx.outputs[0].address, genesis_allocation_address());
    }

    #[test]
    fn genesis_header_prev_hash_zero() {
        assert!(genesis_block().header.prev_hash.is_zero());
    }

    #[test]
    fn genesis_header_height_zero() {
        assert_eq!(genesis_block().header.height, 0);
    }

    #[test]
    fn genesis_header_max_difficulty() {
        assert_eq!(genesis_block().header.difficulty_target, u64::MAX);
    }

    #[test]
    fn genesis_merkle_root_correct() {
        let block = genesis_block();
        let expected = merkle::merkle_root(&[block.transactions[0].tx_hash]);
        assert_eq!(block.header.merkle_root, expected);
    }

    #[test]
    fn genesis_hash_deterministic() {
        assert_eq!(genesis_hash(), genesis_hash());
    }

    #[test]
    fn genesis_hash_matches_header() {
        assert_eq!(genesis_hash(), genesis_block().header.hash());
    }

    #[test]
    fn is_genesis_true_for_genesis() {
        assert!(is_genesis(genesis_block()));
    }

    #[test]
    fn is_genesis_false_for_modified_genesis() {
        let mut modified = genesis_block().clone();
        modified.header.nonce = 999;
        assert!(!is_genesis(&modified));
    }

    #[test]
    fn genesis_allocation_address_deterministic() {
        assert_eq!(genesis_allocation_address(), genesis_allocation_address());
    }

    #[test]
    fn genesis_coinbase_outpoint_points_at_coinbase() {
        let op = genesis_coinbase_outpoint();
        assert_eq!(op.tx_hash, genesis_block().transactions[0].tx_hash);
        assert_eq!(op.index, 0);
    }
}
