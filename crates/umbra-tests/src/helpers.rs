//! Shared fixtures for integration tests: signed transactions, farmer
//! proofs, and fully assembled blocks built with real ML-DSA keypairs
//! instead of the canned zero-bytes the unit tests use.

use sha2::{Digest, Sha256};

use umbra_core::address::Address;
use umbra_core::chain_state::ChainStore;
use umbra_core::crypto::KeyPair;
use umbra_core::merkle;
use umbra_core::reward::RewardSchedule;
use umbra_core::types::{
    Block, BlockHeader, Hash256, OutPoint, Transaction, TxEnvelope, TxInput, TxOutput,
};

/// Sign `raw_tx` with `signer` and wrap it in an envelope.
pub fn sign_tx(signer: &KeyPair, raw_tx: Transaction) -> TxEnvelope {
    let tx_hash = raw_tx.hash().expect("canonical encoding of a well-formed tx cannot fail");
    let signature = signer.sign(tx_hash.as_ref());
    TxEnvelope::new(raw_tx, signature, signer.public_key().to_bytes())
        .expect("envelope construction cannot fail for a hash we just computed")
}

/// A simple one-input, one-output spend of `input` by `signer`, paying
/// `value` to `to` with `fee` satoshi left over (so `input_value = value +
/// fee` must hold at the outer UTXO, which callers arrange).
pub fn spend(signer: &KeyPair, input: OutPoint, value: u64, to: Address, timestamp: u64, nonce: u64) -> TxEnvelope {
    let raw_tx = Transaction {
        version: 1,
        inputs: vec![TxInput::spending(input)],
        outputs: vec![TxOutput {
            value,
            address: to,
            script_pubkey: Vec::new(),
        }],
        token_ops: Vec::new(),
        not_until: 0,
        timestamp,
        nonce,
    };
    sign_tx(signer, raw_tx)
}

/// Build a farmer's proof-of-storage answer to `challenge_seed`, matching
/// any difficulty (the header carries `u64::MAX` in the tests that use
/// this, so any identifier clears it).
pub struct FarmerProof {
    pub address: Address,
    pub challenge: Hash256,
    pub pubkey_bytes: Vec<u8>,
    pub signature: Vec<u8>,
}

pub fn farmer_proof(farmer: &KeyPair, challenge_seed: Hash256) -> FarmerProof {
    let pubkey = farmer.public_key();
    let identifier = pubkey.identifier_hash();
    let mut challenge_bytes = [0u8; 32];
    challenge_bytes[..16].copy_from_slice(&identifier);

    FarmerProof {
        address: Address::from_public_key(&pubkey),
        challenge: Hash256(challenge_bytes),
        pubkey_bytes: pubkey.to_bytes(),
        signature: farmer.sign(challenge_seed.as_ref()),
    }
}

/// Assemble a fully valid block with no non-coinbase transactions,
/// extending `prev_hash` at `height`, with `farmer` answering the
/// challenge and collecting exactly the schedule reward (no fees).
/// `difficulty_target` is normally `u64::MAX` so the proof always clears
/// it without needing a real plot scan.
pub fn mine_empty_block(
    farmer: &KeyPair,
    prev_hash: Hash256,
    height: u64,
    timestamp: u64,
    difficulty_target: u64,
) -> Block {
    let reward = RewardSchedule::default().block_reward(height);
    mine_block_with_reward(farmer, prev_hash, height, timestamp, difficulty_target, reward, Vec::new())
}

/// Assemble a fully valid block carrying `txs`, with the caller supplying
/// the exact coinbase payout (reward + fees), since this module can't see
/// the UTXO set to compute fees on the caller's behalf.
pub fn mine_block_with_reward(
    farmer: &KeyPair,
    prev_hash: Hash256,
    height: u64,
    timestamp: u64,
    difficulty_target: u64,
    coinbase_value: u64,
    mut txs: Vec<TxEnvelope>,
) -> Block {
    let proof = farmer_proof(farmer, Hash256([0x5A; 32]));

    let coinbase_raw = Transaction {
        version: 1,
        inputs: vec![TxInput::coinbase(height.to_le_bytes().to_vec())],
        outputs: vec![TxOutput {
            value: coinbase_value,
            address: proof.address,
            script_pubkey: Vec::new(),
        }],
        token_ops: Vec::new(),
        not_until: 0,
        timestamp,
        nonce: 0,
    };
    let coinbase = TxEnvelope::new_coinbase(coinbase_raw).expect("coinbase envelope always valid");

    let mut transactions = vec![coinbase];
    transactions.append(&mut txs);
    let hashes: Vec<Hash256> = transactions.iter().map(|t| t.tx_hash).collect();
    let root = merkle::merkle_root(&hashes);

    let proof_hash = Hash256(Sha256::digest(&proof.signature).into());

    let header = BlockHeader {
        version: 1,
        prev_hash,
        merkle_root: root,
        timestamp,
        height,
        nonce: 0,
        difficulty_target,
        challenge_seed: Hash256([0x5A; 32]),
        proof_hash,
        farmer_address: proof.address,
        plot_id: Hash256([0x01; 32]),
        challenge: proof.challenge,
        proof: proof.signature,
        farmer_pubkey: proof.pubkey_bytes,
    };

    Block {
        header,
        tx_count: transactions.len() as u64,
        transactions_hash: root,
        transactions,
    }
}

/// Connect `block` directly to `chain` (skipping §4.8's validator), for
/// tests that need a seeded chain with a known tip/UTXO shape rather than
/// exercising block acceptance itself.
pub fn connect_unchecked(chain: &mut dyn ChainStore, block: &Block, height: u64) {
    chain
        .connect_block(block, height)
        .expect("fixture block must connect cleanly");
}
