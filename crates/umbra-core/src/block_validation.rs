//! Block validation (§4.4).
//!
//! Two levels of validation:
//!
//! - **Structural** ([`validate_block_structure`]): context-free checks on
//!   block format, the committed transaction hashes, and the proof-of-storage
//!   commitment's internal consistency.
//! - **Contextual** ([`validate_block`]): full validation including header
//!   linkage, difficulty, timestamp, the proof-of-storage match itself,
//!   coinbase reward, and contextual transaction validation with
//!   cross-transaction double-spend detection.
//!
//! The genesis block (height 0) is **not** validated through this module.
//! Use [`genesis::is_genesis`](crate::genesis::is_genesis) instead.

use std::collections::HashSet;

use sha2::{Digest, Sha256};

use crate::address::Address;
use crate::constants::{MAX_BLOCK_SIZE, MAX_FUTURE_BLOCK_TIME};
use crate::crypto::{self, PublicKey};
use crate::error::{BlockError, TransactionError};
use crate::merkle;
use crate::types::{Block, Hash256, OutPoint, UtxoEntry};
use crate::validation;

/// Context required for full block validation.
///
/// The caller provides these values from the chain state: the expected
/// parent linkage, difficulty, timing, and reward for the block being
/// validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockContext {
    /// Height of the block being validated.
    pub height: u64,
    /// Expected previous block hash (the parent's header hash).
    pub prev_hash: Hash256,
    /// Parent block's timestamp (for monotonicity check).
    pub prev_timestamp: u64,
    /// Expected difficulty target for this height.
    pub expected_difficulty: u64,
    /// Current wall-clock time in Unix seconds (for future timestamp check).
    pub current_time: u64,
    /// Expected base block reward for this height (from the halving schedule).
    pub block_reward: u64,
}

/// Summary of a successfully validated block.
///
/// Returned by [`validate_block`] after all checks pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatedBlock {
    /// Sum of all non-coinbase transaction fees in satoshi.
    pub total_fees: u64,
    /// Total value of all coinbase outputs in satoshi.
    pub coinbase_value: u64,
}

/// Check whether a block's proof-of-storage answer satisfies its own
/// claimed difficulty and is internally consistent.
///
/// Per §4.3, a match requires
/// `u64::from_le_bytes(SHAKE128(challenge_seed || identifier)[..8]) <=
/// difficulty_target`, where `identifier` is the farmer public key's
/// 16-byte SHAKE128 identifier. This also checks that `farmer_address` and
/// `challenge` (the identifier, zero-padded into a `Hash256`) are both
/// consistent with `farmer_pubkey` — the header's two commitments to the
/// key actually used.
pub fn check_proof_of_storage(block: &Block) -> Result<(), BlockError> {
    let header = &block.header;

    let pubkey = PublicKey::from_bytes(&header.farmer_pubkey)
        .map_err(|_| BlockError::InvalidFarmerSignature)?;

    if header.farmer_address != Address::from_public_key(&pubkey) {
        return Err(BlockError::InvalidFarmerSignature);
    }

    let identifier = pubkey.identifier_hash();
    let mut expected_challenge = [0u8; 32];
    expected_challenge[..16].copy_from_slice(&identifier);
    if header.challenge.as_bytes() != &expected_challenge {
        return Err(BlockError::InvalidFarmerSignature);
    }

    let digest = crypto::shake128_challenge_digest(header.challenge_seed.as_bytes(), &identifier);
    let prefix = u64::from_le_bytes(digest);
    if prefix > header.difficulty_target {
        return Err(BlockError::InvalidProof(
            "identifier does not satisfy difficulty_target".into(),
        ));
    }

    pubkey
        .verify(header.challenge_seed.as_ref(), &header.proof)
        .map_err(|_| BlockError::InvalidFarmerSignature)?;

    let expected_proof_hash = Hash256(Sha256::digest(&header.proof).into());
    if header.proof_hash != expected_proof_hash {
        return Err(BlockError::InvalidFarmerSignature);
    }

    Ok(())
}

/// Validate block structure (context-free).
///
/// Checks:
/// - At least one transaction (the coinbase)
/// - First transaction is coinbase, no others are
/// - No duplicate transaction hashes
/// - `tx_count` and `transactions_hash` in the header match the envelopes
/// - Merkle root in header matches the computed root
/// - Block serialized size is within [`MAX_BLOCK_SIZE`]
/// - The proof-of-storage commitment is internally consistent
/// - All transaction envelopes pass structural validation
pub fn validate_block_structure(block: &Block) -> Result<(), BlockError> {
    if block.transactions.is_empty() {
        return Err(BlockError::NoCoinbase);
    }

    if !block.transactions[0].is_coinbase() {
        return Err(BlockError::FirstTxNotCoinbase);
    }

    for (i, tx) in block.transactions.iter().enumerate().skip(1) {
        if tx.is_coinbase() {
            return Err(BlockError::MultipleCoinbase);
        }
        validation::validate_envelope_structure(tx).map_err(|e| BlockError::TransactionError {
            index: i,
            source: e,
        })?;
    }

    validation::validate_envelope_structure(&block.transactions[0]).map_err(|e| {
        BlockError::TransactionError {
            index: 0,
            source: e,
        }
    })?;

    let mut seen = HashSet::with_capacity(block.transactions.len());
    let mut hashes = Vec::with_capacity(block.transactions.len());
    for (i, tx) in block.transactions.iter().enumerate() {
        if !seen.insert(tx.tx_hash) {
            return Err(BlockError::DuplicateTxHash(tx.tx_hash.to_string()));
        }
        hashes.push(tx.tx_hash);
        let _ = i;
    }

    if block.tx_count as usize != block.transactions.len() {
        return Err(BlockError::InvalidTransactionsHash);
    }
    let computed_tx_hash = merkle::merkle_root(&hashes);
    if block.transactions_hash != computed_tx_hash {
        return Err(BlockError::InvalidTransactionsHash);
    }

    let computed_root = merkle::merkle_root(&hashes);
    if block.header.merkle_root != computed_root {
        return Err(BlockError::InvalidMerkleRoot);
    }

    let encoded = bincode::encode_to_vec(block, bincode::config::standard()).map_err(|e| {
        BlockError::TransactionError {
            index: 0,
            source: TransactionError::Serialization(e.to_string()),
        }
    })?;
    if encoded.len() > MAX_BLOCK_SIZE {
        return Err(BlockError::OversizedBlock {
            size: encoded.len(),
            max: MAX_BLOCK_SIZE,
        });
    }

    check_proof_of_storage(block)?;

    Ok(())
}

/// Validate a block against the chain state (contextual).
///
/// Performs structural validation, then:
/// - Verifies `prev_hash` matches the expected parent, and `height` matches
/// - Verifies `difficulty_target` matches the expected difficulty
/// - Verifies the timestamp is after the parent and not too far in the future
/// - Validates all non-coinbase transactions contextually (signatures,
///   ownership, UTXOs, maturity, fees)
/// - Detects double-spending across transactions within the block
/// - Verifies the coinbase reward does not exceed `block_reward + total_fees`
///
/// Returns a [`ValidatedBlock`] with the computed fees and coinbase value on
/// success. The `get_utxo` function looks up UTXOs from the state **before**
/// this block — intra-block spending (spending an output created earlier in
/// the same block) is not permitted.
pub fn validate_block<F>(
    block: &Block,
    context: &BlockContext,
    get_utxo: F,
) -> Result<ValidatedBlock, BlockError>
where
    F: Fn(&OutPoint) -> Option<UtxoEntry>,
{
    validate_block_structure(block)?;

    if block.header.prev_hash != context.prev_hash {
        return Err(BlockError::InvalidPrevHash);
    }

    if block.header.height != context.height {
        return Err(BlockError::InvalidHeight {
            got: block.header.height,
            expected: context.height,
        });
    }

    if block.header.difficulty_target != context.expected_difficulty {
        return Err(BlockError::InvalidProof(format!(
            "difficulty_target {} != expected {}",
            block.header.difficulty_target, context.expected_difficulty
        )));
    }

    if block.header.timestamp <= context.prev_timestamp {
        return Err(BlockError::TimestampNotAfterParent);
    }
    let max_time = context.current_time.saturating_add(MAX_FUTURE_BLOCK_TIME);
    if block.header.timestamp > max_time {
        return Err(BlockError::TimestampTooFar(block.header.timestamp));
    }

    let mut block_spent = HashSet::new();
    let mut total_fees: u64 = 0;

    for (i, tx) in block.transactions.iter().enumerate().skip(1) {
        for input in &tx.raw_tx.inputs {
            if !block_spent.insert(input.previous_output.clone()) {
                return Err(BlockError::DoubleSpend(
                    input.previous_output.to_string(),
                ));
            }
        }

        let validated = validation::validate_transaction(
            tx,
            &get_utxo,
            context.height,
            context.current_time,
        )
        .map_err(|e| BlockError::TransactionError {
            index: i,
            source: e,
        })?;

        total_fees =
            total_fees
                .checked_add(validated.fee)
                .ok_or(BlockError::TransactionError {
                    index: i,
                    source: TransactionError::ValueOverflow,
                })?;
    }

    let coinbase = &block.transactions[0];
    let coinbase_value =
        coinbase
            .raw_tx
            .total_output_value()
            .ok_or(BlockError::TransactionError {
                index: 0,
                source: TransactionError::ValueOverflow,
            })?;

    let max_reward =
        context
            .block_reward
            .checked_add(total_fees)
            .ok_or(BlockError::TransactionError {
                index: 0,
                source: TransactionError::ValueOverflow,
            })?;

    if coinbase_value > max_reward {
        return Err(BlockError::InvalidReward {
            got: coinbase_value,
            max: max_reward,
        });
    }

    Ok(ValidatedBlock {
        total_fees,
        coinbase_value,
    })
}
