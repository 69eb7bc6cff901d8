//! Core protocol types: transactions, envelopes, blocks, UTXOs.
//!
//! All monetary values are in satoshi (1 UMBRA = 10^8 satoshi).
//! All numeric fields use u64 per protocol convention.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::address::Address;
use crate::error::TransactionError;

/// A 32-byte hash value.
///
/// Used for transaction IDs (SHA-256), block header hashes (SHA-256),
/// and merkle roots (BLAKE3).
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The zero hash (32 zero bytes). Used for coinbase previous outpoints.
    pub const ZERO: Self = Self([0u8; 32]);

    /// Create a Hash256 from a byte array.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Return the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Check if this is the zero hash.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Reference to a specific output of a previous transaction.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash,
    bincode::Encode, bincode::Decode,
)]
pub struct OutPoint {
    /// Transaction hash containing the referenced output.
    pub tx_hash: Hash256,
    /// Index of the output within the transaction.
    pub index: u64,
}

impl OutPoint {
    /// The null outpoint, used for coinbase transaction inputs.
    pub fn null() -> Self {
        Self {
            tx_hash: Hash256::ZERO,
            index: u64::MAX,
        }
    }

    /// Check if this is the null outpoint (coinbase marker).
    pub fn is_null(&self) -> bool {
        self.tx_hash.is_zero() && self.index == u64::MAX
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tx_hash, self.index)
    }
}

/// A transaction input, spending a previous output.
///
/// Coinbase inputs carry the null [`OutPoint`] and an empty `coinbase_data`
/// field used for arbitrary miner-chosen bytes (e.g. the genesis message).
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxInput {
    /// The outpoint being spent. Null outpoint for coinbase.
    pub previous_output: OutPoint,
    /// Arbitrary bytes carried by a coinbase input. Empty for regular inputs.
    pub coinbase_data: Vec<u8>,
}

impl TxInput {
    /// A regular (non-coinbase) input spending `previous_output`.
    pub fn spending(previous_output: OutPoint) -> Self {
        Self {
            previous_output,
            coinbase_data: Vec::new(),
        }
    }

    /// A coinbase input carrying `data`.
    pub fn coinbase(data: Vec<u8>) -> Self {
        Self {
            previous_output: OutPoint::null(),
            coinbase_data: data,
        }
    }
}

/// A transaction output, creating a new UTXO.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxOutput {
    /// Value in satoshi.
    pub value: u64,
    /// Destination address.
    pub address: Address,
    /// Opaque script/payload carried alongside the address. The core does
    /// not interpret this beyond size limits; higher layers (wallets,
    /// token logic) may use it.
    pub script_pubkey: Vec<u8>,
}

/// An opaque token/NFT/AMM operation attached to a transaction.
///
/// Per §9, the consensus core validates these only for well-formedness
/// (size bound); their semantics are the concern of an out-of-scope
/// token subsystem.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TokenOp {
    /// Operation kind tag, meaningful only to the out-of-scope token layer.
    pub op_type: u16,
    /// Opaque payload.
    pub payload: Vec<u8>,
}

/// The raw, unsigned body of a transaction.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    /// Protocol version.
    pub version: u64,
    /// Inputs consuming previous outputs. Exactly one null-outpoint input
    /// for a coinbase transaction.
    pub inputs: Vec<TxInput>,
    /// New outputs created by this transaction.
    pub outputs: Vec<TxOutput>,
    /// Opaque token/NFT/AMM operations carried alongside the transfer.
    pub token_ops: Vec<TokenOp>,
    /// The transaction is invalid before this unix timestamp.
    pub not_until: u64,
    /// Unix timestamp of authoring, used for mempool TTL bookkeeping.
    pub timestamp: u64,
    /// Per-signer nonce, used by the mempool to order a signer's own
    /// transactions and to detect replays.
    pub nonce: u64,
}

impl Transaction {
    /// Check if this is a coinbase transaction (single input with null outpoint).
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].previous_output.is_null()
    }

    /// Sum of all output values. Returns `None` on overflow.
    pub fn total_output_value(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |acc, out| acc.checked_add(out.value))
    }

    /// Canonical encoding used both for `tx_hash` and for the bytes signed
    /// by a [`TxEnvelope`].
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, TransactionError> {
        bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| TransactionError::Serialization(e.to_string()))
    }

    /// `SHA-256` of the canonical encoding.
    pub fn hash(&self) -> Result<Hash256, TransactionError> {
        let encoded = self.canonical_bytes()?;
        Ok(Hash256(Sha256::digest(&encoded).into()))
    }
}

/// A signed transaction as exchanged between peers and clients.
///
/// Unlike per-input signing schemes, a single signature covers the whole
/// `raw_tx` body: `signature = sign(tx_hash, signer_secret_key)`, where
/// `tx_hash = SHA-256(bincode(raw_tx))`. Coinbase envelopes carry an empty
/// signature and a zeroed `signer_pubkey` (the coinbase exemption, §4.5).
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxEnvelope {
    /// The raw, unsigned transaction body.
    pub raw_tx: Transaction,
    /// Detached ML-DSA-87 signature over `tx_hash`. Empty for coinbase.
    pub signature: Vec<u8>,
    /// `SHA-256` of the canonical `raw_tx` encoding.
    pub tx_hash: Hash256,
    /// Raw ML-DSA-87 public key of the signer. Empty for coinbase.
    pub signer_pubkey: Vec<u8>,
    /// Signature algorithm identifier. Always `"ml-dsa-3"` (§6).
    pub algorithm: String,
}

impl TxEnvelope {
    /// Build an envelope, computing `tx_hash` from `raw_tx`.
    pub fn new(
        raw_tx: Transaction,
        signature: Vec<u8>,
        signer_pubkey: Vec<u8>,
    ) -> Result<Self, TransactionError> {
        let tx_hash = raw_tx.hash()?;
        Ok(Self {
            raw_tx,
            signature,
            tx_hash,
            signer_pubkey,
            algorithm: crate::crypto::ALGORITHM_ID.to_string(),
        })
    }

    /// Build the envelope for a coinbase transaction (no signature).
    pub fn new_coinbase(raw_tx: Transaction) -> Result<Self, TransactionError> {
        Self::new(raw_tx, Vec::new(), Vec::new())
    }

    /// Whether the recomputed hash of `raw_tx` matches `tx_hash`.
    pub fn hash_matches(&self) -> bool {
        matches!(self.raw_tx.hash(), Ok(h) if h == self.tx_hash)
    }

    pub fn is_coinbase(&self) -> bool {
        self.raw_tx.is_coinbase()
    }
}

/// Block header binding a proof-of-storage solution to the chain tip.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct BlockHeader {
    /// Protocol version.
    pub version: u64,
    /// Hash of the previous block header.
    pub prev_hash: Hash256,
    /// BLAKE3 merkle root over transaction envelope hashes.
    pub merkle_root: Hash256,
    /// Unix timestamp in seconds.
    pub timestamp: u64,
    /// Block height.
    pub height: u64,
    /// Free-form nonce; also carries a compact retarget-epoch tag.
    pub nonce: u64,
    /// Farming difficulty in force for this block: a threshold such that a
    /// match requires `u64::from_le_bytes(SHAKE128(challenge||identifier)[..8]) <= difficulty_target`.
    /// Bigger values are easier; `u64::MAX` matches any identifier.
    pub difficulty_target: u64,
    /// The 32-byte challenge the farmer answered.
    pub challenge_seed: Hash256,
    /// `SHA-256` of the farmer's proof-of-storage signature, committing to
    /// it without bloating the header hash input.
    pub proof_hash: Hash256,
    /// Address paid the block reward.
    pub farmer_address: Address,
    /// Opaque plot identifier the proof was sourced from (syndicate/pool
    /// bookkeeping lives outside the core; only carried here per §9).
    pub plot_id: Hash256,
    /// The farming identifier (16 bytes, zero-padded to 32) that matched
    /// the challenge at this difficulty.
    pub challenge: Hash256,
    /// Detached ML-DSA-87 signature of the farmer over `challenge_seed`.
    pub proof: Vec<u8>,
    /// Raw ML-DSA-87 public key of the farmer. Excluded from the header
    /// hash like `proof`; committed only via `farmer_address =
    /// address_hash(farmer_pubkey)`, mirroring how `proof_hash` commits to
    /// `proof` without bloating the hashed layout.
    pub farmer_pubkey: Vec<u8>,
}

impl BlockHeader {
    /// Compute the block header hash (double SHA-256 over a fixed layout).
    ///
    /// Layout: version || prev_hash || merkle_root || timestamp || height ||
    /// nonce || difficulty_target || challenge_seed || proof_hash ||
    /// farmer_address.hash || plot_id || challenge, all little-endian.
    /// `proof` itself (the ~4.6KB signature) and `farmer_pubkey` are
    /// deliberately excluded from the hash input, committed only via
    /// `proof_hash` and `farmer_address` respectively.
    pub fn hash(&self) -> Hash256 {
        let mut data = Vec::with_capacity(8 * 6 + 32 * 6 + 20);
        data.extend_from_slice(&self.version.to_le_bytes());
        data.extend_from_slice(self.prev_hash.as_bytes());
        data.extend_from_slice(self.merkle_root.as_bytes());
        data.extend_from_slice(&self.timestamp.to_le_bytes());
        data.extend_from_slice(&self.height.to_le_bytes());
        data.extend_from_slice(&self.nonce.to_le_bytes());
        data.extend_from_slice(&self.difficulty_target.to_le_bytes());
        data.extend_from_slice(self.challenge_seed.as_bytes());
        data.extend_from_slice(self.proof_hash.as_bytes());
        data.extend_from_slice(&self.farmer_address.hash);
        data.extend_from_slice(self.plot_id.as_bytes());
        data.extend_from_slice(self.challenge.as_bytes());
        let first = Sha256::digest(&data);
        Hash256(Sha256::digest(first).into())
    }
}

/// A complete block: header plus transaction envelopes.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Block {
    /// Block header with the proof-of-storage solution.
    pub header: BlockHeader,
    /// Ordered list of transaction envelopes. First must be coinbase.
    pub transactions: Vec<TxEnvelope>,
    /// `transactions.len()`, carried explicitly for quick structural checks.
    pub tx_count: u64,
    /// Root over envelope `tx_hash` values (same construction as
    /// `merkle_root`, kept as a separate field per §3/§4.4).
    pub transactions_hash: Hash256,
}

impl Block {
    /// Get the coinbase transaction envelope, if the block is non-empty.
    pub fn coinbase(&self) -> Option<&TxEnvelope> {
        self.transactions.first()
    }
}

/// An entry in the unspent transaction output set.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct UtxoEntry {
    /// The unspent output.
    pub output: TxOutput,
    /// Height of the block containing this UTXO.
    pub block_height: u64,
    /// Whether this output is from a coinbase transaction.
    pub is_coinbase: bool,
}

impl UtxoEntry {
    /// Check if this UTXO has matured and can be spent.
    ///
    /// Coinbase outputs require [`COINBASE_MATURITY`](crate::constants::COINBASE_MATURITY)
    /// confirmations. Non-coinbase outputs are always mature.
    pub fn is_mature(&self, current_height: u64) -> bool {
        if !self.is_coinbase {
            return true;
        }
        current_height.saturating_sub(self.block_height) >= crate::constants::COINBASE_MATURITY
    }
}
