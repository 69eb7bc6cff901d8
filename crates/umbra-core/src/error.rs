//! Error types for the Umbra protocol.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid public key size: got {got}, expected {expected}")]
    InvalidPublicKeySize { got: usize, expected: usize },
    #[error("invalid secret key size: got {got}, expected {expected}")]
    InvalidSecretKeySize { got: usize, expected: usize },
    #[error("malformed signature")]
    MalformedSignature,
    #[error("signature verification failed")]
    VerificationFailed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid length: {0}")]
    InvalidLength(usize),
    #[error("invalid tag character: {0}")]
    InvalidTag(char),
    #[error("invalid hex encoding")]
    InvalidHex,
    #[error("invalid checksum")]
    InvalidChecksum,
    #[error("unknown version byte: {0}")]
    UnknownVersion(u8),
}

/// Reason codes for transaction validation failure, one-to-one with §4.5's
/// error taxonomy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("malformed transaction: {0}")]
    MalformedTx(String),
    #[error("bad signature on input {index}")]
    BadSignature { index: usize },
    #[error("not yet valid: not_until {not_until} > now {now}")]
    NotYetValid { not_until: u64, now: u64 },
    #[error("unknown input: {0}")]
    UnknownInput(String),
    #[error("double spend: outpoint {0} spent twice")]
    DoubleSpend(String),
    #[error("underpaid: fee {fee} below minimum {minimum}")]
    Underpaid { fee: u64, minimum: u64 },
    #[error("bad output at index {index}: {reason}")]
    BadOutput { index: usize, reason: String },
    #[error("immature coinbase UTXO at input {index}")]
    ImmatureCoinbase { index: usize },
    #[error("value overflow")]
    ValueOverflow,
    #[error("oversized transaction: {size} > {max}")]
    OversizedTransaction { size: usize, max: usize },
    #[error("serialization error: {0}")]
    Serialization(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockError {
    #[error("invalid proof-of-storage: {0}")]
    InvalidProof(String),
    #[error("invalid prev hash")]
    InvalidPrevHash,
    #[error("timestamp too far in the future: {0}")]
    TimestampTooFar(u64),
    #[error("timestamp not after parent")]
    TimestampNotAfterParent,
    #[error("invalid merkle root")]
    InvalidMerkleRoot,
    #[error("invalid transactions_hash")]
    InvalidTransactionsHash,
    #[error("invalid reward: got {got}, expected at most {max}")]
    InvalidReward { got: u64, max: u64 },
    #[error("oversized block: {size} > {max}")]
    OversizedBlock { size: usize, max: usize },
    #[error("no coinbase")]
    NoCoinbase,
    #[error("first transaction is not coinbase")]
    FirstTxNotCoinbase,
    #[error("multiple coinbase transactions")]
    MultipleCoinbase,
    #[error("duplicate tx_hash: {0}")]
    DuplicateTxHash(String),
    #[error("double spend across transactions: {0}")]
    DoubleSpend(String),
    #[error("invalid height: got {got}, expected {expected}")]
    InvalidHeight { got: u64, expected: u64 },
    #[error("invalid farmer signature")]
    InvalidFarmerSignature,
    #[error("tx error in transaction {index}: {source}")]
    TransactionError {
        index: usize,
        source: TransactionError,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MempoolError {
    #[error("transaction already in pool: {0}")]
    AlreadyExists(String),
    #[error("conflicts with pool tx {existing} on outpoint {outpoint}")]
    Conflict { existing: String, outpoint: String },
    #[error("pool full")]
    PoolFull,
    #[error(transparent)]
    Rejected(#[from] TransactionError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainStateError {
    #[error("empty chain: no blocks connected")]
    EmptyChain,
    #[error("block not found: {0}")]
    BlockNotFound(String),
    #[error("undo data missing for block: {0}")]
    UndoDataMissing(String),
    #[error("height mismatch: expected {expected}, got {got}")]
    HeightMismatch { expected: u64, got: u64 },
    #[error("duplicate block: {0}")]
    DuplicateBlock(String),
    #[error("missing UTXO: {0}")]
    MissingUtxo(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlotError {
    #[error("plot corrupt at offset {offset}: {reason}")]
    Corrupt { offset: u64, reason: String },
    #[error("truncated plot file")]
    Truncated,
    #[error("unsupported plot version: {0}")]
    UnsupportedVersion(i64),
    #[error("invalid k parameter: {0}")]
    InvalidK(i32),
    #[error("io error: {0}")]
    Io(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FarmingError {
    #[error(transparent)]
    Plot(#[from] PlotError),
    #[error("store error: {0}")]
    Store(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(String),
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },
    #[error("io error reading config: {0}")]
    Io(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    #[error("unknown branch: common ancestor not found")]
    UnknownBranch,
    #[error("reorg target is not strictly taller than current tip")]
    NotStrictlyTaller,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimeoutError {
    #[error("miner solve timed out after {0}s")]
    SolveTimeout(u64),
    #[error("peer event exceeded {0}s budget")]
    PeerEventBudget(u64),
}

#[derive(Error, Debug)]
pub enum UmbraError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Address(#[from] AddressError),
    #[error(transparent)]
    Transaction(#[from] TransactionError),
    #[error(transparent)]
    Block(#[from] BlockError),
    #[error(transparent)]
    Mempool(#[from] MempoolError),
    #[error(transparent)]
    ChainState(#[from] ChainStateError),
    #[error(transparent)]
    Plot(#[from] PlotError),
    #[error(transparent)]
    Farming(#[from] FarmingError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Consensus(#[from] ConsensusError),
    #[error(transparent)]
    Timeout(#[from] TimeoutError),
    #[error("storage: {0}")]
    Storage(String),
}
