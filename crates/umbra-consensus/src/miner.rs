//! Farming loop (§4.7): turn the current chain tip into a challenge, ask a
//! [`FarmingIndex`] to answer it, and assemble a candidate block from the
//! mempool.
//!
//! Mirrors the shape of a RandomX mining loop (construct a header skeleton,
//! search for a match under a deadline, retry with a fresh nonce) but the
//! search itself happens inside the farming index rather than in this loop —
//! `try_mine` makes at most one `solve` call per attempt and varies only the
//! challenge via `epoch_nonce`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, watch};

use umbra_core::address::Address;
use umbra_core::chain_state::ChainStore;
use umbra_core::constants::MINER_SOLVE_TIMEOUT_CAP_SECONDS;
use umbra_core::crypto::KeyPair;
use umbra_core::difficulty::{is_retarget_height, target_for_height};
use umbra_core::error::UmbraError;
use umbra_core::mempool::Mempool;
use umbra_core::merkle;
use umbra_core::reward::RewardSchedule;
use umbra_core::traits::{Clock, FarmingIndex};
use umbra_core::types::{Block, BlockHeader, Hash256, Transaction, TxEnvelope, TxInput, TxOutput};

use crate::dispatch::ConsensusEvent;

#[derive(Debug, thiserror::Error)]
pub enum MinerError {
    #[error(transparent)]
    Farming(#[from] umbra_core::error::FarmingError),
    #[error(transparent)]
    Crypto(#[from] umbra_core::error::CryptoError),
    #[error(transparent)]
    Transaction(#[from] umbra_core::error::TransactionError),
    #[error(transparent)]
    Chain(#[from] UmbraError),
    #[error("chain tip block header missing for hash {0}")]
    MissingTipHeader(Hash256),
    #[error("retarget window start header missing at height {0}")]
    MissingWindowStart(u64),
}

/// Tunables for a [`Miner`] instance, independent of the running chain.
#[derive(Debug, Clone, Copy)]
pub struct MinerConfig {
    pub block_target_seconds: u64,
    pub retarget_interval: u64,
    pub max_block_bytes: usize,
    pub max_block_txs: usize,
}

impl MinerConfig {
    /// The per-attempt solve deadline: `min(target / 2, MINER_SOLVE_TIMEOUT_CAP_SECONDS)`.
    pub fn solve_timeout(&self) -> Duration {
        Duration::from_secs((self.block_target_seconds / 2).min(MINER_SOLVE_TIMEOUT_CAP_SECONDS))
    }
}

/// Chain-derived parameters for the block about to be mined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MiningContext {
    pub height: u64,
    pub prev_hash: Hash256,
    pub prev_timestamp: u64,
    pub difficulty_target: u64,
    pub block_reward: u64,
}

/// Derive the mining context for the next block from the connected chain
/// state, applying the periodic retarget rule (§9 decision: recompute only
/// at `height % retarget_interval == 0`, otherwise carry the parent's
/// target forward unchanged).
pub fn build_mining_context(
    chain: &dyn ChainStore,
    reward_schedule: &RewardSchedule,
    retarget_interval: u64,
    target_interval_secs: u64,
) -> Result<MiningContext, MinerError> {
    let (tip_height, tip_hash) = chain.chain_tip()?;
    let tip_header = chain
        .get_block_header(&tip_hash)?
        .ok_or(MinerError::MissingTipHeader(tip_hash))?;

    let next_height = tip_height + 1;
    let prev_target = tip_header.difficulty_target;

    let difficulty_target = if is_retarget_height(next_height, retarget_interval) {
        let window_start_height = next_height.saturating_sub(retarget_interval);
        let window_start_hash = chain
            .get_block_hash(window_start_height)?
            .ok_or(MinerError::MissingWindowStart(window_start_height))?;
        let window_start_header = chain
            .get_block_header(&window_start_hash)?
            .ok_or(MinerError::MissingWindowStart(window_start_height))?;
        target_for_height(
            next_height,
            retarget_interval,
            prev_target,
            window_start_header.timestamp,
            tip_header.timestamp,
            target_interval_secs,
        )
    } else {
        target_for_height(
            next_height,
            retarget_interval,
            prev_target,
            0,
            0,
            target_interval_secs,
        )
    };

    Ok(MiningContext {
        height: next_height,
        prev_hash: tip_hash,
        prev_timestamp: tip_header.timestamp,
        difficulty_target,
        block_reward: reward_schedule.block_reward(next_height),
    })
}

/// Answers farming challenges and assembles candidate blocks for a single
/// farmer identity.
pub struct Miner {
    farming_index: Arc<dyn FarmingIndex>,
    clock: Arc<dyn Clock>,
    farmer: KeyPair,
    reward_schedule: RewardSchedule,
    config: MinerConfig,
}

impl Miner {
    pub fn new(
        farming_index: Arc<dyn FarmingIndex>,
        clock: Arc<dyn Clock>,
        farmer: KeyPair,
        config: MinerConfig,
    ) -> Self {
        Self {
            farming_index,
            clock,
            farmer,
            reward_schedule: RewardSchedule::default(),
            config,
        }
    }

    pub fn with_reward_schedule(mut self, schedule: RewardSchedule) -> Self {
        self.reward_schedule = schedule;
        self
    }

    pub fn farmer_address(&self) -> Address {
        Address::from_public_key(&self.farmer.public_key())
    }

    /// Challenge seed for `height` atop `prev_hash`, varied by `epoch_nonce`
    /// so repeated attempts against an unchanged tip search different
    /// identifiers rather than retrying the same one.
    fn challenge_seed(&self, prev_hash: &Hash256, height: u64, epoch_nonce: u64) -> Hash256 {
        let mut hasher = Sha256::new();
        hasher.update(prev_hash.as_bytes());
        hasher.update(height.to_le_bytes());
        hasher.update(self.farmer_address().hash);
        hasher.update(epoch_nonce.to_le_bytes());
        Hash256(hasher.finalize().into())
    }

    /// Try once to answer the challenge for `ctx` and, if answered, assemble
    /// a full candidate block from `mempool`. Returns `Ok(None)` if no
    /// loaded plot currently matches — the caller should retry with a fresh
    /// `epoch_nonce` or wait for the tip to move.
    pub fn try_mine(
        &self,
        ctx: &MiningContext,
        mempool: &Mempool,
        epoch_nonce: u64,
    ) -> Result<Option<Block>, MinerError> {
        let now = self.clock.now();
        let seed = self.challenge_seed(&ctx.prev_hash, ctx.height, epoch_nonce);

        let Some(proof) = self.farming_index.solve(&seed, ctx.difficulty_target)? else {
            return Ok(None);
        };

        let mut challenge = [0u8; 32];
        challenge[..16].copy_from_slice(&proof.identifier);

        let selected = mempool.select(self.config.max_block_bytes, self.config.max_block_txs);
        let total_fees: u64 = selected
            .iter()
            .filter_map(|tx| mempool.get(&tx.tx_hash))
            .map(|entry| entry.fee)
            .sum();

        let coinbase_value = ctx.block_reward.saturating_add(total_fees);
        let coinbase_raw = Transaction {
            version: 1,
            inputs: vec![TxInput::coinbase(ctx.height.to_le_bytes().to_vec())],
            outputs: vec![TxOutput {
                value: coinbase_value,
                address: proof.address,
                script_pubkey: Vec::new(),
            }],
            token_ops: Vec::new(),
            not_until: 0,
            timestamp: now,
            nonce: 0,
        };
        let coinbase = TxEnvelope::new_coinbase(coinbase_raw)?;

        let mut transactions = Vec::with_capacity(1 + selected.len());
        transactions.push(coinbase);
        transactions.extend(selected);

        let hashes: Vec<Hash256> = transactions.iter().map(|t| t.tx_hash).collect();
        let root = merkle::merkle_root(&hashes);
        let proof_hash = Hash256(Sha256::digest(&proof.signature).into());

        let header = BlockHeader {
            version: 1,
            prev_hash: ctx.prev_hash,
            merkle_root: root,
            timestamp: now,
            height: ctx.height,
            nonce: epoch_nonce,
            difficulty_target: ctx.difficulty_target,
            challenge_seed: seed,
            proof_hash,
            farmer_address: proof.address,
            plot_id: proof.plot_id,
            challenge: Hash256(challenge),
            proof: proof.signature,
            farmer_pubkey: proof.public_key,
        };

        Ok(Some(Block {
            header,
            tx_count: transactions.len() as u64,
            transactions_hash: root,
            transactions,
        }))
    }

    /// Run the farming loop until `shutdown` is signalled: rebuild the
    /// mining context from the current tip, attempt `try_mine` repeatedly
    /// (bumping `epoch_nonce` each attempt) until either a match is found or
    /// [`MinerConfig::solve_timeout`] elapses, then submit any solved block
    /// as a [`ConsensusEvent::LocalCandidate`] and start over against the
    /// (possibly advanced) tip.
    pub async fn run_loop(
        &self,
        chain: Arc<parking_lot::RwLock<Box<dyn ChainStore>>>,
        mempool: Arc<parking_lot::Mutex<Mempool>>,
        events: mpsc::Sender<ConsensusEvent>,
        mut shutdown: watch::Receiver<bool>,
        retarget_interval: u64,
        block_target_seconds: u64,
    ) {
        loop {
            if *shutdown.borrow() {
                return;
            }

            let ctx = {
                let guard = chain.read();
                build_mining_context(
                    guard.as_ref(),
                    &self.reward_schedule,
                    retarget_interval,
                    block_target_seconds,
                )
            };
            let ctx = match ctx {
                Ok(ctx) => ctx,
                Err(err) => {
                    tracing::warn!(error = %err, "could not build mining context, retrying");
                    if Self::wait_or_shutdown(&mut shutdown, Duration::from_secs(1)).await {
                        return;
                    }
                    continue;
                }
            };

            let deadline = Instant::now() + self.config.solve_timeout();
            let mut solved = None;
            let mut epoch_nonce: u64 = 0;

            while Instant::now() < deadline {
                let attempt = {
                    let pool = mempool.lock();
                    self.try_mine(&ctx, &pool, epoch_nonce)
                };
                match attempt {
                    Ok(Some(block)) => {
                        solved = Some(block);
                        break;
                    }
                    Ok(None) => {}
                    Err(err) => tracing::warn!(error = %err, "farming attempt failed"),
                }
                epoch_nonce = epoch_nonce.wrapping_add(1);
                if Self::wait_or_shutdown(&mut shutdown, Duration::from_millis(50)).await {
                    return;
                }
            }

            if let Some(block) = solved {
                tracing::info!(height = block.header.height, "mined candidate block");
                if events.send(ConsensusEvent::LocalCandidate(block)).await.is_err() {
                    return;
                }
            }
        }
    }

    /// Sleep for `dur` or wake early on a shutdown signal. Returns `true`
    /// if the caller should stop the loop.
    async fn wait_or_shutdown(shutdown: &mut watch::Receiver<bool>, dur: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(dur) => *shutdown.borrow(),
            changed = shutdown.changed() => match changed {
                Ok(()) => *shutdown.borrow(),
                Err(_) => true,
            },
        }
    }
}
