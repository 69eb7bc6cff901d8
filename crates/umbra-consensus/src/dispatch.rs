//! Serial consensus event dispatcher (§4.8).
//!
//! Candidate blocks — whether mined locally or received from a peer — all
//! funnel through [`ConsensusLoop::dispatch`], which validates a block
//! against the connected chain state before accepting it, reconciles the
//! mempool against anything newly confirmed, and penalizes the source peer
//! on rejection. Multi-block peer chains are handled as a reorg: the common
//! ancestor is located, the current tip is unwound to it, and the new
//! blocks are connected in order, with a rollback to the original tip if
//! any of them fails validation partway through.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};

use umbra_core::block_validation::{self, BlockContext};
use umbra_core::chain_state::{ChainStore, ConnectBlockResult};
use umbra_core::constants::PEER_EVENT_BUDGET_SECONDS;
use umbra_core::difficulty::{is_retarget_height, target_for_height};
use umbra_core::error::{BlockError, ConsensusError, UmbraError};
use umbra_core::mempool::Mempool;
use umbra_core::reward::RewardSchedule;
use umbra_core::traits::{Clock, PeerIngress};
use umbra_core::types::Block;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Block(#[from] BlockError),
    #[error(transparent)]
    Chain(#[from] UmbraError),
    #[error(transparent)]
    Consensus(#[from] ConsensusError),
    #[error("peer chain was empty")]
    EmptyChain,
}

/// A candidate block (or chain of blocks) awaiting acceptance.
#[derive(Debug, Clone)]
pub enum ConsensusEvent {
    /// A block produced by this node's own [`crate::miner::Miner`].
    LocalCandidate(Block),
    /// A single block announced by a peer, expected to extend the tip.
    PeerBlock { block: Block, peer_id: String },
    /// A run of blocks from a peer, used to resolve a fork. Must extend
    /// some already-connected ancestor and must be strictly taller than
    /// the current tip once applied.
    PeerChain { blocks: Vec<Block>, peer_id: String },
}

/// Parameters used to recompute per-height context while dispatching.
#[derive(Debug, Clone, Copy)]
pub struct ChainParams {
    pub retarget_interval: u64,
    pub target_interval_seconds: u64,
}

/// Serial validator/acceptor for candidate blocks.
pub struct ConsensusLoop {
    chain: Arc<RwLock<Box<dyn ChainStore>>>,
    mempool: Arc<Mutex<Mempool>>,
    peer_ingress: Arc<dyn PeerIngress>,
    clock: Arc<dyn Clock>,
    reward_schedule: RewardSchedule,
    params: ChainParams,
}

impl ConsensusLoop {
    pub fn new(
        chain: Arc<RwLock<Box<dyn ChainStore>>>,
        mempool: Arc<Mutex<Mempool>>,
        peer_ingress: Arc<dyn PeerIngress>,
        clock: Arc<dyn Clock>,
        params: ChainParams,
    ) -> Self {
        Self {
            chain,
            mempool,
            peer_ingress,
            clock,
            reward_schedule: RewardSchedule::default(),
            params,
        }
    }

    pub fn with_reward_schedule(mut self, schedule: RewardSchedule) -> Self {
        self.reward_schedule = schedule;
        self
    }

    /// Consume events from `events` until `shutdown` fires, dispatching
    /// each in turn and logging (but not panicking on) rejections.
    pub async fn run(
        &self,
        mut events: mpsc::Receiver<ConsensusEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
                event = events.recv() => {
                    let Some(event) = event else { return };
                    let started = Instant::now();
                    if let Err(err) = self.dispatch(event) {
                        tracing::warn!(error = %err, "consensus event rejected");
                    }
                    let elapsed = started.elapsed().as_secs();
                    if elapsed > PEER_EVENT_BUDGET_SECONDS {
                        tracing::warn!(elapsed, budget = PEER_EVENT_BUDGET_SECONDS, "consensus event exceeded budget");
                    }
                }
            }
        }
    }

    /// Validate and, on success, connect `event`'s block(s) to the chain,
    /// reconciling the mempool afterward.
    pub fn dispatch(&self, event: ConsensusEvent) -> Result<(), DispatchError> {
        match event {
            ConsensusEvent::LocalCandidate(block) => self.accept_single(&block, None),
            ConsensusEvent::PeerBlock { block, peer_id } => {
                self.accept_single(&block, Some(&peer_id))
            }
            ConsensusEvent::PeerChain { blocks, peer_id } => {
                self.accept_chain(&blocks, &peer_id)
            }
        }
    }

    /// Validate and connect one block against the current tip, assuming it
    /// extends it directly (no reorg).
    fn accept_single(&self, block: &Block, peer_id: Option<&str>) -> Result<(), DispatchError> {
        let mut chain = self.chain.write();
        let result = Self::validate_and_connect(chain.as_mut(), &self.reward_schedule, self.params, self.clock.as_ref(), block);
        match result {
            Ok(_) => {
                drop(chain);
                self.mempool.lock().reconcile(block);
                Ok(())
            }
            Err(err) => {
                if let Some(peer_id) = peer_id {
                    self.peer_ingress.penalize(peer_id, &err.to_string());
                }
                Err(err)
            }
        }
    }

    fn validate_and_connect(
        chain: &mut dyn ChainStore,
        reward_schedule: &RewardSchedule,
        params: ChainParams,
        clock: &dyn Clock,
        block: &Block,
    ) -> Result<ConnectBlockResult, DispatchError> {
        let (tip_height, tip_hash) = chain.chain_tip()?;
        let tip_header = chain
            .get_block_header(&tip_hash)?
            .ok_or(ConsensusError::UnknownBranch)?;
        let next_height = tip_height + 1;
        let prev_target = tip_header.difficulty_target;

        let expected_difficulty = if is_retarget_height(next_height, params.retarget_interval) {
            let window_start_height = next_height.saturating_sub(params.retarget_interval);
            let window_start_hash = chain
                .get_block_hash(window_start_height)?
                .ok_or(ConsensusError::UnknownBranch)?;
            let window_start_header = chain
                .get_block_header(&window_start_hash)?
                .ok_or(ConsensusError::UnknownBranch)?;
            target_for_height(
                next_height,
                params.retarget_interval,
                prev_target,
                window_start_header.timestamp,
                tip_header.timestamp,
                params.target_interval_seconds,
            )
        } else {
            target_for_height(
                next_height,
                params.retarget_interval,
                prev_target,
                0,
                0,
                params.target_interval_seconds,
            )
        };

        let context = BlockContext {
            height: next_height,
            prev_hash: tip_hash,
            prev_timestamp: tip_header.timestamp,
            expected_difficulty,
            current_time: clock.now(),
            block_reward: reward_schedule.block_reward(next_height),
        };

        block_validation::validate_block(block, &context, |op| {
            chain.get_utxo(op).ok().flatten()
        })?;

        Ok(chain.connect_block(block, context.height)?)
    }

    /// Resolve a fork: locate the common ancestor of `blocks`, unwind the
    /// current tip to it, and connect `blocks` in order. Rolls back to the
    /// original tip if any block in the chain fails to validate or if the
    /// resulting tip would not be strictly taller than the original.
    fn accept_chain(&self, blocks: &[Block], peer_id: &str) -> Result<(), DispatchError> {
        if blocks.is_empty() {
            return Err(DispatchError::EmptyChain);
        }

        let mut chain = self.chain.write();

        let ancestor_hash = blocks[0].header.prev_hash;
        let ancestor_header = chain
            .get_block_header(&ancestor_hash)?
            .ok_or(ConsensusError::UnknownBranch)?;
        let ancestor_height = ancestor_header.height;

        let (current_tip_height, _) = chain.chain_tip()?;
        let new_tip_height = ancestor_height + blocks.len() as u64;
        if new_tip_height <= current_tip_height {
            let err = DispatchError::Consensus(ConsensusError::NotStrictlyTaller);
            self.peer_ingress.penalize(peer_id, &err.to_string());
            return Err(err);
        }

        // Save the blocks we're about to unwind so we can restore them on
        // failure; walked tip-to-ancestor, then reversed to replay oldest first.
        let mut saved = Vec::new();
        {
            let mut height = current_tip_height;
            while height > ancestor_height {
                let hash = chain
                    .get_block_hash(height)?
                    .ok_or(ConsensusError::UnknownBranch)?;
                let saved_block = chain.get_block(&hash)?.ok_or(ConsensusError::UnknownBranch)?;
                saved.push(saved_block);
                height -= 1;
            }
        }
        saved.reverse();

        let mut unwound = 0usize;
        while chain.chain_tip()?.0 > ancestor_height {
            chain.disconnect_tip()?;
            unwound += 1;
        }

        let mut connected = 0usize;
        let mut failure = None;
        for block in blocks {
            match Self::validate_and_connect(
                chain.as_mut(),
                &self.reward_schedule,
                self.params,
                self.clock.as_ref(),
                block,
            ) {
                Ok(_) => connected += 1,
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }

        if let Some(err) = failure {
            // Roll back: unwind whatever of the new chain connected, then
            // replay the original blocks to restore the prior tip exactly.
            for _ in 0..connected {
                chain.disconnect_tip()?;
            }
            for block in &saved {
                Self::validate_and_connect(
                    chain.as_mut(),
                    &self.reward_schedule,
                    self.params,
                    self.clock.as_ref(),
                    block,
                )?;
            }
            let _ = unwound;
            self.peer_ingress.penalize(peer_id, &err.to_string());
            return Err(err);
        }

        drop(chain);
        let mut pool = self.mempool.lock();
        for block in blocks {
            pool.reconcile(block);
        }
        Ok(())
    }
}
