//! # umbra-consensus — mining loop and consensus dispatcher.
//!
//! Wires `umbra-core`'s validation, difficulty, and reward modules together
//! with a [`umbra_core::chain_state::ChainStore`], a
//! [`umbra_core::mempool::Mempool`], and a
//! [`umbra_core::traits::FarmingIndex`] to produce and accept blocks.
//!
//! [`miner`] implements the farming loop: construct a challenge from the
//! current tip, ask the farming index to solve it, assemble a candidate
//! block from the mempool, and hand it to the dispatcher. [`dispatch`]
//! implements the serial event loop that validates and connects candidate
//! blocks, whether locally mined or peer-sourced, and reconciles the
//! mempool afterward.

pub mod dispatch;
pub mod miner;

pub use dispatch::{ConsensusEvent, ConsensusLoop};
pub use miner::{Miner, MinerConfig};
