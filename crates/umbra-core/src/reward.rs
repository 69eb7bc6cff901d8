//! Reward schedule and halving logic.
//!
//! The mining reward follows a halving schedule: the base reward starts at
//! [`DEFAULT_INITIAL_REWARD`](crate::constants::DEFAULT_INITIAL_REWARD)
//! (5 UMBRA) and halves every
//! [`DEFAULT_HALVING_INTERVAL`](crate::constants::DEFAULT_HALVING_INTERVAL)
//! (210,000) blocks, reaching zero after
//! [`MAX_HALVINGS`](crate::constants::MAX_HALVINGS) halvings regardless of
//! the configured initial reward (§4.4).
//!
//! Both `initial_reward` and `halving_interval` are configurable per §4.4;
//! the bare `block_reward`/`epoch_reward`/... functions use the network
//! defaults, while the `_with_schedule` variants take them explicitly.

use crate::constants::{DEFAULT_HALVING_INTERVAL, DEFAULT_INITIAL_REWARD, MAX_HALVINGS};

/// A concrete, configured reward schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewardSchedule {
    pub initial_reward: u64,
    pub halving_interval: u64,
}

impl Default for RewardSchedule {
    fn default() -> Self {
        Self {
            initial_reward: DEFAULT_INITIAL_REWARD,
            halving_interval: DEFAULT_HALVING_INTERVAL,
        }
    }
}

impl RewardSchedule {
    pub fn block_reward(&self, height: u64) -> u64 {
        self.epoch_reward(self.halving_epoch(height))
    }

    pub fn epoch_reward(&self, epoch: u64) -> u64 {
        if epoch >= MAX_HALVINGS as u64 {
            return 0;
        }
        self.initial_reward >> epoch
    }

    pub fn halving_epoch(&self, height: u64) -> u64 {
        height / self.halving_interval
    }

    pub fn epoch_start_height(&self, epoch: u64) -> u64 {
        epoch.saturating_mul(self.halving_interval)
    }

    pub fn next_halving_height(&self, height: u64) -> Option<u64> {
        let epoch = self.halving_epoch(height);
        if self.epoch_reward(epoch) == 0 {
            return None;
        }
        Some(self.epoch_start_height(epoch + 1))
    }
}

/// Compute the base mining reward (in satoshi) for a height, using the
/// network-default schedule.
///
/// `reward(h) = DEFAULT_INITIAL_REWARD >> (h / DEFAULT_HALVING_INTERVAL)`,
/// zero after `MAX_HALVINGS` halvings (B3: the halving boundary height
/// `h = n * H` is the first height using the new, halved reward).
pub fn block_reward(height: u64) -> u64 {
    RewardSchedule::default().block_reward(height)
}

/// The mining reward (in satoshi) for a given halving epoch, under the
/// default schedule.
pub fn epoch_reward(epoch: u64) -> u64 {
    RewardSchedule::default().epoch_reward(epoch)
}

/// Which halving epoch a block height falls in, under the default schedule.
pub fn halving_epoch(height: u64) -> u64 {
    RewardSchedule::default().halving_epoch(height)
}

/// The first block height of a given halving epoch, under the default schedule.
pub fn epoch_start_height(epoch: u64) -> u64 {
    RewardSchedule::default().epoch_start_height(epoch)
}

/// The height at which the next halving occurs after `height`, under the
/// default schedule. Returns `None` once the reward has reached zero.
pub fn next_halving_height(height: u64) -> Option<u64> {
    RewardSchedule::default().next_halving_height(height)
}
