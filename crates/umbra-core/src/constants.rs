//! Protocol constants. All monetary values in satoshi (1 UMBRA = 10^8 satoshi).

pub const COIN: u64 = 100_000_000;

/// Default initial block reward: 5 x 10^8 satoshi.
pub const DEFAULT_INITIAL_REWARD: u64 = 5 * COIN;
/// Default halving interval, in blocks.
pub const DEFAULT_HALVING_INTERVAL: u64 = 210_000;
/// Reward is zero after this many halvings, regardless of initial reward.
pub const MAX_HALVINGS: u32 = 64;

pub const DEFAULT_BLOCK_TARGET_SECONDS: u64 = 600;
pub const DEFAULT_RETARGET_INTERVAL: u64 = 2016;
/// Clamp bounds applied to each retarget's ratio of old to new difficulty.
pub const RETARGET_MIN_RATIO: f64 = 0.25;
pub const RETARGET_MAX_RATIO: f64 = 4.0;

pub const MAGIC_BYTES: [u8; 4] = [0x55, 0x4D, 0x42, 0x52]; // "UMBR"

/// Minimum transaction fee, in satoshi: 0.011 UMBRA.
pub const DEFAULT_MIN_FEE_SATOSHI: u64 = 1_100_000;

pub const MAX_BLOCK_SIZE: usize = 1_048_576;
pub const MAX_TX_SIZE: usize = 100_000;
pub const MAX_INPUTS: usize = 1_000;
pub const MAX_OUTPUTS: usize = 1_000;
pub const MAX_TOKEN_OPS: usize = 32;
pub const MAX_TOKEN_OP_SIZE: usize = 2_048;
/// Maximum size of a coinbase input's free-form `coinbase_data` field.
pub const MAX_COINBASE_DATA: usize = 100;
pub const COINBASE_MATURITY: u64 = 100;
pub const MAX_FUTURE_BLOCK_TIME: u64 = 2 * DEFAULT_BLOCK_TARGET_SECONDS;

/// Allowed clock skew for a transaction's `not_until` field, in seconds.
pub const MAX_CLOCK_SKEW_SECONDS: u64 = 120;

/// Mempool soft cap on transaction count.
pub const MEMPOOL_MAX_COUNT: usize = 5_000;
/// Mempool soft cap on total bytes.
pub const MEMPOOL_MAX_BYTES: usize = 256 * 1024 * 1024;
/// Mempool entry time-to-live, in seconds (24h).
pub const MEMPOOL_TTL_SECONDS: u64 = 24 * 60 * 60;
/// Transactions whose `not_until` is further than this into the future are
/// rejected from the mempool outright.
pub const MEMPOOL_MAX_FUTURE_SECONDS: u64 = 24 * 60 * 60;

/// Miner `solve` timeout: `min(target_interval / 2, MINER_SOLVE_TIMEOUT_CAP_SECONDS)`.
pub const MINER_SOLVE_TIMEOUT_CAP_SECONDS: u64 = 300;
/// Per-event budget for handling a peer-sourced block or chain in the
/// consensus dispatcher, in seconds.
pub const PEER_EVENT_BUDGET_SECONDS: u64 = 10;

pub const DEFAULT_RPC_PORT: u16 = 28332;
pub const DEFAULT_P2P_PORT: u16 = 28333;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_bytes_spell_umbr() {
        assert_eq!(&MAGIC_BYTES, b"UMBR");
    }

    #[test]
    fn retarget_clamp_bounds_are_reciprocal() {
        assert_eq!(RETARGET_MIN_RATIO, 1.0 / RETARGET_MAX_RATIO);
    }

    #[test]
    fn min_fee_matches_spec_example() {
        assert_eq!(DEFAULT_MIN_FEE_SATOSHI, 1_100_000);
    }
}
