//! Narrow capability interfaces shared across crates.
//!
//! Per the design notes, variability (farming backend, peer scoring, wall
//! clock) is expressed as capability objects passed into components at
//! construction rather than through deep inheritance or dynamic global
//! state. `umbra-core` only declares the interfaces; concrete
//! implementations live in `umbra-farm`, `umbra-node`, and test helpers.

use crate::address::Address;
use crate::error::FarmingError;
use crate::types::Hash256;

/// A successful answer to a farming challenge (§4.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofOfStorage {
    /// Identifier of the plot file the match was found in.
    pub plot_id: Hash256,
    /// Entry index within that plot.
    pub entry_index: u32,
    /// Raw ML-DSA-87 public key of the matched entry.
    pub public_key: Vec<u8>,
    /// Address derived from `public_key`.
    pub address: Address,
    /// 16-byte farming identifier that matched the challenge.
    pub identifier: [u8; 16],
    /// Detached signature over the 32-byte challenge, produced with the
    /// entry's private key.
    pub signature: Vec<u8>,
}

/// The farming backend a miner asks to answer a challenge.
///
/// Implemented by `umbra_farm::FarmingIndex` in production; tests may
/// substitute a fake that returns a canned proof or `None`.
pub trait FarmingIndex: Send + Sync {
    /// Search indexed plots for an identifier matching `challenge` at
    /// `difficulty_target` (§4.3's difficulty rule). Returns `None` if no
    /// loaded plot holds a match.
    fn solve(
        &self,
        challenge: &Hash256,
        difficulty_target: u64,
    ) -> Result<Option<ProofOfStorage>, FarmingError>;
}

/// Wall-clock access, abstracted so validation and the miner loop can be
/// driven by a fixed clock in tests instead of `SystemTime::now()`.
pub trait Clock: Send + Sync {
    /// Current Unix time, in seconds.
    fn now(&self) -> u64;
}

/// The real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// A clock fixed at construction, for deterministic tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub u64);

impl Clock for FixedClock {
    fn now(&self) -> u64 {
        self.0
    }
}

/// Scoring/disconnection feedback for a misbehaving or slow peer.
///
/// §4.8: "a block that fails validation is dropped with a logged reason
/// and a scored penalty against its source". The P2P transport itself is
/// out of scope (§1); this is the narrow seam the consensus loop calls
/// into.
pub trait PeerIngress: Send + Sync {
    /// Record a penalty against `peer_id` for `reason`.
    fn penalize(&self, peer_id: &str, reason: &str);

    /// Disconnect `peer_id`, e.g. after repeated penalties.
    fn disconnect(&self, peer_id: &str);
}

/// A [`PeerIngress`] that records penalties in memory, for tests and for
/// single-node configurations with no real peers.
#[derive(Debug, Default)]
pub struct NullPeerIngress {
    penalties: std::sync::Mutex<Vec<(String, String)>>,
    disconnects: std::sync::Mutex<Vec<String>>,
}

impl NullPeerIngress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn penalties(&self) -> Vec<(String, String)> {
        self.penalties.lock().expect("lock poisoned").clone()
    }

    pub fn disconnected(&self) -> Vec<String> {
        self.disconnects.lock().expect("lock poisoned").clone()
    }
}

impl PeerIngress for NullPeerIngress {
    fn penalize(&self, peer_id: &str, reason: &str) {
        self.penalties
            .lock()
            .expect("lock poisoned")
            .push((peer_id.to_string(), reason.to_string()));
    }

    fn disconnect(&self, peer_id: &str) {
        self.disconnects
            .lock()
            .expect("lock poisoned")
            .push(peer_id.to_string());
    }
}
