//! Mempool of admitted, not-yet-committed transactions (§4.6).
//!
//! Ordering is descending fee-per-byte, ties broken by ascending arrival
//! time (S5). The pool evicts the lowest fee-per-byte entry once `MAX_COUNT`
//! is exceeded, and expires entries whose arrival is older than `TTL` or
//! whose `not_until` reaches too far into the future.
//!
//! `admit` is the only entry point that inserts a transaction: it runs
//! [`crate::validation::validate_transaction`] against the caller's UTXO
//! view before touching any mempool state, so a rejected transaction never
//! appears in the indices below.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::address::Address;
use crate::constants::{MEMPOOL_MAX_BYTES, MEMPOOL_MAX_COUNT, MEMPOOL_MAX_FUTURE_SECONDS, MEMPOOL_TTL_SECONDS};
use crate::error::MempoolError;
use crate::types::{Block, Hash256, OutPoint, TxEnvelope, UtxoEntry};
use crate::validation;

/// A transaction held in the mempool, with the bookkeeping needed for
/// ordering, eviction, and expiry.
#[derive(Debug, Clone)]
pub struct MempoolEntry {
    pub envelope: TxEnvelope,
    /// Fee in satoshi, computed at admission time.
    pub fee: u64,
    /// Serialized size in bytes of `raw_tx`, used for fee-per-byte ordering.
    pub size: usize,
    /// Monotonic arrival sequence, used as the tie-break for equal fee rate
    /// and as the basis for TTL expiry.
    pub arrival_seq: u64,
    /// Wall-clock arrival time, in Unix seconds.
    pub arrival_time: u64,
    /// Address of the envelope's signer (owner of at least one spent input).
    pub signer_address: Address,
}

impl MempoolEntry {
    /// Fee-per-byte, in satoshi, rounded down. Used only for display; the
    /// pool orders by the exact `fee * PRECISION / size` ratio internally
    /// to avoid losing precision on small transactions.
    pub fn fee_per_byte(&self) -> u64 {
        if self.size == 0 {
            return self.fee;
        }
        self.fee / self.size as u64
    }
}

/// Precision multiplier for the ordering key, so that sub-satoshi-per-byte
/// differences still order correctly.
const FEE_RATE_PRECISION: u128 = 1_000_000;

fn fee_rate_key(fee: u64, size: usize) -> u128 {
    if size == 0 {
        return u128::MAX;
    }
    (fee as u128) * FEE_RATE_PRECISION / size as u128
}

/// In-memory pool of admitted transactions awaiting block inclusion.
///
/// Not thread-safe by itself; §4.6/§5 expect callers to guard it with a
/// reader-writer lock (`admit`/`select` share, `reconcile` is exclusive).
pub struct Mempool {
    entries: HashMap<Hash256, MempoolEntry>,
    by_outpoint: HashMap<OutPoint, Hash256>,
    /// Ordering index: `(fee_rate_key, arrival_seq, tx_hash)`. Ascending
    /// order puts the lowest-priority entry first (for eviction); iterating
    /// in reverse yields highest-fee-first with ties broken by earliest
    /// arrival, since a smaller `arrival_seq` sorts first within equal
    /// fee-rate buckets even when read in reverse only after we negate it
    /// — see [`Mempool::order_key`].
    by_priority: BTreeSet<(u128, i64, Hash256)>,
    /// Per-address nonces already admitted, to reject exact replays.
    nonces_by_address: HashMap<[u8; 20], HashSet<u64>>,
    max_count: usize,
    max_bytes: usize,
    total_bytes: usize,
    next_arrival_seq: u64,
}

impl Default for Mempool {
    fn default() -> Self {
        Self::new(MEMPOOL_MAX_COUNT, MEMPOOL_MAX_BYTES)
    }
}

impl Mempool {
    pub fn new(max_count: usize, max_bytes: usize) -> Self {
        Self {
            entries: HashMap::new(),
            by_outpoint: HashMap::new(),
            by_priority: BTreeSet::new(),
            nonces_by_address: HashMap::new(),
            max_count,
            max_bytes,
            total_bytes: 0,
            next_arrival_seq: 0,
        }
    }

    /// `(fee_rate_key, -arrival_seq, tx_hash)`: within equal fee rate,
    /// negating `arrival_seq` means the *earliest* arrival has the
    /// *largest* key, so reverse iteration (`select`) still yields earliest
    /// first, while ascending iteration (`evict`) still finds the true
    /// lowest-priority entry first.
    fn order_key(fee_rate: u128, arrival_seq: u64, tx_hash: Hash256) -> (u128, i64, Hash256) {
        (fee_rate, -(arrival_seq as i64), tx_hash)
    }

    /// Admit a transaction envelope into the pool (§4.6).
    ///
    /// Runs full contextual validation using `get_utxo` and `current_height`
    /// against `now`, then applies mempool-specific rules: rejects an
    /// already-seen `(signer, nonce)` pair, expiry-at-admission for a
    /// `not_until` too far in the future, and soft-cap eviction.
    pub fn admit<F>(
        &mut self,
        envelope: TxEnvelope,
        get_utxo: F,
        current_height: u64,
        now: u64,
    ) -> Result<Hash256, MempoolError>
    where
        F: Fn(&OutPoint) -> Option<UtxoEntry>,
    {
        if envelope.raw_tx.not_until > now.saturating_add(MEMPOOL_MAX_FUTURE_SECONDS) {
            return Err(MempoolError::Rejected(
                crate::error::TransactionError::NotYetValid {
                    not_until: envelope.raw_tx.not_until,
                    now,
                },
            ));
        }

        let tx_hash = envelope.tx_hash;
        if self.entries.contains_key(&tx_hash) {
            return Err(MempoolError::AlreadyExists(tx_hash.to_string()));
        }

        for input in &envelope.raw_tx.inputs {
            if let Some(existing) = self.by_outpoint.get(&input.previous_output) {
                return Err(MempoolError::Conflict {
                    existing: existing.to_string(),
                    outpoint: input.previous_output.to_string(),
                });
            }
        }

        let validated = validation::validate_transaction(&envelope, &get_utxo, current_height, now)?;

        let signer = crate::crypto::PublicKey::from_bytes(&envelope.signer_pubkey)
            .map_err(|_| MempoolError::Rejected(crate::error::TransactionError::BadSignature { index: 0 }))?;
        let signer_hash = signer.address_hash();
        let nonce = envelope.raw_tx.nonce;
        let seen_nonces = self.nonces_by_address.entry(signer_hash).or_default();
        if seen_nonces.contains(&nonce) {
            return Err(MempoolError::Conflict {
                existing: format!("{}:{}", hex::encode(signer_hash), nonce),
                outpoint: "nonce-replay".into(),
            });
        }

        let size = envelope.raw_tx.canonical_bytes().map(|b| b.len()).unwrap_or(0);
        let fee_rate = fee_rate_key(validated.fee, size);

        self.evict_for_capacity(size, fee_rate)?;

        let arrival_seq = self.next_arrival_seq;
        self.next_arrival_seq += 1;

        for input in &envelope.raw_tx.inputs {
            self.by_outpoint.insert(input.previous_output.clone(), tx_hash);
        }
        self.nonces_by_address
            .entry(signer_hash)
            .or_default()
            .insert(nonce);
        self.by_priority
            .insert(Self::order_key(fee_rate, arrival_seq, tx_hash));
        self.total_bytes += size;
        self.entries.insert(
            tx_hash,
            MempoolEntry {
                envelope,
                fee: validated.fee,
                size,
                arrival_seq,
                arrival_time: now,
                signer_address: Address::standard(signer_hash),
            },
        );

        Ok(tx_hash)
    }

    /// Evict lowest-priority entries until `additional_bytes` plus one more
    /// slot fit under the soft caps, or fail if the incoming transaction's
    /// fee rate is not high enough to justify evicting anything.
    fn evict_for_capacity(&mut self, additional_bytes: usize, incoming_rate: u128) -> Result<(), MempoolError> {
        while (self.entries.len() >= self.max_count || self.total_bytes + additional_bytes > self.max_bytes)
            && !self.entries.is_empty()
        {
            let Some(&(lowest_rate, _, lowest_hash)) = self.by_priority.iter().next() else {
                break;
            };
            if lowest_rate >= incoming_rate {
                return Err(MempoolError::PoolFull);
            }
            self.remove_entry(lowest_hash);
        }
        if self.entries.len() >= self.max_count || self.total_bytes + additional_bytes > self.max_bytes {
            return Err(MempoolError::PoolFull);
        }
        Ok(())
    }

    fn remove_entry(&mut self, tx_hash: Hash256) -> Option<MempoolEntry> {
        let entry = self.entries.remove(&tx_hash)?;
        for input in &entry.envelope.raw_tx.inputs {
            self.by_outpoint.remove(&input.previous_output);
        }
        let rate = fee_rate_key(entry.fee, entry.size);
        self.by_priority
            .remove(&Self::order_key(rate, entry.arrival_seq, tx_hash));
        self.total_bytes -= entry.size;
        if let Ok(signer) = crate::crypto::PublicKey::from_bytes(&entry.envelope.signer_pubkey) {
            if let Some(nonces) = self.nonces_by_address.get_mut(&signer.address_hash()) {
                nonces.remove(&entry.envelope.raw_tx.nonce);
            }
        }
        Some(entry)
    }

    /// Expire entries older than `TTL` or whose `not_until` has drifted
    /// more than `TTL` into the future relative to `now` (R.e. mempool
    /// churn keeps pace with wall-clock time even with no new blocks).
    pub fn expire(&mut self, now: u64) -> Vec<Hash256> {
        let stale: Vec<Hash256> = self
            .entries
            .values()
            .filter(|e| {
                now.saturating_sub(e.arrival_time) > MEMPOOL_TTL_SECONDS
                    || e.envelope.raw_tx.not_until > now.saturating_add(MEMPOOL_MAX_FUTURE_SECONDS)
            })
            .map(|e| e.envelope.tx_hash)
            .collect();
        for hash in &stale {
            self.remove_entry(*hash);
        }
        stale
    }

    /// Select an ordered batch for the miner: highest fee-per-byte first,
    /// ties broken by earliest arrival (S5), bounded by both a byte budget
    /// and a transaction count.
    pub fn select(&self, max_bytes: usize, max_count: usize) -> Vec<TxEnvelope> {
        let mut selected = Vec::new();
        let mut remaining = max_bytes;

        for &(_, _, tx_hash) in self.by_priority.iter().rev() {
            if selected.len() >= max_count {
                break;
            }
            let Some(entry) = self.entries.get(&tx_hash) else {
                continue;
            };
            if entry.size > remaining {
                continue;
            }
            remaining -= entry.size;
            selected.push(entry.envelope.clone());
        }

        selected
    }

    /// Remove transactions confirmed by `block`, plus any pool transaction
    /// whose input is now spent by one of `block`'s transactions (§4.6).
    pub fn reconcile(&mut self, block: &Block) {
        let mut confirmed = Vec::new();
        let mut spent = HashSet::new();

        for tx in &block.transactions {
            confirmed.push(tx.tx_hash);
            for input in &tx.raw_tx.inputs {
                if !input.previous_output.is_null() {
                    spent.insert(input.previous_output.clone());
                }
            }
        }

        for hash in confirmed {
            self.remove_entry(hash);
        }

        let conflicting: Vec<Hash256> = spent
            .iter()
            .filter_map(|op| self.by_outpoint.get(op).copied())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        for hash in conflicting {
            self.remove_entry(hash);
        }
    }

    pub fn contains(&self, tx_hash: &Hash256) -> bool {
        self.entries.contains_key(tx_hash)
    }

    pub fn get(&self, tx_hash: &Hash256) -> Option<&MempoolEntry> {
        self.entries.get(tx_hash)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn max_count(&self) -> usize {
        self.max_count
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }
}
