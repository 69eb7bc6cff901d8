//! Transaction validation (§4.5).
//!
//! Two levels of validation:
//!
//! - **Structural** ([`validate_envelope_structure`]): context-free checks on
//!   envelope format and internal consistency. No external state required.
//! - **Contextual** ([`validate_transaction`]): UTXO-aware checks including
//!   signature verification, ownership, timing, and value conservation.
//!
//! Coinbase envelopes are only structurally validated here; their reward
//! amount is checked during block validation (`block_validation`), since
//! that check needs the block height and collected fees.

use std::collections::HashSet;

use crate::constants::{
    DEFAULT_MIN_FEE_SATOSHI, MAX_CLOCK_SKEW_SECONDS, MAX_COINBASE_DATA, MAX_INPUTS, MAX_OUTPUTS,
    MAX_TOKEN_OPS, MAX_TOKEN_OP_SIZE, MAX_TX_SIZE,
};
use crate::crypto::PublicKey;
use crate::error::TransactionError;
use crate::types::{OutPoint, TxEnvelope, UtxoEntry};

/// Summary of a successfully validated transaction.
///
/// Returned by [`validate_transaction`] after all checks pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatedTransaction {
    /// Total value of all spent inputs, in satoshi.
    pub total_input: u64,
    /// Total value of all created outputs, in satoshi.
    pub total_output: u64,
    /// Transaction fee, in satoshi (`total_input - total_output`).
    pub fee: u64,
}

/// Validate envelope structure (context-free).
///
/// Applies to both coinbase and regular envelopes:
/// - `tx_hash` matches the recomputed hash of `raw_tx`
/// - Non-empty inputs and outputs, within [`MAX_INPUTS`]/[`MAX_OUTPUTS`]
/// - At most [`MAX_TOKEN_OPS`] token operations, each within [`MAX_TOKEN_OP_SIZE`]
/// - Serialized size within [`MAX_TX_SIZE`]
///
/// Then dispatches to [`validate_coinbase_structure`] or
/// [`validate_regular_structure`] for the type-specific rules.
pub fn validate_envelope_structure(env: &TxEnvelope) -> Result<(), TransactionError> {
    if !env.hash_matches() {
        return Err(TransactionError::MalformedTx(
            "tx_hash does not match raw_tx".into(),
        ));
    }

    let tx = &env.raw_tx;

    if tx.inputs.is_empty() || tx.outputs.is_empty() {
        return Err(TransactionError::MalformedTx(
            "empty inputs or outputs".into(),
        ));
    }
    if tx.inputs.len() > MAX_INPUTS {
        return Err(TransactionError::MalformedTx(format!(
            "too many inputs: {} > {MAX_INPUTS}",
            tx.inputs.len()
        )));
    }
    if tx.outputs.len() > MAX_OUTPUTS {
        return Err(TransactionError::MalformedTx(format!(
            "too many outputs: {} > {MAX_OUTPUTS}",
            tx.outputs.len()
        )));
    }
    if tx.token_ops.len() > MAX_TOKEN_OPS {
        return Err(TransactionError::MalformedTx(format!(
            "too many token ops: {} > {MAX_TOKEN_OPS}",
            tx.token_ops.len()
        )));
    }
    for (i, op) in tx.token_ops.iter().enumerate() {
        if op.payload.len() > MAX_TOKEN_OP_SIZE {
            return Err(TransactionError::MalformedTx(format!(
                "token op {i} payload too large: {} > {MAX_TOKEN_OP_SIZE}",
                op.payload.len()
            )));
        }
    }

    let encoded = tx.canonical_bytes()?;
    if encoded.len() > MAX_TX_SIZE {
        return Err(TransactionError::OversizedTransaction {
            size: encoded.len(),
            max: MAX_TX_SIZE,
        });
    }

    if env.is_coinbase() {
        validate_coinbase_structure(env)
    } else {
        validate_regular_structure(env)
    }
}

/// Validate coinbase-specific structure.
///
/// - Exactly one input, with the null outpoint
/// - `coinbase_data` within [`MAX_COINBASE_DATA`] bytes
/// - Empty signature and signer_pubkey (the coinbase exemption)
fn validate_coinbase_structure(env: &TxEnvelope) -> Result<(), TransactionError> {
    let tx = &env.raw_tx;

    if tx.inputs.len() != 1 {
        return Err(TransactionError::MalformedTx(
            "coinbase must have exactly one input".into(),
        ));
    }
    if tx.inputs[0].coinbase_data.len() > MAX_COINBASE_DATA {
        return Err(TransactionError::MalformedTx(format!(
            "coinbase data too large: {} > {MAX_COINBASE_DATA}",
            tx.inputs[0].coinbase_data.len()
        )));
    }
    if !env.signature.is_empty() || !env.signer_pubkey.is_empty() {
        return Err(TransactionError::MalformedTx(
            "coinbase must carry no signature or signer_pubkey".into(),
        ));
    }

    Ok(())
}

/// Validate non-coinbase envelope structure.
///
/// - No null outpoints
/// - No duplicate input outpoints within this transaction
fn validate_regular_structure(env: &TxEnvelope) -> Result<(), TransactionError> {
    let mut seen = HashSet::with_capacity(env.raw_tx.inputs.len());

    for input in &env.raw_tx.inputs {
        if input.previous_output.is_null() {
            return Err(TransactionError::MalformedTx(
                "null outpoint in non-coinbase transaction".into(),
            ));
        }
        if !seen.insert(&input.previous_output) {
            return Err(TransactionError::DoubleSpend(
                input.previous_output.to_string(),
            ));
        }
    }

    Ok(())
}

/// Validate a transaction envelope against the UTXO set (contextual),
/// implementing §4.5's six ordered checks.
///
/// `get_utxo` looks up a UTXO by outpoint, allowing the caller to provide
/// any backing store (RocksDB, in-memory map, etc). `now` is the validating
/// node's wall-clock time, in Unix seconds.
///
/// **Note:** coinbase envelopes cannot be contextually validated standalone
/// — they have no real inputs to check ownership or funds against. Their
/// reward amount is checked during block validation instead.
pub fn validate_transaction<F>(
    env: &TxEnvelope,
    get_utxo: F,
    current_height: u64,
    now: u64,
) -> Result<ValidatedTransaction, TransactionError>
where
    F: Fn(&OutPoint) -> Option<UtxoEntry>,
{
    if env.is_coinbase() {
        return Err(TransactionError::MalformedTx(
            "coinbase cannot be contextually validated standalone".into(),
        ));
    }

    // 1. Envelope well-formed, tx_hash matches.
    validate_envelope_structure(env)?;

    // 2. Signature verifies against signer_pubkey, and signer_pubkey must
    // hash to the address of at least one spent UTXO.
    let signer = PublicKey::from_bytes(&env.signer_pubkey)
        .map_err(|_| TransactionError::BadSignature { index: 0 })?;
    signer
        .verify(env.tx_hash.as_ref(), &env.signature)
        .map_err(|_| TransactionError::BadSignature { index: 0 })?;
    let signer_hash = signer.address_hash();

    // 3. Timing: not_until bounded by the allowed clock skew.
    if env.raw_tx.not_until > now.saturating_add(MAX_CLOCK_SKEW_SECONDS) {
        return Err(TransactionError::NotYetValid {
            not_until: env.raw_tx.not_until,
            now,
        });
    }

    // 4. Inputs: no double-spend, every outpoint resolves to a live, mature
    // UTXO, and the signer owns at least one spent output.
    let mut total_input: u64 = 0;
    let mut owns_an_input = false;

    for (i, input) in env.raw_tx.inputs.iter().enumerate() {
        let utxo = get_utxo(&input.previous_output)
            .ok_or_else(|| TransactionError::UnknownInput(input.previous_output.to_string()))?;

        if utxo.is_coinbase && !utxo.is_mature(current_height) {
            return Err(TransactionError::ImmatureCoinbase { index: i });
        }
        if utxo.output.address.hash == signer_hash {
            owns_an_input = true;
        }

        total_input = total_input
            .checked_add(utxo.output.value)
            .ok_or(TransactionError::ValueOverflow)?;
    }

    if !owns_an_input {
        return Err(TransactionError::BadSignature { index: 0 });
    }

    // 6. Outputs: positive value (address validity is enforced by
    // `Address`'s own construction).
    for (i, output) in env.raw_tx.outputs.iter().enumerate() {
        if output.value == 0 {
            return Err(TransactionError::BadOutput {
                index: i,
                reason: "zero value output".into(),
            });
        }
    }

    let total_output = env
        .raw_tx
        .total_output_value()
        .ok_or(TransactionError::ValueOverflow)?;

    // 5. Value conservation and minimum fee.
    if total_input < total_output {
        return Err(TransactionError::Underpaid {
            fee: 0,
            minimum: DEFAULT_MIN_FEE_SATOSHI,
        });
    }
    let fee = total_input - total_output;
    if fee < DEFAULT_MIN_FEE_SATOSHI {
        return Err(TransactionError::Underpaid {
            fee,
            minimum: DEFAULT_MIN_FEE_SATOSHI,
        });
    }

    Ok(ValidatedTransaction {
        total_input,
        total_output,
        fee,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use crate::constants::COIN;
    use crate::crypto::KeyPair;
    use crate::types::{Hash256, Transaction, TxInput, TxOutput};
    use std::collections::HashMap;

    fn make_env(
        kp: &KeyPair,
        spent: OutPoint,
        out_value: u64,
        not_until: u64,
        timestamp: u64,
        nonce: u64,
    ) -> TxEnvelope {
        let raw_tx = Transaction {
            version: 1,
            inputs: vec![TxInput::spending(spent)],
            outputs: vec![TxOutput {
                value: out_value,
                address: Address::standard([0x22; 20]),
                script_pubkey: vec![],
            }],
            token_ops: vec![],
            not_until,
            timestamp,
            nonce,
        };
        let tx_hash = raw_tx.hash().unwrap();
        let sig = kp.sign(tx_hash.as_ref());
        TxEnvelope::new(raw_tx, sig, kp.public_key().to_bytes()).unwrap()
    }

    fn utxo_for(kp: &KeyPair, value: u64, height: u64, is_coinbase: bool) -> UtxoEntry {
        UtxoEntry {
            output: TxOutput {
                value,
                address: Address::from_public_key(&kp.public_key()),
                script_pubkey: vec![],
            },
            block_height: height,
            is_coinbase,
        }
    }

    fn spent_outpoint() -> OutPoint {
        OutPoint { tx_hash: Hash256([7; 32]), index: 0 }
    }

    #[test]
    fn accepts_well_formed_signed_spend() {
        let kp = KeyPair::generate();
        let outpoint = spent_outpoint();
        let env = make_env(&kp, outpoint.clone(), 40 * COIN, 0, 1_700_000_000, 0);
        let utxo = utxo_for(&kp, 50 * COIN, 10, false);

        let map: HashMap<OutPoint, UtxoEntry> = HashMap::from([(outpoint, utxo)]);
        let result = validate_transaction(&env, |op| map.get(op).cloned(), 100, 1_700_000_000);

        assert_eq!(result.unwrap().fee, 10 * COIN);
    }

    #[test]
    fn rejects_tampered_signature() {
        let kp = KeyPair::generate();
        let outpoint = spent_outpoint();
        let mut env = make_env(&kp, outpoint.clone(), 40 * COIN, 0, 1_700_000_000, 0);
        env.signature[0] ^= 0xFF;
        let utxo = utxo_for(&kp, 50 * COIN, 10, false);
        let map: HashMap<OutPoint, UtxoEntry> = HashMap::from([(outpoint, utxo)]);

        let err = validate_transaction(&env, |op| map.get(op).cloned(), 100, 1_700_000_000)
            .unwrap_err();
        assert!(matches!(err, TransactionError::BadSignature { .. }));
    }

    #[test]
    fn rejects_signer_not_owning_input() {
        let kp = KeyPair::generate();
        let other = KeyPair::generate();
        let outpoint = spent_outpoint();
        let env = make_env(&kp, outpoint.clone(), 40 * COIN, 0, 1_700_000_000, 0);
        // UTXO belongs to someone else.
        let utxo = utxo_for(&other, 50 * COIN, 10, false);
        let map: HashMap<OutPoint, UtxoEntry> = HashMap::from([(outpoint, utxo)]);

        let err = validate_transaction(&env, |op| map.get(op).cloned(), 100, 1_700_000_000)
            .unwrap_err();
        assert!(matches!(err, TransactionError::BadSignature { .. }));
    }

    #[test]
    fn rejects_not_yet_valid_beyond_skew() {
        let kp = KeyPair::generate();
        let outpoint = spent_outpoint();
        let now = 1_700_000_000;
        let env = make_env(&kp, outpoint.clone(), 40 * COIN, now + 1_000, now, 0);
        let utxo = utxo_for(&kp, 50 * COIN, 10, false);
        let map: HashMap<OutPoint, UtxoEntry> = HashMap::from([(outpoint, utxo)]);

        let err = validate_transaction(&env, |op| map.get(op).cloned(), 100, now).unwrap_err();
        assert!(matches!(err, TransactionError::NotYetValid { .. }));
    }

    #[test]
    fn allows_not_until_within_skew() {
        let kp = KeyPair::generate();
        let outpoint = spent_outpoint();
        let now = 1_700_000_000;
        let env = make_env(&kp, outpoint.clone(), 40 * COIN, now + 60, now, 0);
        let utxo = utxo_for(&kp, 50 * COIN, 10, false);
        let map: HashMap<OutPoint, UtxoEntry> = HashMap::from([(outpoint, utxo)]);

        assert!(validate_transaction(&env, |op| map.get(op).cloned(), 100, now).is_ok());
    }

    #[test]
    fn rejects_unknown_utxo() {
        let kp = KeyPair::generate();
        let outpoint = spent_outpoint();
        let env = make_env(&kp, outpoint, 40 * COIN, 0, 1_700_000_000, 0);

        let err = validate_transaction(&env, |_| None, 100, 1_700_000_000).unwrap_err();
        assert!(matches!(err, TransactionError::UnknownInput(_)));
    }

    #[test]
    fn rejects_double_spend_within_transaction() {
        let kp = KeyPair::generate();
        let outpoint = spent_outpoint();
        let mut env = make_env(&kp, outpoint.clone(), 40 * COIN, 0, 1_700_000_000, 0);
        env.raw_tx.inputs.push(TxInput::spending(outpoint.clone()));
        env.tx_hash = env.raw_tx.hash().unwrap();
        env.signature = kp.sign(env.tx_hash.as_ref());

        let err = validate_envelope_structure(&env).unwrap_err();
        assert!(matches!(err, TransactionError::DoubleSpend(_)));
    }

    #[test]
    fn rejects_immature_coinbase_input() {
        let kp = KeyPair::generate();
        let outpoint = spent_outpoint();
        let env = make_env(&kp, outpoint.clone(), 40 * COIN, 0, 1_700_000_000, 0);
        let utxo = utxo_for(&kp, 50 * COIN, 95, true);
        let map: HashMap<OutPoint, UtxoEntry> = HashMap::from([(outpoint, utxo)]);

        let err = validate_transaction(&env, |op| map.get(op).cloned(), 100, 1_700_000_000)
            .unwrap_err();
        assert!(matches!(err, TransactionError::ImmatureCoinbase { .. }));
    }

    #[test]
    fn rejects_underpaid_fee() {
        let kp = KeyPair::generate();
        let outpoint = spent_outpoint();
        // 50 COIN in, 50 COIN out -> fee 0, below minimum.
        let env = make_env(&kp, outpoint.clone(), 50 * COIN, 0, 1_700_000_000, 0);
        let utxo = utxo_for(&kp, 50 * COIN, 10, false);
        let map: HashMap<OutPoint, UtxoEntry> = HashMap::from([(outpoint, utxo)]);

        let err = validate_transaction(&env, |op| map.get(op).cloned(), 100, 1_700_000_000)
            .unwrap_err();
        assert!(matches!(err, TransactionError::Underpaid { .. }));
    }

    #[test]
    fn rejects_insufficient_funds_as_underpaid() {
        let kp = KeyPair::generate();
        let outpoint = spent_outpoint();
        let env = make_env(&kp, outpoint.clone(), 60 * COIN, 0, 1_700_000_000, 0);
        let utxo = utxo_for(&kp, 50 * COIN, 10, false);
        let map: HashMap<OutPoint, UtxoEntry> = HashMap::from([(outpoint, utxo)]);

        let err = validate_transaction(&env, |op| map.get(op).cloned(), 100, 1_700_000_000)
            .unwrap_err();
        assert!(matches!(err, TransactionError::Underpaid { fee: 0, .. }));
    }

    #[test]
    fn rejects_zero_value_output() {
        let kp = KeyPair::generate();
        let outpoint = spent_outpoint();
        let mut env = make_env(&kp, outpoint.clone(), 40 * COIN, 0, 1_700_000_000, 0);
        env.raw_tx.outputs[0].value = 0;
        env.tx_hash = env.raw_tx.hash().unwrap();
        env.signature = kp.sign(env.tx_hash.as_ref());

        let utxo = utxo_for(&kp, 50 * COIN, 10, false);
        let map: HashMap<OutPoint, UtxoEntry> = HashMap::from([(outpoint, utxo)]);

        let err = validate_transaction(&env, |op| map.get(op).cloned(), 100, 1_700_000_000)
            .unwrap_err();
        assert!(matches!(err, TransactionError::BadOutput { .. }));
    }

    #[test]
    fn rejects_tx_hash_mismatch() {
        let kp = KeyPair::generate();
        let outpoint = spent_outpoint();
        let mut env = make_env(&kp, outpoint, 40 * COIN, 0, 1_700_000_000, 0);
        env.raw_tx.nonce = 99;

        let err = validate_envelope_structure(&env).unwrap_err();
        assert!(matches!(err, TransactionError::MalformedTx(_)));
    }

    #[test]
    fn rejects_oversized_coinbase_data() {
        let raw_tx = Transaction {
            version: 1,
            inputs: vec![TxInput::coinbase(vec![0u8; MAX_COINBASE_DATA + 1])],
            outputs: vec![TxOutput {
                value: 1,
                address: Address::standard([1; 20]),
                script_pubkey: vec![],
            }],
            token_ops: vec![],
            not_until: 0,
            timestamp: 0,
            nonce: 0,
        };
        let env = TxEnvelope::new_coinbase(raw_tx).unwrap();
        let err = validate_envelope_structure(&env).unwrap_err();
        assert!(matches!(err, TransactionError::MalformedTx(_)));
    }

    #[test]
    fn coinbase_cannot_be_contextually_validated_standalone() {
        let raw_tx = Transaction {
            version: 1,
            inputs: vec![TxInput::coinbase(vec![])],
            outputs: vec![TxOutput {
                value: 1,
                address: Address::standard([1; 20]),
                script_pubkey: vec![],
            }],
            token_ops: vec![],
            not_until: 0,
            timestamp: 0,
            nonce: 0,
        };
        let env = TxEnvelope::new_coinbase(raw_tx).unwrap();
        let err = validate_transaction(&env, |_| None, 0, 0).unwrap_err();
        assert!(matches!(err, TransactionError::MalformedTx(_)));
    }
}
