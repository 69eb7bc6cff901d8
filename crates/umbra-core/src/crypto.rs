//! Post-quantum cryptographic operations for the Umbra protocol.
//!
//! Provides ML-DSA-87 (Dilithium5) key generation, message signing, and
//! signature verification, plus the SHAKE-based hash functions used to
//! derive addresses and plot identifiers from public keys.
//!
//! # Signing scheme
//!
//! Unlike per-input signing schemes, a transaction carries exactly one
//! signature over its whole body: a [`TxEnvelope`](crate::types::TxEnvelope)
//! signs `tx_hash = SHA-256(bincode(raw_tx))`, not the raw_tx fields
//! directly, so callers build the hash once and reuse it for both signing
//! and verification.

use pqcrypto_dilithium::dilithium5;
use pqcrypto_traits::sign::{
    DetachedSignature as _, PublicKey as _, SecretKey as _,
};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::digest::{ExtendableOutput, Update, XofReader};
use sha3::{Shake128, Shake256};
use std::fmt;
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// ML-DSA-87 public key size, in bytes.
pub const PUBLIC_KEY_BYTES: usize = 2592;
/// ML-DSA-87 secret key size, in bytes.
pub const SECRET_KEY_BYTES: usize = 4896;
/// ML-DSA-87 detached signature size, in bytes.
pub const SIGNATURE_BYTES: usize = 4627;

/// The algorithm identifier carried in [`TxEnvelope::algorithm`](crate::types::TxEnvelope::algorithm).
pub const ALGORITHM_ID: &str = "ml-dsa-3";

/// An ML-DSA-87 keypair.
///
/// The secret key bytes are held in a [`Zeroizing`] buffer so they are
/// wiped from memory on drop.
pub struct KeyPair {
    public_key: dilithium5::PublicKey,
    secret_bytes: Zeroizing<Vec<u8>>,
}

impl KeyPair {
    /// Generate a random keypair.
    pub fn generate() -> Self {
        let (pk, sk) = dilithium5::keypair();
        Self {
            public_key: pk,
            secret_bytes: Zeroizing::new(sk.as_bytes().to_vec()),
        }
    }

    /// Reconstruct a keypair from its raw secret and public key bytes.
    ///
    /// ML-DSA's secret key packing (`rho ∥ K ∥ tr ∥ s1 ∥ s2 ∥ t0`) does not
    /// embed the public key, so there is no way to re-derive `PublicKey`
    /// from `secret_bytes` alone: callers that only hold secret bytes
    /// out-of-band (a plot entry, an identity file) must carry the matching
    /// public key alongside and pass both here.
    pub fn from_parts(secret_bytes: &[u8], public_key_bytes: &[u8]) -> Result<Self, CryptoError> {
        if secret_bytes.len() != SECRET_KEY_BYTES {
            return Err(CryptoError::InvalidSecretKeySize {
                got: secret_bytes.len(),
                expected: SECRET_KEY_BYTES,
            });
        }
        dilithium5::SecretKey::from_bytes(secret_bytes).map_err(|_| {
            CryptoError::InvalidSecretKeySize {
                got: secret_bytes.len(),
                expected: SECRET_KEY_BYTES,
            }
        })?;
        let public_key = PublicKey::from_bytes(public_key_bytes)?.inner;
        Ok(Self {
            public_key,
            secret_bytes: Zeroizing::new(secret_bytes.to_vec()),
        })
    }

    /// Derive the public key for this keypair.
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            inner: self.public_key.clone(),
        }
    }

    /// Raw secret key bytes. Handle with care.
    pub fn secret_bytes(&self) -> &[u8] {
        &self.secret_bytes
    }

    /// Sign a message, returning a detached signature.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        let sk = dilithium5::SecretKey::from_bytes(&self.secret_bytes)
            .expect("secret_bytes always holds a valid secret key");
        dilithium5::detached_sign(message, &sk).as_bytes().to_vec()
    }
}

impl Clone for KeyPair {
    fn clone(&self) -> Self {
        Self {
            public_key: self.public_key.clone(),
            secret_bytes: self.secret_bytes.clone(),
        }
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

/// An ML-DSA-87 public key.
#[derive(Clone)]
pub struct PublicKey {
    inner: dilithium5::PublicKey,
}

impl PublicKey {
    /// Parse a public key from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != PUBLIC_KEY_BYTES {
            return Err(CryptoError::InvalidPublicKeySize {
                got: bytes.len(),
                expected: PUBLIC_KEY_BYTES,
            });
        }
        let inner = dilithium5::PublicKey::from_bytes(bytes)
            .map_err(|_| CryptoError::InvalidPublicKeySize {
                got: bytes.len(),
                expected: PUBLIC_KEY_BYTES,
            })?;
        Ok(Self { inner })
    }

    /// Raw public key bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.inner.as_bytes().to_vec()
    }

    /// The 20-byte address hash (SHAKE256 of the raw public key).
    pub fn address_hash(&self) -> [u8; 20] {
        address_hash(&self.to_bytes())
    }

    /// The 16-byte farming identifier (SHAKE128 of the raw public key).
    pub fn identifier_hash(&self) -> [u8; 16] {
        identifier_hash(&self.to_bytes())
    }

    /// Verify a detached signature on a message.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
        let sig = dilithium5::DetachedSignature::from_bytes(signature)
            .map_err(|_| CryptoError::MalformedSignature)?;
        dilithium5::verify_detached_signature(&sig, message, &self.inner)
            .map_err(|_| CryptoError::VerificationFailed)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.to_bytes()))
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.to_bytes()))
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for PublicKey {}

impl std::hash::Hash for PublicKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.to_bytes().hash(state);
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_bytes().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes = Vec::<u8>::deserialize(deserializer)?;
        Self::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

/// Compute the 20-byte address hash (SHAKE256) from raw public key bytes.
pub fn address_hash(pubkey_bytes: &[u8]) -> [u8; 20] {
    let mut hasher = Shake256::default();
    hasher.update(pubkey_bytes);
    let mut reader = hasher.finalize_xof();
    let mut out = [0u8; 20];
    reader.read(&mut out);
    out
}

/// Compute the 16-byte farming identifier (SHAKE128) from raw public key bytes.
pub fn identifier_hash(pubkey_bytes: &[u8]) -> [u8; 16] {
    let mut hasher = Shake128::default();
    hasher.update(pubkey_bytes);
    let mut reader = hasher.finalize_xof();
    let mut out = [0u8; 16];
    reader.read(&mut out);
    out
}

/// The farming difficulty digest (§4.3): the first 8 bytes of
/// `SHAKE128(challenge || identifier)`, read as the value compared against
/// a [`crate::difficulty`] target.
pub fn shake128_challenge_digest(challenge: &[u8], identifier: &[u8]) -> [u8; 8] {
    let mut hasher = Shake128::default();
    hasher.update(challenge);
    hasher.update(identifier);
    let mut reader = hasher.finalize_xof();
    let mut out = [0u8; 8];
    reader.read(&mut out);
    out
}
