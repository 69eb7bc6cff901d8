//! Address encoding.
//!
//! An address is a 21-byte value (1-byte version tag + 20-byte hash of a
//! post-quantum public key), encoded as `S` followed by 50 hex characters:
//! `hex(version) || hex(hash20) || hex(checksum)`, where `checksum =
//! SHA-256(version || hash20)[0..4]`.
//!
//! A legacy `L` form (41 chars: `L` + 40 hex chars of a bare 20-byte hash,
//! no checksum) is accepted for liquidity-pool destinations. The core
//! treats both forms identically for signature and UTXO purposes — an
//! `Address` only ever carries the 20-byte hash once parsed.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::crypto::PublicKey;
use crate::error::AddressError;

/// Version byte for the standard "S" address form.
pub const VERSION_STANDARD: u8 = 0x42;

/// A parsed address: a version tag plus a 20-byte public-key hash.
///
/// The legacy "L" form is folded into the same representation with
/// `version = 0` and no checksum protection; callers that need to
/// distinguish the two forms for display should retain the original
/// string rather than round-tripping through `Address`.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, bincode::Encode, bincode::Decode,
)]
pub struct Address {
    pub version: u8,
    pub hash: [u8; 20],
}

impl Address {
    /// Build a standard ("S") address from a 20-byte public-key hash.
    pub fn standard(hash: [u8; 20]) -> Self {
        Self {
            version: VERSION_STANDARD,
            hash,
        }
    }

    /// Derive the standard address for a public key (SHAKE256(pubkey)[..20]).
    pub fn from_public_key(public_key: &PublicKey) -> Self {
        Self::standard(public_key.address_hash())
    }

    fn checksum(version: u8, hash: &[u8; 20]) -> [u8; 4] {
        let mut hasher = Sha256::new();
        hasher.update([version]);
        hasher.update(hash);
        let digest = hasher.finalize();
        [digest[0], digest[1], digest[2], digest[3]]
    }

    /// Parse either the "S" (51 chars) or legacy "L" (41 chars) form.
    pub fn parse(s: &str) -> Result<Self, AddressError> {
        let mut chars = s.chars();
        let tag = chars.next().ok_or(AddressError::InvalidLength(0))?;
        let rest = &s[tag.len_utf8()..];

        match tag {
            'S' => {
                if s.len() != 51 {
                    return Err(AddressError::InvalidLength(s.len()));
                }
                let bytes = hex::decode(rest).map_err(|_| AddressError::InvalidHex)?;
                // 1 (version) + 20 (hash) + 4 (checksum) = 25 bytes.
                if bytes.len() != 25 {
                    return Err(AddressError::InvalidLength(s.len()));
                }
                let version = bytes[0];
                let mut hash = [0u8; 20];
                hash.copy_from_slice(&bytes[1..21]);
                let mut checksum = [0u8; 4];
                checksum.copy_from_slice(&bytes[21..25]);
                if checksum != Self::checksum(version, &hash) {
                    return Err(AddressError::InvalidChecksum);
                }
                if version != VERSION_STANDARD {
                    return Err(AddressError::UnknownVersion(version));
                }
                Ok(Self { version, hash })
            }
            'L' => {
                if s.len() != 41 {
                    return Err(AddressError::InvalidLength(s.len()));
                }
                let bytes = hex::decode(rest).map_err(|_| AddressError::InvalidHex)?;
                if bytes.len() != 20 {
                    return Err(AddressError::InvalidLength(s.len()));
                }
                let mut hash = [0u8; 20];
                hash.copy_from_slice(&bytes);
                Ok(Self { version: 0, hash })
            }
            other => Err(AddressError::InvalidTag(other)),
        }
    }

    /// Encode as the standard "S" form, regardless of the stored version.
    pub fn to_standard_string(&self) -> String {
        let checksum = Self::checksum(self.version, &self.hash);
        let mut s = String::with_capacity(51);
        s.push('S');
        s.push_str(&hex::encode([self.version]));
        s.push_str(&hex::encode(self.hash));
        s.push_str(&hex::encode(checksum));
        s
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_standard_string())
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
