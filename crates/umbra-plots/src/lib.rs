//! Binary plot file format (§4.2): immutable, memory-mapped keysets.
//!
//! A plot is created offline and never mutated. Its layout is a fixed
//! 16-byte header, an entry table, and a key region:
//!
//! ```text
//! | version:i64 | k:i32 | entry_count:i32 |        <- header, 16 bytes
//! | address[20] | identifier[16] | offset:i32 | ... <- entry_count entries, 40 bytes each
//! | secret_key[4896] public_key[2592] | ...          <- entry_count key slots
//! ```
//!
//! `entry_count` must equal `2^k`; `offset` is the zero-based index of the
//! entry's key slot within the key region (not a byte offset — at `k = 20`
//! a byte offset would overflow `i32`). Each key slot carries the public
//! key alongside its secret key: ML-DSA's secret-key packing (`rho ∥ K ∥ tr
//! ∥ s1 ∥ s2 ∥ t0`) does not embed the public key, so a plot that only
//! stored secret keys could never re-derive one to check the address/
//! identifier round-trip `verify(full=true)` requires. Every plot opened by
//! [`PlotHandle::open`] is read-only and memory-mapped: the same mapping
//! backs the index scan in `umbra-farm` and the `lookup` calls the miner
//! makes when assembling a proof.

use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapOptions};
use umbra_core::address::Address;
use umbra_core::crypto::{PublicKey, PUBLIC_KEY_BYTES, SECRET_KEY_BYTES};
use umbra_core::error::PlotError;

/// Current on-disk format version.
pub const PLOT_FORMAT_VERSION: i64 = 1;

/// Minimum allowed `k` (`entry_count = 2^k`), per §3.
pub const MIN_K: i32 = 3;
/// Maximum allowed `k`, per §3.
pub const MAX_K: i32 = 20;

const HEADER_LEN: usize = 16;
const ENTRY_LEN: usize = 20 + 16 + 4;
/// Size of one key-region slot: the secret key followed by its public key.
const KEY_SLOT_LEN: usize = SECRET_KEY_BYTES + PUBLIC_KEY_BYTES;

/// One row of a plot's entry table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlotEntry {
    pub address: Address,
    pub identifier: [u8; 16],
    /// Index of this entry's secret key within the key region.
    pub key_index: u32,
}

/// A read-only, memory-mapped handle onto an opened plot file.
pub struct PlotHandle {
    path: PathBuf,
    mmap: Mmap,
    version: i64,
    k: i32,
    entry_count: u32,
}

impl PlotHandle {
    /// Open and validate a plot file's header and size, memory-mapping its
    /// contents. Does not verify entry/key consistency — call
    /// [`PlotHandle::verify`] for that.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PlotError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| PlotError::Io(e.to_string()))?;
        let meta = file.metadata().map_err(|e| PlotError::Io(e.to_string()))?;
        if (meta.len() as usize) < HEADER_LEN {
            return Err(PlotError::Truncated);
        }

        let mmap = unsafe { MmapOptions::new().map(&file) }.map_err(|e| PlotError::Io(e.to_string()))?;

        let version = i64::from_le_bytes(mmap[0..8].try_into().unwrap());
        if version != PLOT_FORMAT_VERSION {
            return Err(PlotError::UnsupportedVersion(version));
        }
        let k = i32::from_le_bytes(mmap[8..12].try_into().unwrap());
        if !(MIN_K..=MAX_K).contains(&k) {
            return Err(PlotError::InvalidK(k));
        }
        let entry_count = i32::from_le_bytes(mmap[12..16].try_into().unwrap());
        if entry_count < 0 || entry_count as i64 != 1i64 << k {
            return Err(PlotError::InvalidK(k));
        }
        let entry_count = entry_count as u32;

        let expected_len = Self::expected_file_len(entry_count);
        if mmap.len() as u64 != expected_len {
            return Err(PlotError::Truncated);
        }

        Ok(Self {
            path,
            mmap,
            version,
            k,
            entry_count,
        })
    }

    fn expected_file_len(entry_count: u32) -> u64 {
        HEADER_LEN as u64
            + entry_count as u64 * ENTRY_LEN as u64
            + entry_count as u64 * KEY_SLOT_LEN as u64
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn k(&self) -> i32 {
        self.k
    }

    pub fn entry_count(&self) -> u32 {
        self.entry_count
    }

    fn entry_offset(&self, index: u32) -> usize {
        HEADER_LEN + index as usize * ENTRY_LEN
    }

    fn key_offset(&self, key_index: u32) -> usize {
        HEADER_LEN + self.entry_count as usize * ENTRY_LEN + key_index as usize * KEY_SLOT_LEN
    }

    /// Read entry `index` from the entry table without touching the key
    /// region.
    pub fn entry(&self, index: u32) -> Result<PlotEntry, PlotError> {
        if index >= self.entry_count {
            return Err(PlotError::Corrupt {
                offset: self.entry_offset(index) as u64,
                reason: format!("entry index {index} out of range ({} entries)", self.entry_count),
            });
        }
        let start = self.entry_offset(index);
        let raw = &self.mmap[start..start + ENTRY_LEN];
        let mut address = [0u8; 20];
        address.copy_from_slice(&raw[0..20]);
        let mut identifier = [0u8; 16];
        identifier.copy_from_slice(&raw[20..36]);
        let key_index = u32::from_le_bytes(raw[36..40].try_into().unwrap());
        Ok(PlotEntry {
            address: Address::standard(address),
            identifier,
            key_index,
        })
    }

    /// Iterate every entry in table order.
    pub fn entries(&self) -> impl Iterator<Item = Result<PlotEntry, PlotError>> + '_ {
        (0..self.entry_count).map(move |i| self.entry(i))
    }

    /// Look up entry `index`'s address, identifier, and raw secret/public
    /// key pair.
    ///
    /// Returns `PlotError::Corrupt` if the entry's `key_index` lies outside
    /// the key region (the one cross-region invariant `open` does not
    /// check, since it would require touching every entry).
    pub fn lookup(&self, index: u32) -> Result<(Address, [u8; 16], &[u8], &[u8]), PlotError> {
        let entry = self.entry(index)?;
        if entry.key_index >= self.entry_count {
            return Err(PlotError::Corrupt {
                offset: self.entry_offset(index) as u64,
                reason: format!(
                    "key_index {} out of range ({} keys)",
                    entry.key_index, self.entry_count
                ),
            });
        }
        let start = self.key_offset(entry.key_index);
        let secret_key = &self.mmap[start..start + SECRET_KEY_BYTES];
        let public_key = &self.mmap[start + SECRET_KEY_BYTES..start + KEY_SLOT_LEN];
        Ok((entry.address, entry.identifier, secret_key, public_key))
    }

    /// Validate every offset and, if `full`, re-derive each entry's public
    /// key from its stored secret key and check the address/identifier
    /// round-trip (§4.2: "the only acceptance path used on first
    /// indexing").
    ///
    /// Returns the offset of the first inconsistency found.
    pub fn verify(&self, full: bool) -> Result<(), PlotError> {
        for index in 0..self.entry_count {
            let entry = self.entry(index)?;
            if entry.key_index >= self.entry_count {
                return Err(PlotError::Corrupt {
                    offset: self.entry_offset(index) as u64,
                    reason: format!(
                        "key_index {} out of range ({} keys)",
                        entry.key_index, self.entry_count
                    ),
                });
            }
            if !full {
                continue;
            }
            let start = self.key_offset(entry.key_index);
            let secret_bytes = &self.mmap[start..start + SECRET_KEY_BYTES];
            let public_bytes = &self.mmap[start + SECRET_KEY_BYTES..start + KEY_SLOT_LEN];
            let keypair = umbra_core::crypto::KeyPair::from_parts(secret_bytes, public_bytes).map_err(|e| {
                PlotError::Corrupt {
                    offset: start as u64,
                    reason: format!("malformed key pair: {e}"),
                }
            })?;
            let pk: PublicKey = keypair.public_key();
            if pk.address_hash() != entry.address.hash {
                return Err(PlotError::Corrupt {
                    offset: self.entry_offset(index) as u64,
                    reason: "address does not match derived public key".into(),
                });
            }
            if pk.identifier_hash() != entry.identifier {
                return Err(PlotError::Corrupt {
                    offset: self.entry_offset(index) as u64,
                    reason: "identifier does not match derived public key".into(),
                });
            }
        }
        Ok(())
    }
}

/// Write a plot file from a list of keypairs. Not part of the §4.2 public
/// interface (plots are created offline by a separate tool), but used by
/// `umbra-farm` and integration tests to build fixtures without hand
/// assembling the binary layout.
pub fn write_plot(path: impl AsRef<Path>, keypairs: &[umbra_core::crypto::KeyPair]) -> std::io::Result<()> {
    use std::io::Write;

    let entry_count = keypairs.len();
    let k = (entry_count as f64).log2().ceil() as i32;
    assert_eq!(1usize << k, entry_count, "write_plot requires a power-of-two keyset");

    let mut out = std::io::BufWriter::new(File::create(path)?);
    out.write_all(&PLOT_FORMAT_VERSION.to_le_bytes())?;
    out.write_all(&k.to_le_bytes())?;
    out.write_all(&(entry_count as i32).to_le_bytes())?;

    for (index, kp) in keypairs.iter().enumerate() {
        let pk = kp.public_key();
        out.write_all(&pk.address_hash())?;
        out.write_all(&pk.identifier_hash())?;
        out.write_all(&(index as u32).to_le_bytes())?;
    }
    for kp in keypairs {
        out.write_all(kp.secret_bytes())?;
        out.write_all(&kp.public_key().to_bytes())?;
    }
    out.flush()
}
