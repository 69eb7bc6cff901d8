//! Persistent farming index (§4.3): maps plot identifiers to on-disk
//! location and serves proof-of-storage solves against a difficulty
//! target.
//!
//! `index` is the slow path: it walks configured plot directories and
//! (re-)loads any plot whose mtime or size has drifted from what was last
//! recorded, persisting the updated identifier mapping in RocksDB so a
//! restart does not require re-verifying every plot from scratch. `solve`
//! is the hot path the miner calls every challenge: a linear scan of each
//! currently loaded plot's entry table, returning on the first identifier
//! whose challenge digest clears the target.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use umbra_core::crypto::{shake128_challenge_digest, KeyPair};
use umbra_core::error::{FarmingError, PlotError};
use umbra_core::traits::{FarmingIndex as FarmingIndexTrait, ProofOfStorage};
use umbra_core::types::Hash256;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, Options, DB};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use umbra_plots::PlotHandle;

const CF_PLOT_META: &str = "plot_meta";
const CF_IDENTIFIERS: &str = "identifiers";

#[derive(Debug, Clone, bincode::Encode, bincode::Decode)]
struct PlotMeta {
    mtime_secs: u64,
    size: u64,
    k: i32,
    entry_count: u32,
}

#[derive(Debug, Clone, bincode::Encode, bincode::Decode)]
struct IdentifierLocation {
    plot_path: String,
    entry_index: u32,
}

/// A plot currently held open (memory-mapped) by the index.
struct LoadedPlot {
    handle: PlotHandle,
    plot_id: Hash256,
}

/// Persistent, RocksDB-backed farming index over a set of plot directories.
///
/// Every loaded plot sits behind its own lock so `solve` (a read-only scan)
/// can run while `index` re-verifies a *different* plot, but never the same
/// plot concurrently — per §4.3's concurrency rule.
pub struct FarmingIndex {
    db: DB,
    loaded: RwLock<HashMap<PathBuf, Arc<RwLock<LoadedPlot>>>>,
}

impl FarmingIndex {
    /// Open (creating if absent) the persistent index at `db_path`. Does not
    /// scan any plot directories; call [`FarmingIndex::index`] for that.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, FarmingError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs = vec![
            ColumnFamilyDescriptor::new(CF_PLOT_META, Options::default()),
            ColumnFamilyDescriptor::new(CF_IDENTIFIERS, Options::default()),
        ];
        let db = DB::open_cf_descriptors(&opts, db_path, cfs)
            .map_err(|e| FarmingError::Store(e.to_string()))?;

        Ok(Self {
            db,
            loaded: RwLock::new(HashMap::new()),
        })
    }

    fn cf_meta(&self) -> &ColumnFamily {
        self.db
            .cf_handle(CF_PLOT_META)
            .expect("plot_meta column family exists")
    }

    fn cf_identifiers(&self) -> &ColumnFamily {
        self.db
            .cf_handle(CF_IDENTIFIERS)
            .expect("identifiers column family exists")
    }

    /// Scan `plot_dirs` for plot files (`umbra_v1_k{K}_*.dat`, per §6),
    /// (re-)indexing any whose mtime or size changed since the last call.
    /// Returns the number of plots (re-)loaded; an unchanged plot is a
    /// no-op (R4 idempotence).
    pub fn index(&self, plot_dirs: &[PathBuf]) -> Result<usize, FarmingError> {
        let mut indexed = 0usize;
        for dir in plot_dirs {
            let entries = match fs::read_dir(dir) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "failed to read plot directory");
                    continue;
                }
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if !is_plot_filename(&path) {
                    continue;
                }
                match self.index_one(&path) {
                    Ok(true) => indexed += 1,
                    Ok(false) => {}
                    Err(e) => warn!(path = %path.display(), error = %e, "failed to index plot, quarantining"),
                }
            }
        }
        Ok(indexed)
    }

    /// Index or re-index a single plot file. Returns `Ok(true)` if the plot
    /// was (re-)loaded, `Ok(false)` if its recorded metadata was unchanged.
    ///
    /// A plot that fails `verify(true)` is left out of `loaded` (quarantined,
    /// not deleted) and its error is propagated to the caller.
    fn index_one(&self, path: &Path) -> Result<bool, FarmingError> {
        let fs_meta = fs::metadata(path).map_err(|e| FarmingError::Plot(PlotError::Io(e.to_string())))?;
        let mtime_secs = fs_meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let size = fs_meta.len();

        if let Some(recorded) = self.read_meta(path)? {
            if recorded.mtime_secs == mtime_secs && recorded.size == size && self.is_loaded(path) {
                return Ok(false);
            }
            info!(path = %path.display(), "plot metadata changed, re-indexing");
        }

        let handle = PlotHandle::open(path).map_err(FarmingError::Plot)?;
        handle.verify(true).map_err(FarmingError::Plot)?;

        let plot_id = plot_id_for_path(path);
        let path_key = path.to_string_lossy().into_owned();

        for (i, entry) in handle.entries().enumerate() {
            let entry = entry.map_err(FarmingError::Plot)?;
            let location = IdentifierLocation {
                plot_path: path_key.clone(),
                entry_index: i as u32,
            };
            let value = bincode::encode_to_vec(&location, bincode::config::standard())
                .map_err(|e| FarmingError::Store(e.to_string()))?;
            self.db
                .put_cf(self.cf_identifiers(), entry.identifier, value)
                .map_err(|e| FarmingError::Store(e.to_string()))?;
        }

        let plot_meta = PlotMeta {
            mtime_secs,
            size,
            k: handle.k(),
            entry_count: handle.entry_count(),
        };
        let meta_value = bincode::encode_to_vec(&plot_meta, bincode::config::standard())
            .map_err(|e| FarmingError::Store(e.to_string()))?;
        self.db
            .put_cf(self.cf_meta(), path_key.as_bytes(), meta_value)
            .map_err(|e| FarmingError::Store(e.to_string()))?;

        let loaded = Arc::new(RwLock::new(LoadedPlot { handle, plot_id }));
        self.loaded
            .write()
            .expect("farming index lock poisoned")
            .insert(path.to_path_buf(), loaded);

        debug!(path = %path.display(), entries = plot_meta.entry_count, "indexed plot");
        Ok(true)
    }

    fn is_loaded(&self, path: &Path) -> bool {
        self.loaded
            .read()
            .expect("farming index lock poisoned")
            .contains_key(path)
    }

    fn read_meta(&self, path: &Path) -> Result<Option<PlotMeta>, FarmingError> {
        let key = path.to_string_lossy();
        let raw = self
            .db
            .get_cf(self.cf_meta(), key.as_bytes())
            .map_err(|e| FarmingError::Store(e.to_string()))?;
        match raw {
            None => Ok(None),
            Some(bytes) => {
                let (meta, _) = bincode::decode_from_slice(&bytes, bincode::config::standard())
                    .map_err(|e| FarmingError::Store(e.to_string()))?;
                Ok(Some(meta))
            }
        }
    }

    /// Look up which plot and entry index currently serves a given
    /// identifier, from the persistent index. Used to cross-check a
    /// submitted proof without re-scanning plots.
    pub fn locate_identifier(&self, identifier: &[u8; 16]) -> Result<Option<(PathBuf, u32)>, FarmingError> {
        let raw = self
            .db
            .get_cf(self.cf_identifiers(), identifier)
            .map_err(|e| FarmingError::Store(e.to_string()))?;
        match raw {
            None => Ok(None),
            Some(bytes) => {
                let (location, _): (IdentifierLocation, usize) =
                    bincode::decode_from_slice(&bytes, bincode::config::standard())
                        .map_err(|e| FarmingError::Store(e.to_string()))?;
                Ok(Some((PathBuf::from(location.plot_path), location.entry_index)))
            }
        }
    }

    /// Number of plots currently held open.
    pub fn loaded_plot_count(&self) -> usize {
        self.loaded.read().expect("farming index lock poisoned").len()
    }
}

impl FarmingIndexTrait for FarmingIndex {
    /// Linearly scan every loaded plot's entry table for an identifier whose
    /// challenge digest clears `difficulty_target`, per §4.3's search
    /// strategy. Returns the first match found; plot iteration order is
    /// unspecified, matching the "concurrent solve calls permitted, ordering
    /// unspecified" rule.
    fn solve(
        &self,
        challenge: &Hash256,
        difficulty_target: u64,
    ) -> Result<Option<ProofOfStorage>, FarmingError> {
        let plots: Vec<Arc<RwLock<LoadedPlot>>> = self
            .loaded
            .read()
            .expect("farming index lock poisoned")
            .values()
            .cloned()
            .collect();

        for plot in plots {
            let guard = plot.read().expect("plot lock poisoned");
            for (i, entry) in guard.handle.entries().enumerate() {
                let entry = entry.map_err(FarmingError::Plot)?;
                let digest = shake128_challenge_digest(challenge.as_bytes(), &entry.identifier);
                if u64::from_le_bytes(digest) > difficulty_target {
                    continue;
                }

                let (address, identifier, secret_key, public_key_bytes) = guard
                    .handle
                    .lookup(i as u32)
                    .map_err(FarmingError::Plot)?;
                let keypair = KeyPair::from_parts(secret_key, public_key_bytes)
                    .map_err(|e| FarmingError::Store(format!("corrupt key pair in plot: {e}")))?;
                let public_key = keypair.public_key();
                let signature = keypair.sign(challenge.as_bytes());

                return Ok(Some(ProofOfStorage {
                    plot_id: guard.plot_id,
                    entry_index: i as u32,
                    public_key: public_key.to_bytes(),
                    address,
                    identifier,
                    signature,
                }));
            }
        }

        Ok(None)
    }
}

/// Whether `path`'s filename matches the plot-file naming convention
/// (§6: `umbra_v1_k{K}_{YYYYMMDD-HHMMSS}_{random8hex}.dat`). Matched
/// loosely, by prefix and extension, so a plot tool's exact timestamp or
/// random suffix formatting doesn't need to round-trip here.
fn is_plot_filename(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    name.starts_with("umbra_v1_k") && name.ends_with(".dat")
}

fn plot_id_for_path(path: &Path) -> Hash256 {
    let mut hasher = Sha256::new();
    hasher.update(path.to_string_lossy().as_bytes());
    Hash256(hasher.finalize().into())
}
