use std::{collections::HashMap, fs, path::Path};

use lodestream_core::AssetHash;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::StoreResult;

/// In-memory state of the last-access index.
///
/// ## Data model (normative)
/// - Per-hash metadata:
///   - `last_touch`: monotonically increasing counter (logical clock)
///   - `bytes`: size of the stored compressed blob
/// - The on-disk representation is internal to this module (binary format
///   via bincode, written atomically with temp+rename).
///
/// ## What this is NOT
/// - It is not a filesystem walker and it does not delete blobs; the disk
///   store combines it with actual file removal.
#[derive(Clone, Debug, Default)]
pub struct LruState {
    clock: u64,
    by_hash: HashMap<AssetHash, LruEntry>,
}

#[derive(Clone, Copy, Debug)]
pub struct LruEntry {
    pub last_touch: u64,
    pub bytes: u64,
}

impl LruState {
    /// Load from disk. Missing, empty, or corrupted files are treated as
    /// an empty index (best-effort).
    pub fn load(path: &Path) -> Self {
        let Ok(buf) = fs::read(path) else {
            return Self::default();
        };
        if buf.is_empty() {
            return Self::default();
        }
        match bincode::serde::decode_from_slice::<LruIndexFile, _>(&buf, bincode::config::legacy())
        {
            Ok((file, _)) => Self::from_file(file),
            Err(err) => {
                warn!(%err, "lru index corrupted, starting empty");
                Self::default()
            }
        }
    }

    /// Persist atomically via temp+rename.
    pub fn store(&self, path: &Path) -> StoreResult<()> {
        let bytes = bincode::serde::encode_to_vec(&self.to_file(), bincode::config::legacy())?;
        let temp = path.with_extension("tmp");
        fs::write(&temp, &bytes)?;
        fs::rename(&temp, path)?;
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }

    #[must_use]
    pub fn contains(&self, hash: &AssetHash) -> bool {
        self.by_hash.contains_key(hash)
    }

    /// Touch (mark as most-recent) a hash.
    ///
    /// Returns `true` if it was newly inserted.
    pub fn touch(&mut self, hash: AssetHash, bytes_hint: Option<u64>) -> bool {
        self.clock = self.clock.saturating_add(1);

        if let Some(e) = self.by_hash.get_mut(&hash) {
            e.last_touch = self.clock;
            if let Some(b) = bytes_hint {
                e.bytes = b;
            }
            false
        } else {
            self.by_hash.insert(
                hash,
                LruEntry {
                    last_touch: self.clock,
                    bytes: bytes_hint.unwrap_or(0),
                },
            );
            true
        }
    }

    pub fn remove(&mut self, hash: &AssetHash) {
        self.by_hash.remove(hash);
    }

    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.by_hash
            .values()
            .fold(0u64, |acc, e| acc.saturating_add(e.bytes))
    }

    /// All hashes, oldest touch first.
    #[must_use]
    pub fn oldest_first(&self) -> Vec<(AssetHash, LruEntry)> {
        let mut v: Vec<(AssetHash, LruEntry)> =
            self.by_hash.iter().map(|(k, e)| (*k, *e)).collect();
        v.sort_by_key(|(_k, e)| e.last_touch);
        v
    }

    /// All hashes in sorted hash order, for membership probing.
    #[must_use]
    pub fn sorted_hashes(&self) -> Vec<AssetHash> {
        let mut v: Vec<AssetHash> = self.by_hash.keys().copied().collect();
        v.sort_unstable();
        v
    }

    fn from_file(file: LruIndexFile) -> Self {
        let mut by_hash = HashMap::with_capacity(file.entries.len());
        for e in file.entries {
            by_hash.insert(
                e.hash,
                LruEntry {
                    last_touch: e.last_touch,
                    bytes: e.bytes,
                },
            );
        }
        Self {
            clock: file.clock,
            by_hash,
        }
    }

    fn to_file(&self) -> LruIndexFile {
        let mut entries: Vec<LruIndexFileEntry> = self
            .by_hash
            .iter()
            .map(|(hash, e)| LruIndexFileEntry {
                hash: *hash,
                last_touch: e.last_touch,
                bytes: e.bytes,
            })
            .collect();

        // Stable output: sort by hash for deterministic serialization.
        entries.sort_by_key(|e| e.hash);

        LruIndexFile {
            version: 1,
            clock: self.clock,
            entries,
        }
    }
}

/// On-disk binary format (private).
#[derive(Clone, Debug, Serialize, Deserialize)]
struct LruIndexFile {
    version: u32,
    clock: u64,
    entries: Vec<LruIndexFileEntry>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct LruIndexFileEntry {
    hash: AssetHash,
    last_touch: u64,
    bytes: u64,
}
