use std::{
    fs, io,
    path::{Path, PathBuf},
};

use lodestream_core::AssetHash;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::{
    BlobStore, MembershipEstimate, StoreError, StoreResult,
    index::LruState,
};

/// Options for the persistent store.
#[derive(Clone, Debug)]
pub struct DiskStoreOptions {
    /// Root directory; `content/` and `index/` are created beneath it.
    pub root: PathBuf,
    /// Soft cap on stored bytes. `None` disables quota eviction.
    pub max_bytes: Option<u64>,
    /// Write-buffer threshold: puts are flushed to disk in batches once
    /// this many bytes are pending.
    pub flush_bytes: usize,
    /// Entries removed per quota-eviction pass. Batched so a full store
    /// does not pay one cleanup pass per admitted blob.
    pub evict_batch: usize,
}

impl DiskStoreOptions {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            max_bytes: None,
            flush_bytes: 4 * 1024 * 1024,
            evict_batch: 32,
        }
    }

    #[must_use]
    pub fn with_max_bytes(mut self, max: u64) -> Self {
        self.max_bytes = Some(max);
        self
    }

    #[must_use]
    pub fn with_flush_bytes(mut self, bytes: usize) -> Self {
        self.flush_bytes = bytes;
        self
    }
}

struct DiskState {
    index: LruState,
    pending: Vec<(AssetHash, Vec<u8>)>,
    pending_bytes: usize,
}

/// Persistent blob store backed by the local filesystem.
///
/// Writes are buffered and flushed in batches; each blob lands via
/// temp+rename so a crash never leaves a half-written file under its final
/// name. The last-access index is persisted on every flush.
pub struct DiskBlobStore {
    opts: DiskStoreOptions,
    state: Mutex<DiskState>,
}

impl DiskBlobStore {
    pub fn open(opts: DiskStoreOptions) -> StoreResult<Self> {
        fs::create_dir_all(opts.root.join("content"))?;
        fs::create_dir_all(opts.root.join("index"))?;
        let index = LruState::load(&opts.index_path());
        debug!(entries = index.len(), bytes = index.total_bytes(), "disk store opened");
        Ok(Self {
            opts,
            state: Mutex::new(DiskState {
                index,
                pending: Vec::new(),
                pending_bytes: 0,
            }),
        })
    }

    fn blob_path(&self, hash: &AssetHash) -> PathBuf {
        let hex = hash.to_hex();
        self.opts
            .root
            .join("content")
            .join(&hex[0..2])
            .join(format!("{hex}.bin"))
    }

    fn flush_locked(&self, st: &mut DiskState) -> StoreResult<()> {
        if st.pending.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(&mut st.pending);
        st.pending_bytes = 0;
        trace!(blobs = batch.len(), "flushing write buffer");

        for (hash, blob) in batch {
            if let Some(max) = self.opts.max_bytes {
                while st.index.total_bytes().saturating_add(blob.len() as u64) > max
                    && !st.index.is_empty()
                {
                    self.evict_oldest_batch(&mut st.index);
                }
            }
            self.write_blob(&mut st.index, &hash, &blob)?;
            st.index.touch(hash, Some(blob.len() as u64));
        }

        st.index.store(&self.opts.index_path())?;
        Ok(())
    }

    fn write_blob(&self, index: &mut LruState, hash: &AssetHash, blob: &[u8]) -> StoreResult<()> {
        let path = self.blob_path(hash);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        match write_atomic(&path, blob) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::StorageFull => {
                // Device-level quota: evict a batch and retry once.
                warn!(hash = %hash, "storage full, evicting before retry");
                self.evict_oldest_batch(index);
                match write_atomic(&path, blob) {
                    Ok(()) => Ok(()),
                    Err(err) if err.kind() == io::ErrorKind::StorageFull => {
                        Err(StoreError::QuotaExhausted)
                    }
                    Err(err) => Err(err.into()),
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    fn evict_oldest_batch(&self, index: &mut LruState) {
        let victims: Vec<AssetHash> = index
            .oldest_first()
            .into_iter()
            .take(self.opts.evict_batch.max(1))
            .map(|(hash, _)| hash)
            .collect();
        debug!(victims = victims.len(), "quota eviction pass");

        for hash in victims {
            if let Err(err) = fs::remove_file(self.blob_path(&hash))
                && err.kind() != io::ErrorKind::NotFound
            {
                warn!(hash = %hash, %err, "failed to remove evicted blob");
            }
            index.remove(&hash);
        }
    }
}

impl DiskStoreOptions {
    fn index_path(&self) -> PathBuf {
        self.root.join("index").join("lru.bin")
    }
}

impl BlobStore for DiskBlobStore {
    fn get(&self, hash: &AssetHash) -> StoreResult<Option<Vec<u8>>> {
        let mut st = self.state.lock();

        // Buffered puts are visible before they hit disk.
        if let Some((_, blob)) = st.pending.iter().find(|(h, _)| h == hash) {
            return Ok(Some(blob.clone()));
        }

        match fs::read(self.blob_path(hash)) {
            Ok(blob) => {
                st.index.touch(*hash, Some(blob.len() as u64));
                Ok(Some(blob))
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn put(&self, hash: &AssetHash, blob: &[u8]) -> StoreResult<()> {
        let mut st = self.state.lock();

        // Content addressing: a known hash always carries identical bytes.
        if st.index.contains(hash) || st.pending.iter().any(|(h, _)| h == hash) {
            return Ok(());
        }

        st.pending_bytes += blob.len();
        st.pending.push((*hash, blob.to_vec()));
        if st.pending_bytes >= self.opts.flush_bytes {
            self.flush_locked(&mut st)?;
        }
        Ok(())
    }

    fn flush(&self) -> StoreResult<()> {
        let mut st = self.state.lock();
        self.flush_locked(&mut st)
    }

    fn membership(&self) -> StoreResult<MembershipEstimate> {
        let st = self.state.lock();
        let mut hashes = st.index.sorted_hashes();
        if !st.pending.is_empty() {
            hashes.extend(st.pending.iter().map(|(h, _)| *h));
            hashes.sort_unstable();
        }
        Ok(MembershipEstimate::from_sorted(&hashes))
    }

    fn clear(&self) -> StoreResult<()> {
        let mut st = self.state.lock();
        st.pending.clear();
        st.pending_bytes = 0;
        st.index = LruState::default();

        let content = self.opts.root.join("content");
        if content.exists() {
            fs::remove_dir_all(&content)?;
        }
        fs::create_dir_all(&content)?;

        let index_path = self.opts.index_path();
        if let Err(err) = fs::remove_file(&index_path)
            && err.kind() != io::ErrorKind::NotFound
        {
            return Err(err.into());
        }
        Ok(())
    }
}

/// Temp+rename so readers never observe a partial blob.
fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let temp = path.with_extension("tmp");
    fs::write(&temp, bytes)?;
    fs::rename(&temp, path)
}
