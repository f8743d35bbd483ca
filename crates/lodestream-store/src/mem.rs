use std::collections::HashMap;

use lodestream_core::AssetHash;
use parking_lot::Mutex;

use crate::{BlobStore, MembershipEstimate, StoreResult};

/// In-memory blob store for tests and tooling.
#[derive(Default)]
pub struct MemBlobStore {
    blobs: Mutex<HashMap<AssetHash, Vec<u8>>>,
}

impl MemBlobStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blobs.lock().is_empty()
    }
}

impl BlobStore for MemBlobStore {
    fn get(&self, hash: &AssetHash) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.blobs.lock().get(hash).cloned())
    }

    fn put(&self, hash: &AssetHash, blob: &[u8]) -> StoreResult<()> {
        self.blobs
            .lock()
            .entry(*hash)
            .or_insert_with(|| blob.to_vec());
        Ok(())
    }

    fn flush(&self) -> StoreResult<()> {
        Ok(())
    }

    fn membership(&self) -> StoreResult<MembershipEstimate> {
        let mut hashes: Vec<AssetHash> = self.blobs.lock().keys().copied().collect();
        hashes.sort_unstable();
        Ok(MembershipEstimate::from_sorted(&hashes))
    }

    fn clear(&self) -> StoreResult<()> {
        self.blobs.lock().clear();
        Ok(())
    }
}

/// No-op store for environments where persistence is unreliable or slow.
/// Every read reports absent; writes are discarded.
#[derive(Clone, Copy, Debug, Default)]
pub struct DisabledStore;

impl BlobStore for DisabledStore {
    fn get(&self, _hash: &AssetHash) -> StoreResult<Option<Vec<u8>>> {
        Ok(None)
    }

    fn put(&self, _hash: &AssetHash, _blob: &[u8]) -> StoreResult<()> {
        Ok(())
    }

    fn flush(&self) -> StoreResult<()> {
        Ok(())
    }

    fn membership(&self) -> StoreResult<MembershipEstimate> {
        Ok(MembershipEstimate::empty())
    }

    fn clear(&self) -> StoreResult<()> {
        Ok(())
    }
}
