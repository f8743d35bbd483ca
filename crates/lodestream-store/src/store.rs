use lodestream_core::AssetHash;

use crate::{MembershipEstimate, StoreResult};

/// Durable hash → compressed-blob store.
///
/// ## Normative
/// - `put` is idempotent: the content-addressing invariant guarantees that
///   a repeated hash always carries identical bytes, so a second put for a
///   known hash is a no-op.
/// - `put` may buffer; [`flush`](Self::flush) makes buffered writes
///   durable. Quota pressure is resolved internally by batch eviction and
///   retry, never surfaced per-item.
/// - `get` returns the stored compressed bytes unchanged.
pub trait BlobStore: Send + Sync {
    /// Look up a blob. `None` means not cached.
    fn get(&self, hash: &AssetHash) -> StoreResult<Option<Vec<u8>>>;

    /// Queue a blob for storage.
    fn put(&self, hash: &AssetHash, blob: &[u8]) -> StoreResult<()>;

    /// Make all buffered puts durable.
    fn flush(&self) -> StoreResult<()>;

    /// Snapshot the membership estimate used to short-circuit guaranteed
    /// misses. Only [`MembershipVerdict::DefinitelyAbsent`] conclusions
    /// may be trusted.
    fn membership(&self) -> StoreResult<MembershipEstimate>;

    /// Remove everything, including the index.
    fn clear(&self) -> StoreResult<()>;
}
