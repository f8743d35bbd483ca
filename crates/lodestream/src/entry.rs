use std::sync::Arc;

use lodestream_core::AssetHandle;
use lodestream_decode::DecodedAsset;

/// A decoded asset resident in memory.
///
/// ## Normative
/// - Owned exclusively by the cache coordinator once decoded; consumers
///   hold the shared `payload`, never the entry.
/// - `ref_count` counts live consumers. Entries with `ref_count == 0` are
///   eviction candidates; an entry is never removed while `ref_count > 0`.
#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub handle: AssetHandle,
    pub payload: Arc<DecodedAsset>,
    pub byte_size: u64,
    pub ref_count: usize,
    pub importance: f32,
}

/// Terminal per-hash state.
///
/// `Failed` is the error sentinel: a later request for the hash re-fires
/// the failure immediately instead of refetching, until an explicit clear.
#[derive(Clone, Debug)]
pub(crate) enum Resident {
    Decoded(CacheEntry),
    Failed(String),
}
