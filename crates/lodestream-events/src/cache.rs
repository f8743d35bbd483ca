use std::sync::Arc;

use lodestream_core::AssetHandle;
use lodestream_decode::DecodedAsset;

/// Events emitted by the cache coordinator.
#[derive(Clone, Debug)]
pub enum CacheEvent {
    /// A requested asset finished decoding and entered the cache.
    AssetReceived {
        handle: AssetHandle,
        payload: Arc<DecodedAsset>,
    },
    /// A requested asset failed terminally; the failure is remembered and
    /// re-announced on repeat requests without refetching.
    AssetFailed { handle: AssetHandle, error: String },
    /// Pending requests were shed under memory pressure. Shed requests are
    /// soft failures: asking again retries them.
    AssetsShed { handles: Vec<AssetHandle> },
    /// An eviction pass completed.
    EvictionPass { evicted: usize, reclaimed_bytes: u64 },
}
