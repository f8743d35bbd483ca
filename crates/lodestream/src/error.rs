use thiserror::Error;

/// Facade-level errors.
///
/// Per-asset failures never show up here — those are delivered as
/// [`CacheEvent::AssetFailed`](lodestream_events::CacheEvent) events on the
/// handle that requested them. `CacheError` covers only the cache's own
/// lifecycle.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("store error: {0}")]
    Store(#[from] lodestream_store::StoreError),

    #[error("net error: {0}")]
    Net(#[from] lodestream_net::NetError),

    #[error("decode error: {0}")]
    Decode(#[from] lodestream_decode::DecodeError),

    #[error("cache has shut down")]
    ShutDown,
}

pub type CacheResult<T> = Result<T, CacheError>;
