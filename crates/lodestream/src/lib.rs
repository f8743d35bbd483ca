#![forbid(unsafe_code)]

//! Streaming cache for immutable, content-addressed rendering assets.
//!
//! A [`ResourceCache`] fetches compressed geometry and material blobs over
//! pooled duplex sockets (with a per-asset HTTP fallback), decodes them on
//! a worker pool, and keeps the decoded payloads resident up to a memory
//! cap. Identical hashes requested concurrently share one fetch; delivery
//! is announced on an event bus so any number of consumers can listen.
//!
//! Transfer rate adapts to the service with a CUBIC-style congestion
//! window over asset throughput, and a two-tier store (decoded in memory,
//! compressed on disk) makes repeat sessions mostly offline.
//!
//! ```ignore
//! use lodestream::{CacheOptions, ResourceCache};
//!
//! let opts = CacheOptions::new(
//!     "assets.example.com:7440",
//!     url::Url::parse("https://assets.example.com/v1/")?,
//! )
//! .with_cache_dir("/var/cache/lodestream");
//!
//! let cache = ResourceCache::start(opts)?;
//! let viewer = cache.add_viewer().await?;
//! let mut events = cache.events();
//! cache.request_geometry(hash, 1.0, 0).await?;
//! ```

mod cache;
mod coordinator;
mod entry;
mod error;
mod options;
mod queue;

pub use cache::ResourceCache;
pub use coordinator::{ConsumerId, ViewerId, WaitOutcome};
pub use entry::CacheEntry;
pub use error::{CacheError, CacheResult};
pub use options::CacheOptions;

pub use lodestream_core::{AssetHandle, AssetHash, AssetKind};
pub use lodestream_decode::{DecodedAsset, Geometry, Material};
pub use lodestream_events::{CacheEvent, Event, EventBus, NetEvent};
pub use lodestream_net::AuthContext;
