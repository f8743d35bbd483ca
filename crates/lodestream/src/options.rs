//! Configuration for [`ResourceCache`](crate::ResourceCache).

use std::path::PathBuf;

use lodestream_decode::DecodeOptions;
use lodestream_flight::FlightOptions;
use lodestream_net::{AuthContext, RetryPolicy};
use tokio_util::sync::CancellationToken;
use url::Url;

/// Unified configuration for creating a [`ResourceCache`](crate::ResourceCache).
///
/// # Example
///
/// ```ignore
/// use lodestream::CacheOptions;
///
/// let opts = CacheOptions::new(
///     "assets.example.com:7440",
///     url::Url::parse("https://assets.example.com/v1/")?,
/// )
/// .with_cache_dir("/var/cache/lodestream")
/// .with_memory_cap(256 * 1024 * 1024);
/// ```
#[derive(Clone, Debug)]
pub struct CacheOptions {
    /// Socket endpoint for the pooled duplex connections (`host:port`).
    pub endpoint: String,
    /// Base URL for the per-asset HTTP fallback.
    pub fallback_url: Url,
    /// Authorized resource namespaces presented at handshake.
    pub auth: AuthContext,
    /// Directory for the persistent blob store. `None` disables
    /// persistence entirely (every read reports absent).
    pub cache_dir: Option<PathBuf>,
    /// Soft byte cap for the persistent store.
    pub store_max_bytes: Option<u64>,
    /// Hard cap on resident decoded bytes before eviction runs.
    pub memory_cap_bytes: u64,
    /// Hysteresis band: eviction reclaims down to `cap - min_reclaim` so a
    /// fresh burst of loads does not immediately re-trigger a pass.
    pub min_reclaim_bytes: u64,
    /// Pooled connections per endpoint.
    pub pool_size: usize,
    /// Hard cap on hashes per wire message.
    pub max_batch: usize,
    /// Reconnect/backoff schedule for sockets and the HTTP fallback.
    pub retry: RetryPolicy,
    /// Congestion-control configuration.
    pub flight: FlightOptions,
    /// Decode worker pool configuration.
    pub decode: DecodeOptions,
    /// Event bus channel capacity.
    pub event_capacity: usize,
    /// Cancellation token for graceful shutdown.
    pub cancel: Option<CancellationToken>,
}

impl CacheOptions {
    pub fn new<S: Into<String>>(endpoint: S, fallback_url: Url) -> Self {
        Self {
            endpoint: endpoint.into(),
            fallback_url,
            auth: AuthContext::default(),
            cache_dir: None,
            store_max_bytes: None,
            memory_cap_bytes: 512 * 1024 * 1024,
            min_reclaim_bytes: 64 * 1024 * 1024,
            pool_size: 2,
            max_batch: 256,
            retry: RetryPolicy::default(),
            flight: FlightOptions::default(),
            decode: DecodeOptions::default(),
            event_capacity: 256,
            cancel: None,
        }
    }

    #[must_use]
    pub fn with_cache_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn with_memory_cap(mut self, cap_bytes: u64) -> Self {
        self.memory_cap_bytes = cap_bytes;
        self
    }

    #[must_use]
    pub fn with_min_reclaim(mut self, bytes: u64) -> Self {
        self.min_reclaim_bytes = bytes;
        self
    }

    #[must_use]
    pub fn with_auth(mut self, auth: AuthContext) -> Self {
        self.auth = auth;
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}
