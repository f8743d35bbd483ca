use std::{cmp::min, time::Duration};

/// Exponential-backoff retry schedule.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponential_delay = self.base_delay * 2_u32.pow(attempt.saturating_sub(1));
        min(exponential_delay, self.max_delay)
    }
}

/// Configuration for a socket pool against one endpoint.
#[derive(Clone, Debug)]
pub struct PoolOptions {
    /// Endpoint address for the pooled duplex sockets (`host:port`).
    pub endpoint: String,
    /// Base URL for the per-asset HTTP fallback path.
    pub fallback_url: url::Url,
    /// Number of pooled connections.
    pub pool_size: usize,
    /// Batches below this many hashes are merged with a neighbouring
    /// connection's share unless total outstanding work is itself small.
    pub min_batch: usize,
    /// Hard cap on hashes per wire message.
    pub max_batch: usize,
    /// Reconnect schedule; after exhaustion a connection is marked
    /// permanently failed.
    pub retry: RetryPolicy,
    /// Authorized resource namespaces presented at handshake.
    pub auth: crate::wire::AuthContext,
}

impl PoolOptions {
    pub fn new<S: Into<String>>(endpoint: S, fallback_url: url::Url) -> Self {
        Self {
            endpoint: endpoint.into(),
            fallback_url,
            pool_size: 2,
            min_batch: 8,
            max_batch: 256,
            retry: RetryPolicy::default(),
            auth: crate::wire::AuthContext::default(),
        }
    }

    #[must_use]
    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size.max(1);
        self
    }

    #[must_use]
    pub fn with_auth(mut self, auth: crate::wire::AuthContext) -> Self {
        self.auth = auth;
        self
    }
}
