use async_trait::async_trait;
use bytes::Bytes;
use lodestream_core::{AssetHash, AssetKind};
use tokio::time::sleep;

use crate::{NetError, fetch::Fetch, types::RetryPolicy};

/// Wraps a [`Fetch`] with the pool's backoff schedule.
///
/// Errors that [`NetError::is_retryable`] classifies as transient are
/// retried up to `policy.max_retries` extra attempts with exponential
/// backoff; anything else surfaces immediately.
pub struct RetryFetch<F> {
    inner: F,
    policy: RetryPolicy,
}

impl<F: Fetch> RetryFetch<F> {
    pub fn new(inner: F, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<F: Fetch> Fetch for RetryFetch<F> {
    async fn fetch(&self, kind: AssetKind, hash: AssetHash) -> Result<Bytes, NetError> {
        let mut attempt = 0;
        loop {
            let error = match self.inner.fetch(kind, hash).await {
                Ok(bytes) => return Ok(bytes),
                Err(error) => error,
            };
            if !error.is_retryable() || attempt >= self.policy.max_retries {
                return Err(error);
            }
            attempt += 1;
            sleep(self.policy.delay_for_attempt(attempt)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use unimock::{MockFn, Unimock, matching};

    use super::*;
    use crate::fetch::FetchMock;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn retry_then_success() {
        let mock = Unimock::new((
            FetchMock::fetch
                .next_call(matching!(_, _))
                .returns(Err(NetError::Timeout)),
            FetchMock::fetch
                .next_call(matching!(_, _))
                .returns(Ok(Bytes::from_static(b"payload"))),
        ));
        let fetch = RetryFetch::new(mock, fast_policy(3));

        let out = fetch
            .fetch(AssetKind::Geometry, AssetHash::digest(b"h"))
            .await
            .unwrap();
        assert_eq!(out, Bytes::from_static(b"payload"));
    }

    #[tokio::test]
    async fn exhausted_retries_surface_the_last_error() {
        let mock = Unimock::new(
            FetchMock::fetch
                .each_call(matching!(_, _))
                .returns(Err(NetError::Timeout)),
        );
        let fetch = RetryFetch::new(mock, fast_policy(2));

        let err = fetch
            .fetch(AssetKind::Material, AssetHash::digest(b"h"))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn non_retryable_error_fails_fast() {
        let mock = Unimock::new(
            FetchMock::fetch
                .some_call(matching!(_, _))
                .returns(Err(NetError::http_status(404, "u".into()))),
        );
        let fetch = RetryFetch::new(mock, fast_policy(3));

        let err = fetch
            .fetch(AssetKind::Geometry, AssetHash::digest(b"h"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), Some(404));
    }
}
