use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use lodestream_core::{AssetHash, AssetKind};
use reqwest::Client;
#[cfg(test)]
use unimock::unimock;
use url::Url;

use crate::{NetError, NetResult};

/// Per-asset fetch seam used by the HTTP fallback path.
#[cfg_attr(test, unimock(api = FetchMock))]
#[async_trait]
pub trait Fetch: Send + Sync {
    /// Fetch one compressed asset blob.
    async fn fetch(&self, kind: AssetKind, hash: AssetHash) -> NetResult<Bytes>;
}

/// Direct HTTP fallback: one GET per asset against
/// `<base>/geometry/<hash>` or `<base>/material/<hash>`.
#[derive(Clone, Debug)]
pub struct HttpFetch {
    inner: Client,
    base: Url,
    request_timeout: Duration,
}

impl HttpFetch {
    /// # Panics
    ///
    /// Panics if the `reqwest::Client` builder fails to build.
    #[must_use]
    pub fn new(base: Url, request_timeout: Duration) -> Self {
        let inner = Client::builder()
            .pool_max_idle_per_host(0)
            .build()
            .expect("failed to build reqwest client");
        Self {
            inner,
            base,
            request_timeout,
        }
    }

    fn asset_url(&self, kind: AssetKind, hash: &AssetHash) -> NetResult<Url> {
        let segment = match kind {
            AssetKind::Geometry => "geometry",
            AssetKind::Material => "material",
        };
        self.base
            .join(&format!("{segment}/{}", hash.to_hex()))
            .map_err(|e| NetError::http(e.to_string()))
    }
}

#[async_trait]
impl Fetch for HttpFetch {
    async fn fetch(&self, kind: AssetKind, hash: AssetHash) -> Result<Bytes, NetError> {
        let url = self.asset_url(kind, &hash)?;
        let resp = self
            .inner
            .get(url.clone())
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(NetError::from)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(NetError::http_status(status.as_u16(), url.to_string()));
        }

        resp.bytes().await.map_err(NetError::from)
    }
}
