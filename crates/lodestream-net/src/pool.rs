use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use lodestream_core::{AssetHash, AssetKind};
use lodestream_events::{EventBus, NetEvent};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    NetError, NetResult, balance,
    connection::{ConnectionHandle, ConnectionOptions, ConnectionState, spawn_connection},
    fetch::{Fetch, HttpFetch},
    retry::RetryFetch,
    types::PoolOptions,
    wire::{RequestBatch, ResponseBody, ResponseItem},
};

/// Pool of long-lived duplex connections to one asset endpoint.
///
/// Batches are water-filled across the pool to minimize the worst
/// per-connection backlog. Once every connection is permanently failed,
/// traffic degrades to the per-asset HTTP fallback instead of surfacing a
/// hard transport error.
pub struct SocketPool {
    inner: Arc<PoolInner>,
    cancel: CancellationToken,
}

struct PoolInner {
    opts: PoolOptions,
    conns: Vec<ConnectionHandle>,
    fallback: Arc<dyn Fetch>,
    results_tx: kanal::AsyncSender<ResponseItem>,
    bus: EventBus,
    fallback_active: AtomicBool,
}

impl SocketPool {
    /// Spawn the pool with the default HTTP fallback (retried per policy).
    /// The returned receiver yields every resolved item, whichever
    /// connection or fallback path produced it.
    #[must_use]
    pub fn connect(
        opts: PoolOptions,
        bus: EventBus,
        cancel: CancellationToken,
    ) -> (Self, kanal::AsyncReceiver<ResponseItem>) {
        let fallback: Arc<dyn Fetch> = Arc::new(RetryFetch::new(
            HttpFetch::new(opts.fallback_url.clone(), Duration::from_secs(30)),
            opts.retry.clone(),
        ));
        Self::with_fallback(opts, fallback, bus, cancel)
    }

    /// Spawn with a custom fallback path (test seam).
    #[must_use]
    pub fn with_fallback(
        opts: PoolOptions,
        fallback: Arc<dyn Fetch>,
        bus: EventBus,
        cancel: CancellationToken,
    ) -> (Self, kanal::AsyncReceiver<ResponseItem>) {
        let (results_tx, results_rx) = kanal::bounded_async::<ResponseItem>(1024);
        let (requeue_tx, requeue_rx) = kanal::bounded_async::<RequestBatch>(256);

        let conns = (0..opts.pool_size.max(1))
            .map(|_| {
                spawn_connection(
                    ConnectionOptions {
                        endpoint: opts.endpoint.clone(),
                        auth: opts.auth.clone(),
                        retry: opts.retry.clone(),
                    },
                    results_tx.clone(),
                    requeue_tx.clone(),
                    bus.clone(),
                    cancel.child_token(),
                )
            })
            .collect();

        let inner = Arc::new(PoolInner {
            opts,
            conns,
            fallback,
            results_tx,
            bus,
            fallback_active: AtomicBool::new(false),
        });

        // Work handed back by failed connections is re-routed through the
        // normal dispatch path, which by then may choose the fallback.
        let pump_inner = Arc::clone(&inner);
        let pump_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                let batch = tokio::select! {
                    () = pump_cancel.cancelled() => return,
                    next = requeue_rx.recv() => match next {
                        Ok(batch) => batch,
                        Err(_) => return,
                    },
                };
                debug!(hashes = batch.hashes.len(), "re-routing requeued batch");
                if let Err(err) = pump_inner.dispatch(batch.kind, batch.hashes).await {
                    warn!(%err, "dropped requeued batch");
                }
            }
        });

        (Self { inner, cancel }, results_rx)
    }

    /// Dispatch a batch of same-kind requests across the pool.
    pub async fn send(&self, kind: AssetKind, hashes: Vec<AssetHash>) -> NetResult<()> {
        self.inner.dispatch(kind, hashes).await
    }

    /// Requests on the wire without an answer yet, across the whole pool.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner
            .conns
            .iter()
            .map(|c| c.shared.in_flight())
            .sum()
    }

    /// True once every pooled connection is permanently failed.
    #[must_use]
    pub fn all_failed(&self) -> bool {
        self.inner
            .conns
            .iter()
            .all(|c| c.shared.state() == ConnectionState::PermanentlyFailed)
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl PoolInner {
    async fn dispatch(&self, kind: AssetKind, hashes: Vec<AssetHash>) -> NetResult<()> {
        if hashes.is_empty() {
            return Ok(());
        }

        let live: Vec<&ConnectionHandle> = self
            .conns
            .iter()
            .filter(|c| c.shared.state() != ConnectionState::PermanentlyFailed)
            .collect();

        if live.is_empty() {
            self.fallback_dispatch(kind, hashes);
            return Ok(());
        }

        let loads: Vec<usize> = live.iter().map(|c| c.shared.in_flight()).collect();
        let mut give = balance::assign(&loads, hashes.len());
        balance::merge_small(&mut give, self.opts.min_batch);

        let mut remaining = hashes.into_iter();
        for (conn, count) in live.iter().zip(give) {
            if count == 0 {
                continue;
            }
            let share: Vec<AssetHash> = remaining.by_ref().take(count).collect();
            for chunk in share.chunks(self.opts.max_batch) {
                conn.batch_tx
                    .send(RequestBatch {
                        kind,
                        hashes: chunk.to_vec(),
                    })
                    .await
                    .map_err(|_| NetError::Closed { graceful: true })?;
            }
        }
        Ok(())
    }

    fn fallback_dispatch(&self, kind: AssetKind, hashes: Vec<AssetHash>) {
        if !self.fallback_active.swap(true, Ordering::Relaxed) {
            warn!(endpoint = %self.opts.endpoint, "socket pool exhausted, using HTTP fallback");
            self.bus.publish(NetEvent::FallbackActivated);
        }

        let fallback = Arc::clone(&self.fallback);
        let results_tx = self.results_tx.clone();
        tokio::spawn(async move {
            for hash in hashes {
                let body = match fallback.fetch(kind, hash).await {
                    Ok(bytes) => ResponseBody::Blob(bytes.to_vec()),
                    Err(err) => ResponseBody::Rejected {
                        code: err.status_code().unwrap_or(0),
                    },
                };
                if results_tx.send(ResponseItem { hash, kind, body }).await.is_err() {
                    return;
                }
            }
        });
    }
}
