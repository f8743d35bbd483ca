use std::{sync::Arc, thread};

use bytes::Bytes;
use lodestream_core::{AssetHandle, AssetKind};
use tracing::{debug, trace, warn};

use crate::{
    DecodeError, DecodeOutcome, DecodeResult, DecodedAsset, codec::decompress_blob,
    geometry::Geometry, material::Material,
};

/// Decode pool configuration.
#[derive(Clone, Debug)]
pub struct DecodeOptions {
    /// Number of worker threads. Sized down on constrained devices.
    pub workers: usize,
    /// Byte threshold at which a pending geometry batch is flushed to the
    /// next worker. Keeps large bursts split across the whole pool.
    pub batch_flush_bytes: usize,
    /// Per-worker job queue depth.
    pub queue_depth: usize,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        let workers = thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(2)
            .clamp(1, 4);
        Self {
            workers,
            batch_flush_bytes: 512 * 1024,
            queue_depth: 8,
        }
    }
}

struct DecodeJob {
    items: Vec<(AssetHandle, Bytes)>,
}

/// Fixed-size pool of decode worker threads.
///
/// Dispatch is round-robin. Materials are dispatched individually;
/// geometries accumulate in a batch that flushes on a byte threshold or an
/// explicit [`flush`](Self::flush). Payloads are moved into the job — no
/// buffer is ever shared between the coordinator and a worker.
pub struct DecodePool {
    senders: Vec<kanal::AsyncSender<DecodeJob>>,
    joins: Vec<thread::JoinHandle<()>>,
    next: usize,
    pending: Vec<(AssetHandle, Bytes)>,
    pending_bytes: usize,
    flush_bytes: usize,
}

impl DecodePool {
    /// Spawn the pool. The returned receiver yields one outcome per
    /// submitted item, in completion order.
    #[must_use]
    pub fn spawn(opts: &DecodeOptions) -> (Self, kanal::AsyncReceiver<DecodeOutcome>) {
        let (out_tx, out_rx) = kanal::bounded_async::<DecodeOutcome>(opts.queue_depth * opts.workers * 4);

        let mut senders = Vec::with_capacity(opts.workers);
        let mut joins = Vec::with_capacity(opts.workers);
        for idx in 0..opts.workers.max(1) {
            let (tx, rx) = kanal::bounded_async::<DecodeJob>(opts.queue_depth);
            let worker_rx = rx.to_sync();
            let worker_out = out_tx.clone().to_sync();
            let join = thread::Builder::new()
                .name(format!("lodestream-decode-{idx}"))
                .spawn(move || worker_loop(idx, &worker_rx, &worker_out))
                .expect("spawning decode worker");
            senders.push(tx);
            joins.push(join);
        }

        debug!(workers = senders.len(), "decode pool started");
        (
            Self {
                senders,
                joins,
                next: 0,
                pending: Vec::new(),
                pending_bytes: 0,
                flush_bytes: opts.batch_flush_bytes,
            },
            out_rx,
        )
    }

    /// Materials skip batching: low volume, latency-sensitive.
    pub async fn submit_material(&mut self, handle: AssetHandle, blob: Bytes) -> DecodeResult<()> {
        self.dispatch(vec![(handle, blob)]).await
    }

    /// Queue a geometry blob; flushes automatically once the pending batch
    /// crosses the byte threshold.
    pub async fn submit_geometry(&mut self, handle: AssetHandle, blob: Bytes) -> DecodeResult<()> {
        self.pending_bytes += blob.len();
        self.pending.push((handle, blob));
        if self.pending_bytes >= self.flush_bytes {
            self.flush().await?;
        }
        Ok(())
    }

    /// Hand the pending geometry batch to the next worker.
    pub async fn flush(&mut self) -> DecodeResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let items = std::mem::take(&mut self.pending);
        self.pending_bytes = 0;
        self.dispatch(items).await
    }

    async fn dispatch(&mut self, items: Vec<(AssetHandle, Bytes)>) -> DecodeResult<()> {
        let slot = self.next;
        self.next = (self.next + 1) % self.senders.len();
        trace!(worker = slot, items = items.len(), "dispatch decode batch");
        self.senders[slot]
            .send(DecodeJob { items })
            .await
            .map_err(|_| DecodeError::PoolClosed)
    }

    /// Close all job channels and join the workers.
    pub fn shutdown(self) {
        drop(self.senders);
        for join in self.joins {
            if join.join().is_err() {
                warn!("decode worker panicked during shutdown");
            }
        }
    }
}

fn worker_loop(
    idx: usize,
    rx: &kanal::Receiver<DecodeJob>,
    out: &kanal::Sender<DecodeOutcome>,
) {
    while let Ok(job) = rx.recv() {
        for (handle, blob) in job.items {
            let result = decode_item(handle.kind, &blob);
            if out.send(DecodeOutcome { handle, result }).is_err() {
                // Coordinator went away; nothing left to do.
                return;
            }
        }
    }
    trace!(worker = idx, "decode worker exiting");
}

fn decode_item(kind: AssetKind, blob: &[u8]) -> DecodeResult<Arc<DecodedAsset>> {
    let raw = decompress_blob(blob)?;
    let decoded = match kind {
        AssetKind::Geometry => DecodedAsset::Geometry(Geometry::parse(&raw)?),
        AssetKind::Material => DecodedAsset::Material(Material::parse(&raw)?),
    };
    Ok(Arc::new(decoded))
}
