//! Single-task coordinator owning all cache state.
//!
//! Every mutation flows through the command channel, so there are no locks
//! around the resident map, the pending set, or the scheduler. The loop
//! multiplexes four inputs: commands from [`ResourceCache`](crate::ResourceCache)
//! handles, resolved blobs from the socket pool, decoded payloads from the
//! worker pool, and the congestion-sampling tick.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use lodestream_core::{AssetHandle, AssetHash, AssetKind};
use lodestream_decode::{DecodeOutcome, DecodePool, DecodedAsset};
use lodestream_events::{CacheEvent, EventBus, NetEvent};
use lodestream_flight::{FlightController, FlightSource, TickOutcome};
use lodestream_net::wire::{ResponseBody, ResponseItem};
use lodestream_net::{PoolOptions, SocketPool};
use lodestream_store::{
    BlobStore, DisabledStore, DiskBlobStore, DiskStoreOptions, MembershipEstimate,
    MembershipVerdict,
};
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::entry::{CacheEntry, Resident};
use crate::error::CacheResult;
use crate::options::CacheOptions;
use crate::queue::PriorityQueue;

/// Opaque identifier a caller passes with each request so later results can
/// be attributed back to it.
pub type ConsumerId = u64;

/// Handle identifying one registered viewer of the cache.
pub type ViewerId = u64;

/// Terminal outcome reported by [`wait_for_assets`](crate::ResourceCache::wait_for_assets).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The asset is decoded and resident.
    Decoded,
    /// The asset failed terminally; the failure sentinel is resident.
    Failed,
    /// The request was shed under memory pressure (or was never made);
    /// asking again retries it.
    Shed,
}

pub(crate) enum Command {
    Request {
        handle: AssetHandle,
        importance: f32,
        consumer: ConsumerId,
    },
    Insert {
        handle: AssetHandle,
        payload: Arc<DecodedAsset>,
    },
    Cancel {
        hashes: HashSet<AssetHash>,
    },
    Wait {
        hashes: Vec<AssetHash>,
        reply: oneshot::Sender<Vec<(AssetHash, WaitOutcome)>>,
    },
    UpdateImportance {
        scores: Vec<(AssetHash, f32)>,
    },
    AddViewer {
        reply: oneshot::Sender<ViewerId>,
    },
    RemoveViewer {
        id: ViewerId,
    },
    Clear {
        reply: oneshot::Sender<()>,
    },
}

/// A requested-but-not-resident hash. The map key is the dedup point:
/// concurrent requests for one hash share a single entry and a single
/// fetch, with `ref_count` tracking interested callers.
struct PendingRequest {
    handle: AssetHandle,
    waiters: Vec<ConsumerId>,
    ref_count: usize,
    importance: f32,
    dispatched: bool,
}

struct WaitTicket {
    remaining: HashSet<AssetHash>,
    results: Vec<(AssetHash, WaitOutcome)>,
    reply: Option<oneshot::Sender<Vec<(AssetHash, WaitOutcome)>>>,
}

pub(crate) struct Coordinator {
    opts: CacheOptions,
    bus: EventBus,
    cancel: CancellationToken,

    entries: HashMap<AssetHash, Resident>,
    resident_bytes: u64,
    pending: HashMap<AssetHash, PendingRequest>,
    queue: PriorityQueue,

    flight: FlightController,
    in_flight: usize,
    sample_bytes: u64,
    sample_count: u64,
    last_flight: usize,

    store: Arc<dyn BlobStore>,
    membership: MembershipEstimate,

    pool: SocketPool,
    decode: DecodePool,

    tickets: Vec<WaitTicket>,
    viewers: HashSet<ViewerId>,
    next_viewer: ViewerId,
}

pub(crate) struct CoordinatorChannels {
    pub net_rx: kanal::AsyncReceiver<ResponseItem>,
    pub decode_rx: kanal::AsyncReceiver<DecodeOutcome>,
}

impl Coordinator {
    pub fn new(
        opts: CacheOptions,
        bus: EventBus,
        cancel: CancellationToken,
    ) -> CacheResult<(Self, CoordinatorChannels)> {
        let store: Arc<dyn BlobStore> = match &opts.cache_dir {
            Some(dir) => {
                let mut store_opts = DiskStoreOptions::new(dir.clone());
                store_opts.max_bytes = opts.store_max_bytes;
                Arc::new(DiskBlobStore::open(store_opts)?)
            }
            None => Arc::new(DisabledStore),
        };
        let membership = store.membership()?;

        let mut pool_opts = PoolOptions::new(opts.endpoint.clone(), opts.fallback_url.clone())
            .with_pool_size(opts.pool_size)
            .with_auth(opts.auth.clone());
        pool_opts.max_batch = opts.max_batch;
        pool_opts.retry = opts.retry.clone();
        let (pool, net_rx) = SocketPool::connect(pool_opts, bus.clone(), cancel.child_token());

        let (decode, decode_rx) = DecodePool::spawn(&opts.decode);

        let flight = FlightController::new(opts.flight.clone());
        let last_flight = flight.flight_size();

        Ok((
            Self {
                opts,
                bus,
                cancel,
                entries: HashMap::new(),
                resident_bytes: 0,
                pending: HashMap::new(),
                queue: PriorityQueue::new(),
                flight,
                in_flight: 0,
                sample_bytes: 0,
                sample_count: 0,
                last_flight,
                store,
                membership,
                pool,
                decode,
                tickets: Vec::new(),
                viewers: HashSet::new(),
                next_viewer: 0,
            },
            CoordinatorChannels { net_rx, decode_rx },
        ))
    }

    pub async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<Command>,
        channels: CoordinatorChannels,
    ) -> CacheResult<()> {
        let cancel = self.cancel.clone();
        let net_rx = channels.net_rx;
        let decode_rx = channels.decode_rx;

        let mut tick = tokio::time::interval(self.opts.flight.sample_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                cmd = cmd_rx.recv() => match cmd {
                    Some(cmd) => {
                        if self.handle_command(cmd).await? {
                            break;
                        }
                    }
                    None => break,
                },
                item = net_rx.recv() => match item {
                    Ok(item) => self.on_net_item(item).await?,
                    Err(_) => break,
                },
                outcome = decode_rx.recv() => match outcome {
                    Ok(outcome) => self.on_decoded(outcome),
                    Err(_) => break,
                },
                _ = tick.tick() => self.on_tick().await?,
            }
        }

        info!("coordinator shutting down");
        if let Err(err) = self.store.flush() {
            warn!(%err, "final store flush failed");
        }
        self.pool.shutdown();
        self.decode.shutdown();
        self.cancel.cancel();
        Ok(())
    }

    async fn handle_command(&mut self, cmd: Command) -> CacheResult<bool> {
        match cmd {
            Command::Request {
                handle,
                importance,
                consumer,
            } => self.request_asset(handle, importance, consumer).await?,
            Command::Insert { handle, payload } => self.insert_asset(handle, payload),
            Command::Cancel { hashes } => self.cancel_requests(&hashes),
            Command::Wait { hashes, reply } => self.wait_for_assets(hashes, reply).await?,
            Command::UpdateImportance { scores } => self.update_importance(scores),
            Command::AddViewer { reply } => {
                let id = self.next_viewer;
                self.next_viewer += 1;
                self.viewers.insert(id);
                let _ = reply.send(id);
            }
            Command::RemoveViewer { id } => {
                self.viewers.remove(&id);
                if self.viewers.is_empty() {
                    debug!("last viewer removed");
                    return Ok(true);
                }
            }
            Command::Clear { reply } => {
                self.clear()?;
                let _ = reply.send(());
            }
        }
        Ok(false)
    }

    async fn request_asset(
        &mut self,
        handle: AssetHandle,
        importance: f32,
        consumer: ConsumerId,
    ) -> CacheResult<()> {
        let hash = handle.hash;
        match self.entries.get_mut(&hash) {
            Some(Resident::Decoded(entry)) => {
                entry.ref_count += 1;
                if importance > entry.importance {
                    entry.importance = importance;
                }
                let payload = entry.payload.clone();
                self.bus.publish(CacheEvent::AssetReceived { handle, payload });
                return Ok(());
            }
            Some(Resident::Failed(error)) => {
                // Error sentinel: announce again, never refetch.
                let error = error.clone();
                self.bus.publish(CacheEvent::AssetFailed { handle, error });
                return Ok(());
            }
            None => {}
        }

        if let Some(p) = self.pending.get_mut(&hash) {
            p.ref_count += 1;
            p.waiters.push(consumer);
            if importance > p.importance {
                p.importance = importance;
                if !p.dispatched {
                    self.queue.push(hash, importance);
                }
            }
            return Ok(());
        }

        self.pending.insert(
            hash,
            PendingRequest {
                handle,
                waiters: vec![consumer],
                ref_count: 1,
                importance,
                dispatched: false,
            },
        );
        self.queue.push(hash, importance);
        self.dispatch_pass().await
    }

    fn cancel_requests(&mut self, hashes: &HashSet<AssetHash>) {
        for hash in hashes {
            if let Some(p) = self.pending.get_mut(hash) {
                p.ref_count = p.ref_count.saturating_sub(1);
                if p.ref_count == 0 && !p.dispatched {
                    self.pending.remove(hash);
                    self.queue.remove(hash);
                }
                // Already-dispatched requests complete normally; the result
                // is still cached for whoever asks next.
                continue;
            }
            if let Some(Resident::Decoded(entry)) = self.entries.get_mut(hash) {
                entry.ref_count = entry.ref_count.saturating_sub(1);
            }
        }
    }

    async fn wait_for_assets(
        &mut self,
        hashes: Vec<AssetHash>,
        reply: oneshot::Sender<Vec<(AssetHash, WaitOutcome)>>,
    ) -> CacheResult<()> {
        let mut results = Vec::new();
        let mut remaining = HashSet::new();
        for hash in hashes {
            match self.entries.get(&hash) {
                Some(Resident::Decoded(_)) => results.push((hash, WaitOutcome::Decoded)),
                Some(Resident::Failed(_)) => results.push((hash, WaitOutcome::Failed)),
                None => {
                    if self.pending.contains_key(&hash) {
                        self.queue.promote_urgent(&hash);
                        remaining.insert(hash);
                    } else {
                        // Never requested: resolve immediately rather than
                        // blocking the caller on a fetch nobody scheduled.
                        results.push((hash, WaitOutcome::Shed));
                    }
                }
            }
        }
        if remaining.is_empty() {
            let _ = reply.send(results);
            return Ok(());
        }
        self.tickets.push(WaitTicket {
            remaining,
            results,
            reply: Some(reply),
        });
        self.dispatch_pass().await
    }

    fn update_importance(&mut self, scores: Vec<(AssetHash, f32)>) {
        for (hash, importance) in scores {
            if let Some(p) = self.pending.get_mut(&hash) {
                p.importance = importance;
                self.queue.update_importance(&hash, importance);
            } else if let Some(Resident::Decoded(entry)) = self.entries.get_mut(&hash) {
                entry.importance = importance;
            }
        }
    }

    async fn on_net_item(&mut self, item: ResponseItem) -> CacheResult<()> {
        self.in_flight = self.in_flight.saturating_sub(1);
        let handle = AssetHandle::new(item.hash, item.kind);
        match item.body {
            ResponseBody::Blob(blob) => {
                self.sample_bytes += blob.len() as u64;
                self.sample_count += 1;
                if let Err(err) = self.store.put(&item.hash, &blob) {
                    warn!(%err, hash = %item.hash, "persisting blob failed");
                }
                self.submit_decode(handle, Bytes::from(blob)).await?;
            }
            ResponseBody::Rejected { code } => {
                warn!(hash = %item.hash, code, "service rejected asset");
                self.fail_asset(handle, format!("rejected by service (code {code})"));
            }
        }
        Ok(())
    }

    async fn submit_decode(&mut self, handle: AssetHandle, blob: Bytes) -> CacheResult<()> {
        match handle.kind {
            AssetKind::Geometry => self.decode.submit_geometry(handle, blob).await?,
            AssetKind::Material => self.decode.submit_material(handle, blob).await?,
        }
        Ok(())
    }

    fn on_decoded(&mut self, outcome: DecodeOutcome) {
        match outcome.result {
            Ok(payload) => self.insert_asset(outcome.handle, payload),
            Err(err) => self.fail_asset(outcome.handle, err.to_string()),
        }
    }

    fn insert_asset(&mut self, handle: AssetHandle, payload: Arc<DecodedAsset>) {
        let hash = handle.hash;
        if matches!(self.entries.get(&hash), Some(Resident::Decoded(_))) {
            // Content addressing makes repeat inserts no-ops.
            self.pending.remove(&hash);
            self.settle_waiters(hash, WaitOutcome::Decoded);
            return;
        }
        let byte_size = payload.byte_size();
        let (ref_count, importance) = match self.pending.remove(&hash) {
            Some(p) => {
                debug!(hash = %hash, waiters = p.waiters.len(), byte_size, "asset resident");
                (p.ref_count, p.importance)
            }
            None => (0, 0.0),
        };
        self.entries.insert(
            hash,
            Resident::Decoded(CacheEntry {
                handle,
                payload: payload.clone(),
                byte_size,
                ref_count,
                importance,
            }),
        );
        self.resident_bytes += byte_size;
        self.bus.publish(CacheEvent::AssetReceived { handle, payload });
        self.settle_waiters(hash, WaitOutcome::Decoded);
        self.evict_if_needed();
    }

    fn fail_asset(&mut self, handle: AssetHandle, error: String) {
        let hash = handle.hash;
        self.pending.remove(&hash);
        self.queue.remove(&hash);
        self.entries.insert(hash, Resident::Failed(error.clone()));
        self.bus.publish(CacheEvent::AssetFailed { handle, error });
        self.settle_waiters(hash, WaitOutcome::Failed);
    }

    fn settle_waiters(&mut self, hash: AssetHash, outcome: WaitOutcome) {
        for ticket in &mut self.tickets {
            if ticket.remaining.remove(&hash) {
                ticket.results.push((hash, outcome));
                if ticket.remaining.is_empty()
                    && let Some(reply) = ticket.reply.take()
                {
                    let _ = reply.send(std::mem::take(&mut ticket.results));
                }
            }
        }
        self.tickets.retain(|t| t.reply.is_some());
    }

    async fn on_tick(&mut self) -> CacheResult<()> {
        // Only feed the window while a load session is active; idle frames
        // with nothing outstanding are not stalls.
        if self.in_flight > 0 || self.sample_count > 0 {
            let bytes = std::mem::take(&mut self.sample_bytes);
            let count = std::mem::take(&mut self.sample_count);
            let outcome = self.flight.on_sample(Instant::now(), bytes, count);
            if outcome == TickOutcome::Stall {
                self.bus.publish(NetEvent::StallDetected);
            }
            let flight_size = self.flight.flight_size();
            if flight_size != self.last_flight {
                self.last_flight = flight_size;
                self.bus.publish(NetEvent::FlightResized { flight_size });
            }
        }
        self.membership = self.store.membership()?;
        self.decode.flush().await?;
        self.dispatch_pass().await
    }

    /// Pull as many queued requests as the congestion window allows,
    /// serving store hits locally and batching the misses to the pool.
    async fn dispatch_pass(&mut self) -> CacheResult<()> {
        let budget = self.flight.flight_size().saturating_sub(self.in_flight);
        let mut geometries = Vec::new();
        let mut materials = Vec::new();
        let mut store_hits: Vec<(AssetHandle, Vec<u8>)> = Vec::new();

        for _ in 0..budget {
            let Some(hash) = self.queue.pop() else { break };
            let Some(p) = self.pending.get_mut(&hash) else {
                continue;
            };
            p.dispatched = true;
            let handle = p.handle;

            if self.membership.check(&hash) == MembershipVerdict::PossiblyPresent {
                match self.store.get(&hash) {
                    Ok(Some(blob)) => {
                        store_hits.push((handle, blob));
                        continue;
                    }
                    Ok(None) => {}
                    Err(err) => warn!(%err, hash = %hash, "store read failed"),
                }
            }

            self.in_flight += 1;
            match handle.kind {
                AssetKind::Geometry => geometries.push(hash),
                AssetKind::Material => materials.push(hash),
            }
        }

        for (handle, blob) in store_hits {
            self.submit_decode(handle, Bytes::from(blob)).await?;
        }
        if !materials.is_empty() {
            self.pool.send(AssetKind::Material, materials).await?;
        }
        if !geometries.is_empty() {
            self.pool.send(AssetKind::Geometry, geometries).await?;
        }
        self.decode.flush().await?;
        Ok(())
    }

    fn evict_if_needed(&mut self) {
        let cap = self.opts.memory_cap_bytes;
        if self.resident_bytes <= cap {
            return;
        }
        // Reclaim past the cap so a burst of loads does not re-trigger a
        // pass per insert.
        let target = cap.saturating_sub(self.opts.min_reclaim_bytes);

        let mut victims: Vec<(AssetHash, f32, u64)> = self
            .entries
            .iter()
            .filter_map(|(hash, resident)| match resident {
                Resident::Decoded(entry) if entry.ref_count == 0 => {
                    Some((*hash, entry.importance, entry.byte_size))
                }
                _ => None,
            })
            .collect();
        victims.sort_by(|a, b| a.1.total_cmp(&b.1));

        let mut evicted = 0usize;
        let mut reclaimed = 0u64;
        for (hash, _, byte_size) in victims {
            if self.resident_bytes <= target {
                break;
            }
            self.entries.remove(&hash);
            self.resident_bytes = self.resident_bytes.saturating_sub(byte_size);
            evicted += 1;
            reclaimed += byte_size;
        }
        if evicted > 0 {
            debug!(evicted, reclaimed, "eviction pass");
            self.bus.publish(CacheEvent::EvictionPass {
                evicted,
                reclaimed_bytes: reclaimed,
            });
        }

        if self.resident_bytes > cap {
            self.shed_pending();
        }
    }

    /// Last-resort pressure valve: drop queued requests that have not been
    /// dispatched yet. Shedding is soft, so no sentinel is written.
    fn shed_pending(&mut self) {
        let shed: Vec<AssetHandle> = self
            .pending
            .iter()
            .filter(|(_, p)| !p.dispatched)
            .map(|(_, p)| p.handle)
            .collect();
        if shed.is_empty() {
            return;
        }
        for handle in &shed {
            self.pending.remove(&handle.hash);
            self.queue.remove(&handle.hash);
            self.settle_waiters(handle.hash, WaitOutcome::Shed);
        }
        warn!(count = shed.len(), "shed pending requests under memory pressure");
        self.bus.publish(CacheEvent::AssetsShed { handles: shed });
    }

    fn clear(&mut self) -> CacheResult<()> {
        // Referenced entries survive; sentinels and unreferenced payloads go.
        self.entries.retain(|_, resident| match resident {
            Resident::Decoded(entry) => entry.ref_count > 0,
            Resident::Failed(_) => false,
        });
        self.resident_bytes = self
            .entries
            .values()
            .map(|resident| match resident {
                Resident::Decoded(entry) => entry.byte_size,
                Resident::Failed(_) => 0,
            })
            .sum();
        self.store.clear()?;
        self.membership = self.store.membership()?;
        Ok(())
    }
}
