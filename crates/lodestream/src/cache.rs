//! Public cache handle.

use std::collections::HashSet;
use std::sync::Arc;

use lodestream_core::{AssetHandle, AssetHash};
use lodestream_decode::DecodedAsset;
use lodestream_events::{Event, EventBus};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::coordinator::{Command, ConsumerId, Coordinator, ViewerId, WaitOutcome};
use crate::error::{CacheError, CacheResult};
use crate::options::CacheOptions;

const COMMAND_DEPTH: usize = 256;

/// Streaming cache for content-addressed geometry and material assets.
///
/// Cloning the handle is cheap; all clones talk to the same coordinator
/// task. Results and failures are announced on the [`EventBus`], never
/// returned inline, so many consumers can share one fetch.
///
/// The cache shuts down when the cancellation token fires or when the last
/// registered viewer is removed.
#[derive(Clone)]
pub struct ResourceCache {
    cmd_tx: mpsc::Sender<Command>,
    bus: EventBus,
    cancel: CancellationToken,
}

impl ResourceCache {
    /// Open the store, spawn the socket pool, the decode workers, and the
    /// coordinator task. Must be called within a tokio runtime.
    pub fn start(opts: CacheOptions) -> CacheResult<Self> {
        let bus = EventBus::new(opts.event_capacity);
        let cancel = opts.cancel.clone().unwrap_or_default();
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_DEPTH);

        let (coordinator, channels) = Coordinator::new(opts, bus.clone(), cancel.clone())?;
        tokio::spawn(async move {
            if let Err(err) = coordinator.run(cmd_rx, channels).await {
                error!(%err, "coordinator exited with error");
            }
        });

        Ok(Self {
            cmd_tx,
            bus,
            cancel,
        })
    }

    /// The bus carrying every cache and transport event.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Subscribe to cache and transport events.
    pub fn events(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    /// Request a geometry asset. Deduplicated against any in-progress
    /// request for the same hash; delivery is via the event bus.
    pub async fn request_geometry(
        &self,
        hash: AssetHash,
        importance: f32,
        consumer: ConsumerId,
    ) -> CacheResult<()> {
        self.send(Command::Request {
            handle: AssetHandle::geometry(hash),
            importance,
            consumer,
        })
        .await
    }

    /// Request a material asset. See [`request_geometry`](Self::request_geometry).
    pub async fn request_material(
        &self,
        hash: AssetHash,
        importance: f32,
        consumer: ConsumerId,
    ) -> CacheResult<()> {
        self.send(Command::Request {
            handle: AssetHandle::material(hash),
            importance,
            consumer,
        })
        .await
    }

    /// Insert an already-decoded geometry, bypassing fetch and decode.
    /// A second insert for a resident hash is a no-op.
    pub async fn add_geometry(
        &self,
        hash: AssetHash,
        payload: Arc<DecodedAsset>,
    ) -> CacheResult<()> {
        self.send(Command::Insert {
            handle: AssetHandle::geometry(hash),
            payload,
        })
        .await
    }

    /// Insert an already-decoded material. See [`add_geometry`](Self::add_geometry).
    pub async fn add_material(
        &self,
        hash: AssetHash,
        payload: Arc<DecodedAsset>,
    ) -> CacheResult<()> {
        self.send(Command::Insert {
            handle: AssetHandle::material(hash),
            payload,
        })
        .await
    }

    /// Drop one reference per listed hash. A pending request whose count
    /// reaches zero before dispatch is withdrawn; anything already on the
    /// wire completes and is cached normally.
    pub async fn cancel_requests(&self, hashes: HashSet<AssetHash>) -> CacheResult<()> {
        self.send(Command::Cancel { hashes }).await
    }

    /// Block until every listed hash reaches a terminal state. Listed
    /// hashes that are still queued jump to the front of the scheduler.
    pub async fn wait_for_assets(
        &self,
        hashes: Vec<AssetHash>,
    ) -> CacheResult<Vec<(AssetHash, WaitOutcome)>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Wait { hashes, reply }).await?;
        rx.await.map_err(|_| CacheError::ShutDown)
    }

    /// Re-score queued and resident assets, reordering the scheduler.
    pub async fn update_importance(&self, scores: Vec<(AssetHash, f32)>) -> CacheResult<()> {
        self.send(Command::UpdateImportance { scores }).await
    }

    /// Register a viewer. The cache stays alive while at least one viewer
    /// is registered.
    pub async fn add_viewer(&self) -> CacheResult<ViewerId> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::AddViewer { reply }).await?;
        rx.await.map_err(|_| CacheError::ShutDown)
    }

    /// Remove a viewer. Removing the last one shuts the cache down.
    pub async fn remove_viewer(&self, id: ViewerId) -> CacheResult<()> {
        self.send(Command::RemoveViewer { id }).await
    }

    /// Drop every error sentinel and unreferenced resident asset and wipe
    /// the persistent store. Referenced entries and in-flight requests are
    /// unaffected.
    pub async fn clear(&self) -> CacheResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Clear { reply }).await?;
        rx.await.map_err(|_| CacheError::ShutDown)
    }

    /// Cancel everything and stop the coordinator.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    async fn send(&self, cmd: Command) -> CacheResult<()> {
        self.cmd_tx.send(cmd).await.map_err(|_| CacheError::ShutDown)
    }
}
