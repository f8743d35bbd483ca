use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use futures::{SinkExt, StreamExt};
use lodestream_core::{AssetHash, AssetKind};
use lodestream_events::{EventBus, NetEvent};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio_util::{
    codec::{Framed, LengthDelimitedCodec},
    sync::CancellationToken,
};
use tracing::{debug, warn};

use crate::{
    NetError, NetResult,
    types::RetryPolicy,
    wire::{
        self, AuthContext, ClientMessage, RequestBatch, ResponseItem, ServerMessage, WIRE_VERSION,
    },
};

/// Lifecycle of one pooled connection.
///
/// ## Normative
/// - Transitions are driven only by the connection task itself; the pool
///   observes state but never mutates it.
/// - `Closed` after a graceful idle close is re-entrant: the task
///   reconnects lazily once new work arrives.
/// - `PermanentlyFailed` is terminal; queued work is handed back to the
///   pool for rerouting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
    PermanentlyFailed,
}

pub(crate) struct ConnectionShared {
    state: Mutex<ConnectionState>,
    /// Hashes sent on the wire and not yet answered, with the kind needed
    /// to rebuild a batch if this session dies before the answer arrives.
    outstanding: Mutex<HashMap<AssetHash, AssetKind>>,
    in_flight: AtomicUsize,
}

impl ConnectionShared {
    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Requests sent on the wire and not yet answered.
    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    fn record_sent(&self, batch: &RequestBatch) {
        let mut outstanding = self.outstanding.lock();
        for hash in &batch.hashes {
            outstanding.insert(*hash, batch.kind);
        }
        self.in_flight.store(outstanding.len(), Ordering::Relaxed);
    }

    fn record_answered(&self, hash: &AssetHash) {
        let mut outstanding = self.outstanding.lock();
        outstanding.remove(hash);
        self.in_flight.store(outstanding.len(), Ordering::Relaxed);
    }

    /// Take every unanswered hash, grouped back into per-kind batches.
    fn drain_unanswered(&self) -> Vec<RequestBatch> {
        let mut outstanding = self.outstanding.lock();
        let mut per_kind: HashMap<AssetKind, Vec<AssetHash>> = HashMap::new();
        for (hash, kind) in outstanding.drain() {
            per_kind.entry(kind).or_default().push(hash);
        }
        self.in_flight.store(0, Ordering::Relaxed);
        per_kind
            .into_iter()
            .map(|(kind, hashes)| RequestBatch { kind, hashes })
            .collect()
    }
}

pub(crate) struct ConnectionHandle {
    pub batch_tx: kanal::AsyncSender<RequestBatch>,
    pub shared: Arc<ConnectionShared>,
}

#[derive(Clone)]
pub(crate) struct ConnectionOptions {
    pub endpoint: String,
    pub auth: AuthContext,
    pub retry: RetryPolicy,
}

pub(crate) fn spawn_connection(
    opts: ConnectionOptions,
    results_tx: kanal::AsyncSender<ResponseItem>,
    requeue_tx: kanal::AsyncSender<RequestBatch>,
    bus: EventBus,
    cancel: CancellationToken,
) -> ConnectionHandle {
    let (batch_tx, batch_rx) = kanal::bounded_async::<RequestBatch>(64);
    let shared = Arc::new(ConnectionShared {
        state: Mutex::new(ConnectionState::Connecting),
        outstanding: Mutex::new(HashMap::new()),
        in_flight: AtomicUsize::new(0),
    });

    let task_shared = Arc::clone(&shared);
    tokio::spawn(async move {
        run(opts, batch_rx, results_tx, requeue_tx, bus, cancel, task_shared).await;
    });

    ConnectionHandle { batch_tx, shared }
}

enum IoEnd {
    /// Peer closed cleanly with nothing in flight.
    Graceful,
    /// Cancellation or pool teardown.
    Shutdown,
    Error(NetError),
}

async fn run(
    opts: ConnectionOptions,
    batch_rx: kanal::AsyncReceiver<RequestBatch>,
    results_tx: kanal::AsyncSender<ResponseItem>,
    requeue_tx: kanal::AsyncSender<RequestBatch>,
    bus: EventBus,
    cancel: CancellationToken,
    shared: Arc<ConnectionShared>,
) {
    let mut attempt: u32 = 0;
    let mut carry: Option<RequestBatch> = None;

    loop {
        shared.set_state(ConnectionState::Connecting);
        let established = tokio::select! {
            () = cancel.cancelled() => {
                shared.set_state(ConnectionState::Closed);
                return;
            }
            res = establish(&opts) => res,
        };

        match established {
            Ok(framed) => {
                attempt = 0;
                shared.set_state(ConnectionState::Open);
                bus.publish(NetEvent::ConnectionOpen {
                    endpoint: opts.endpoint.clone(),
                });

                match io_loop(framed, &mut carry, &batch_rx, &results_tx, &shared, &cancel).await {
                    IoEnd::Graceful => {
                        shared.set_state(ConnectionState::Closed);
                        bus.publish(NetEvent::ConnectionClosed {
                            endpoint: opts.endpoint.clone(),
                            graceful: true,
                        });
                        // Idle close is not an error: reconnect lazily once
                        // new work shows up.
                        tokio::select! {
                            () = cancel.cancelled() => return,
                            next = batch_rx.recv() => match next {
                                Ok(batch) => {
                                    carry = Some(batch);
                                    continue;
                                }
                                Err(_) => return,
                            }
                        }
                    }
                    IoEnd::Shutdown => {
                        shared.set_state(ConnectionState::Closed);
                        return;
                    }
                    IoEnd::Error(err) => {
                        warn!(endpoint = %opts.endpoint, %err, "connection dropped");
                        bus.publish(NetEvent::ConnectionClosed {
                            endpoint: opts.endpoint.clone(),
                            graceful: false,
                        });
                        // Requests already on the wire will never be
                        // answered by this session: hand them back to the
                        // pool so another route resolves them.
                        for batch in shared.drain_unanswered() {
                            let _ = requeue_tx.send(batch).await;
                        }
                    }
                }
            }
            Err(err) if !err.is_retryable() => {
                warn!(endpoint = %opts.endpoint, %err, "connection failed terminally");
                fail_permanently(&opts, &shared, &batch_rx, &requeue_tx, &bus, carry.take(), &cancel)
                    .await;
                return;
            }
            Err(err) => {
                debug!(endpoint = %opts.endpoint, %err, attempt, "connect attempt failed");
            }
        }

        attempt += 1;
        if attempt > opts.retry.max_retries {
            fail_permanently(&opts, &shared, &batch_rx, &requeue_tx, &bus, carry.take(), &cancel)
                .await;
            return;
        }

        let delay = opts.retry.delay_for_attempt(attempt);
        tokio::select! {
            () = cancel.cancelled() => {
                shared.set_state(ConnectionState::Closed);
                return;
            }
            () = tokio::time::sleep(delay) => {}
        }
    }
}

/// TCP connect plus authorization handshake.
async fn establish(opts: &ConnectionOptions) -> NetResult<Framed<TcpStream, LengthDelimitedCodec>> {
    let stream = TcpStream::connect(&opts.endpoint)
        .await
        .map_err(|e| NetError::connect(e.to_string()))?;
    let mut framed = Framed::new(stream, LengthDelimitedCodec::new());

    framed
        .send(wire::encode_client(&ClientMessage::Hello {
            version: WIRE_VERSION,
            auth: opts.auth.clone(),
        })?)
        .await
        .map_err(|e| NetError::Socket(e.to_string()))?;

    match framed.next().await {
        Some(Ok(frame)) => match wire::decode_server(&frame)? {
            ServerMessage::HelloAck {
                accepted_namespaces,
            } => {
                debug!(
                    endpoint = %opts.endpoint,
                    namespaces = accepted_namespaces.len(),
                    "handshake complete"
                );
                Ok(framed)
            }
            ServerMessage::Item(_) => Err(NetError::Handshake("item before hello ack".into())),
        },
        Some(Err(e)) => Err(NetError::Socket(e.to_string())),
        None => Err(NetError::Closed { graceful: false }),
    }
}

async fn io_loop(
    mut framed: Framed<TcpStream, LengthDelimitedCodec>,
    carry: &mut Option<RequestBatch>,
    batch_rx: &kanal::AsyncReceiver<RequestBatch>,
    results_tx: &kanal::AsyncSender<ResponseItem>,
    shared: &ConnectionShared,
    cancel: &CancellationToken,
) -> IoEnd {
    if let Some(batch) = carry.take() {
        if let Err(err) = send_batch(&mut framed, &batch, shared).await {
            *carry = Some(batch);
            return IoEnd::Error(err);
        }
    }

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                shared.set_state(ConnectionState::Closing);
                let _ = framed.close().await;
                return IoEnd::Shutdown;
            }
            next = batch_rx.recv() => match next {
                Ok(batch) => {
                    if let Err(err) = send_batch(&mut framed, &batch, shared).await {
                        *carry = Some(batch);
                        return IoEnd::Error(err);
                    }
                }
                Err(_) => {
                    shared.set_state(ConnectionState::Closing);
                    let _ = framed.close().await;
                    return IoEnd::Shutdown;
                }
            },
            frame = framed.next() => match frame {
                Some(Ok(bytes)) => match wire::decode_server(&bytes) {
                    Ok(ServerMessage::Item(item)) => {
                        shared.record_answered(&item.hash);
                        if results_tx.send(item).await.is_err() {
                            return IoEnd::Shutdown;
                        }
                    }
                    // Duplicate acks are harmless.
                    Ok(ServerMessage::HelloAck { .. }) => {}
                    Err(err) => return IoEnd::Error(err),
                },
                Some(Err(e)) => return IoEnd::Error(NetError::Socket(e.to_string())),
                None => {
                    return if shared.in_flight() == 0 {
                        IoEnd::Graceful
                    } else {
                        IoEnd::Error(NetError::Closed { graceful: false })
                    };
                }
            }
        }
    }
}

async fn send_batch(
    framed: &mut Framed<TcpStream, LengthDelimitedCodec>,
    batch: &RequestBatch,
    shared: &ConnectionShared,
) -> NetResult<()> {
    let frame = wire::encode_client(&ClientMessage::Request(batch.clone()))?;
    framed
        .send(frame)
        .await
        .map_err(|e| NetError::Socket(e.to_string()))?;
    shared.record_sent(batch);
    Ok(())
}

/// Retry budget exhausted or a terminal handshake rejection: hand queued
/// work back to the pool so it can be rerouted, and keep forwarding any
/// batch that races in after the state flip.
async fn fail_permanently(
    opts: &ConnectionOptions,
    shared: &ConnectionShared,
    batch_rx: &kanal::AsyncReceiver<RequestBatch>,
    requeue_tx: &kanal::AsyncSender<RequestBatch>,
    bus: &EventBus,
    carry: Option<RequestBatch>,
    cancel: &CancellationToken,
) {
    shared.set_state(ConnectionState::PermanentlyFailed);
    bus.publish(NetEvent::ConnectionClosed {
        endpoint: opts.endpoint.clone(),
        graceful: false,
    });

    if let Some(batch) = carry {
        let _ = requeue_tx.send(batch).await;
    }
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            next = batch_rx.recv() => match next {
                Ok(batch) => {
                    let _ = requeue_tx.send(batch).await;
                }
                Err(_) => return,
            }
        }
    }
}
