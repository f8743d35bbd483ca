//! End-to-end tests against a loopback asset service speaking the native
//! wire protocol.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use lodestream::{
    AssetHash, AssetKind, CacheError, CacheEvent, CacheOptions, DecodedAsset, Event, Geometry,
    ResourceCache, WaitOutcome,
};
use lodestream_decode::compress_blob;
use lodestream_net::wire::{self, ClientMessage, ResponseBody, ResponseItem, ServerMessage};
use tokio::net::TcpListener;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

type AssetTable = HashMap<AssetHash, (AssetKind, Vec<u8>)>;
type FetchLog = Arc<Mutex<Vec<AssetHash>>>;

/// Knobs for the loopback service.
#[derive(Clone, Copy, Default)]
struct ServiceTweaks {
    /// Sleep before answering each requested hash.
    response_delay: Option<Duration>,
    /// Drop the first session right after its first request batch, without
    /// answering. Later sessions serve normally.
    drop_first_session: bool,
}

/// Serve the given blobs over the socket protocol, logging every hash the
/// client asks for. Unknown hashes are rejected with a 404 code.
async fn spawn_service(assets: AssetTable) -> (String, FetchLog) {
    spawn_service_with(assets, ServiceTweaks::default()).await
}

async fn spawn_service_with(assets: AssetTable, tweaks: ServiceTweaks) -> (String, FetchLog) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = listener.local_addr().unwrap().to_string();
    let assets = Arc::new(assets);
    let log: FetchLog = Arc::new(Mutex::new(Vec::new()));

    let accept_log = log.clone();
    tokio::spawn(async move {
        let mut session = 0usize;
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let flaky = tweaks.drop_first_session && session == 0;
            session += 1;
            let assets = assets.clone();
            let log = accept_log.clone();
            tokio::spawn(async move {
                let mut framed = Framed::new(stream, LengthDelimitedCodec::new());
                while let Some(Ok(frame)) = framed.next().await {
                    match wire::decode_client(&frame).unwrap() {
                        ClientMessage::Hello { auth, .. } => {
                            let ack = ServerMessage::HelloAck {
                                accepted_namespaces: auth.namespaces,
                            };
                            framed
                                .send(wire::encode_server(&ack).unwrap())
                                .await
                                .unwrap();
                        }
                        ClientMessage::Request(batch) => {
                            for hash in &batch.hashes {
                                log.lock().unwrap().push(*hash);
                            }
                            if flaky {
                                // Swallow the batch and hang up.
                                return;
                            }
                            for hash in batch.hashes {
                                if let Some(delay) = tweaks.response_delay {
                                    tokio::time::sleep(delay).await;
                                }
                                let body = match assets.get(&hash) {
                                    Some((_, blob)) => ResponseBody::Blob(blob.clone()),
                                    None => ResponseBody::Rejected { code: 404 },
                                };
                                let item = ServerMessage::Item(ResponseItem {
                                    hash,
                                    kind: batch.kind,
                                    body,
                                });
                                framed
                                    .send(wire::encode_server(&item).unwrap())
                                    .await
                                    .unwrap();
                            }
                        }
                    }
                }
            });
        }
    });

    (endpoint, log)
}

fn test_options(endpoint: &str) -> CacheOptions {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let fallback = url::Url::parse("http://127.0.0.1:9/").unwrap();
    let mut opts = CacheOptions::new(endpoint, fallback);
    opts.pool_size = 1;
    opts.flight.sample_interval = Duration::from_millis(50);
    opts.decode.workers = 1;
    opts
}

fn geometry_blob(seed: u32, triangles: usize) -> (AssetHash, Vec<u8>) {
    let geo = Geometry {
        positions: (0..triangles * 9).map(|i| (seed + i as u32) as f32).collect(),
        normals: Vec::new(),
        uvs: Vec::new(),
        indices: (0..triangles as u32 * 3).collect(),
    };
    let blob = compress_blob(&geo.encode()).unwrap();
    (AssetHash::digest(&blob), blob)
}

fn material_blob(name: &str) -> (AssetHash, Vec<u8>) {
    let json = format!(r#"{{"name":"{name}","base_color":[1.0,0.5,0.5,1.0]}}"#);
    let blob = compress_blob(json.as_bytes()).unwrap();
    (AssetHash::digest(&blob), blob)
}

async fn next_cache_event(events: &mut tokio::sync::broadcast::Receiver<Event>) -> CacheEvent {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("event bus timed out")
            .expect("event bus closed");
        if let Event::Cache(cache_event) = event {
            return cache_event;
        }
    }
}

#[tokio::test]
async fn requested_assets_arrive_on_the_bus() {
    let (geo_hash, geo) = geometry_blob(1, 4);
    let (mat_hash, mat) = material_blob("brushed-steel");
    let mut assets = AssetTable::new();
    assets.insert(geo_hash, (AssetKind::Geometry, geo));
    assets.insert(mat_hash, (AssetKind::Material, mat));
    let (endpoint, _log) = spawn_service(assets).await;

    let cache = ResourceCache::start(test_options(&endpoint)).unwrap();
    let mut events = cache.events();
    cache.request_geometry(geo_hash, 1.0, 1).await.unwrap();
    cache.request_material(mat_hash, 0.5, 1).await.unwrap();

    let outcomes = cache
        .wait_for_assets(vec![geo_hash, mat_hash])
        .await
        .unwrap();
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|(_, o)| *o == WaitOutcome::Decoded));

    let mut received = HashSet::new();
    while received.len() < 2 {
        if let CacheEvent::AssetReceived { handle, payload } = next_cache_event(&mut events).await
        {
            if handle.hash == geo_hash {
                assert!(matches!(payload.as_ref(), DecodedAsset::Geometry(_)));
            } else {
                assert!(matches!(payload.as_ref(), DecodedAsset::Material(_)));
            }
            received.insert(handle.hash);
        }
    }
    cache.shutdown();
}

#[tokio::test]
async fn concurrent_requests_share_one_fetch() {
    let (hash, blob) = geometry_blob(2, 4);
    let mut assets = AssetTable::new();
    assets.insert(hash, (AssetKind::Geometry, blob));
    let (endpoint, log) = spawn_service(assets).await;

    let cache = ResourceCache::start(test_options(&endpoint)).unwrap();
    for consumer in 0..3 {
        cache.request_geometry(hash, 1.0, consumer).await.unwrap();
    }

    let outcomes = cache.wait_for_assets(vec![hash]).await.unwrap();
    assert_eq!(outcomes, vec![(hash, WaitOutcome::Decoded)]);

    let fetched = log.lock().unwrap().iter().filter(|h| **h == hash).count();
    assert_eq!(fetched, 1, "dedup must collapse concurrent requests");
    cache.shutdown();
}

#[tokio::test]
async fn failed_asset_sentinel_skips_refetch() {
    // Empty table: the service rejects everything.
    let (endpoint, log) = spawn_service(AssetTable::new()).await;
    let cache = ResourceCache::start(test_options(&endpoint)).unwrap();
    let mut events = cache.events();

    let hash = AssetHash::digest(b"no-such-asset");
    cache.request_geometry(hash, 1.0, 1).await.unwrap();
    let outcomes = cache.wait_for_assets(vec![hash]).await.unwrap();
    assert_eq!(outcomes, vec![(hash, WaitOutcome::Failed)]);

    // A repeat request is answered from the sentinel.
    cache.request_geometry(hash, 1.0, 2).await.unwrap();

    let mut failures = 0;
    while failures < 2 {
        if let CacheEvent::AssetFailed { handle, .. } = next_cache_event(&mut events).await {
            assert_eq!(handle.hash, hash);
            failures += 1;
        }
    }
    assert_eq!(log.lock().unwrap().len(), 1, "sentinel must not refetch");
    cache.shutdown();
}

#[tokio::test]
async fn cancel_after_dispatch_still_delivers() {
    let (hash, blob) = geometry_blob(3, 4);
    let mut assets = AssetTable::new();
    assets.insert(hash, (AssetKind::Geometry, blob));
    let (endpoint, _log) = spawn_service(assets).await;

    let cache = ResourceCache::start(test_options(&endpoint)).unwrap();
    cache.request_geometry(hash, 1.0, 1).await.unwrap();
    // The request was dispatched by the time the command returned, so the
    // cancel only drops the reference; the result is still cached.
    cache.cancel_requests(HashSet::from([hash])).await.unwrap();

    let outcomes = cache.wait_for_assets(vec![hash]).await.unwrap();
    assert_eq!(outcomes, vec![(hash, WaitOutcome::Decoded)]);
    cache.shutdown();
}

/// One concurrent request slot, so a second queued request observably
/// stays behind a slow first one.
fn single_slot_options(endpoint: &str) -> CacheOptions {
    let mut opts = test_options(endpoint);
    opts.flight.min_flight = 1;
    opts.flight.max_flight = 1;
    opts.flight.default_flight = 1;
    opts
}

#[tokio::test]
async fn connection_loss_refetches_inflight_assets() {
    let (hash, blob) = geometry_blob(7, 4);
    let mut assets = AssetTable::new();
    assets.insert(hash, (AssetKind::Geometry, blob));
    let tweaks = ServiceTweaks {
        drop_first_session: true,
        ..Default::default()
    };
    let (endpoint, log) = spawn_service_with(assets, tweaks).await;

    let cache = ResourceCache::start(test_options(&endpoint)).unwrap();
    cache.request_geometry(hash, 1.0, 1).await.unwrap();

    // The first session dies with the request unanswered; the rerouted
    // fetch on the next session must still resolve the wait.
    let outcomes = cache.wait_for_assets(vec![hash]).await.unwrap();
    assert_eq!(outcomes, vec![(hash, WaitOutcome::Decoded)]);

    let fetched = log.lock().unwrap().iter().filter(|h| **h == hash).count();
    assert_eq!(fetched, 2, "lost request must be dispatched again");
    cache.shutdown();
}

#[tokio::test]
async fn cancel_before_dispatch_keeps_shared_request_alive() {
    let (slow_hash, slow_blob) = geometry_blob(8, 4);
    let (shared_hash, shared_blob) = geometry_blob(9, 4);
    let mut assets = AssetTable::new();
    assets.insert(slow_hash, (AssetKind::Geometry, slow_blob));
    assets.insert(shared_hash, (AssetKind::Geometry, shared_blob));
    let tweaks = ServiceTweaks {
        response_delay: Some(Duration::from_millis(250)),
        ..Default::default()
    };
    let (endpoint, log) = spawn_service_with(assets, tweaks).await;

    let cache = ResourceCache::start(single_slot_options(&endpoint)).unwrap();
    // The slow asset pins the only slot, so the shared request is queued
    // but not yet dispatched.
    cache.request_geometry(slow_hash, 1.0, 1).await.unwrap();
    cache.request_geometry(shared_hash, 0.5, 1).await.unwrap();
    cache.request_geometry(shared_hash, 0.5, 2).await.unwrap();

    // One of two consumers cancels: the other still gets the asset.
    cache
        .cancel_requests(HashSet::from([shared_hash]))
        .await
        .unwrap();

    let outcomes = cache.wait_for_assets(vec![shared_hash]).await.unwrap();
    assert_eq!(outcomes, vec![(shared_hash, WaitOutcome::Decoded)]);
    let fetched = log
        .lock()
        .unwrap()
        .iter()
        .filter(|h| **h == shared_hash)
        .count();
    assert_eq!(fetched, 1);
    cache.shutdown();
}

#[tokio::test]
async fn cancelling_every_consumer_withdraws_queued_request() {
    let (slow_hash, slow_blob) = geometry_blob(10, 4);
    let (queued_hash, queued_blob) = geometry_blob(11, 4);
    let mut assets = AssetTable::new();
    assets.insert(slow_hash, (AssetKind::Geometry, slow_blob));
    assets.insert(queued_hash, (AssetKind::Geometry, queued_blob));
    let tweaks = ServiceTweaks {
        response_delay: Some(Duration::from_millis(250)),
        ..Default::default()
    };
    let (endpoint, log) = spawn_service_with(assets, tweaks).await;

    let cache = ResourceCache::start(single_slot_options(&endpoint)).unwrap();
    cache.request_geometry(slow_hash, 1.0, 1).await.unwrap();
    cache.request_geometry(queued_hash, 0.5, 1).await.unwrap();
    cache.request_geometry(queued_hash, 0.5, 2).await.unwrap();

    for _ in 0..2 {
        cache
            .cancel_requests(HashSet::from([queued_hash]))
            .await
            .unwrap();
    }

    // Withdrawn entirely: a wait resolves immediately as shed.
    let outcomes = cache.wait_for_assets(vec![queued_hash]).await.unwrap();
    assert_eq!(outcomes, vec![(queued_hash, WaitOutcome::Shed)]);

    // Let the slow asset land and the scheduler idle before checking that
    // the withdrawn request never hit the wire.
    cache.wait_for_assets(vec![slow_hash]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(
        !log.lock().unwrap().contains(&queued_hash),
        "withdrawn request must not be fetched"
    );
    cache.shutdown();
}

#[tokio::test]
async fn shed_event_names_the_dropped_requests() {
    // The referenced asset alone blows the memory cap, so the queued one
    // is shed rather than evicted.
    let (big_hash, big_blob) = geometry_blob(12, 1500);
    let (queued_hash, queued_blob) = geometry_blob(13, 4);
    let mut assets = AssetTable::new();
    assets.insert(big_hash, (AssetKind::Geometry, big_blob));
    assets.insert(queued_hash, (AssetKind::Geometry, queued_blob));
    let tweaks = ServiceTweaks {
        response_delay: Some(Duration::from_millis(250)),
        ..Default::default()
    };
    let (endpoint, _log) = spawn_service_with(assets, tweaks).await;

    let mut opts = single_slot_options(&endpoint);
    opts.memory_cap_bytes = 10_000;
    opts.min_reclaim_bytes = 1_000;
    opts.decode.batch_flush_bytes = 1;
    opts.flight.sample_interval = Duration::from_secs(5);
    let cache = ResourceCache::start(opts).unwrap();
    let mut events = cache.events();

    cache.request_geometry(big_hash, 1.0, 1).await.unwrap();
    cache.request_geometry(queued_hash, 0.5, 2).await.unwrap();

    loop {
        if let CacheEvent::AssetsShed { handles } = next_cache_event(&mut events).await {
            assert_eq!(handles.len(), 1);
            assert_eq!(handles[0].hash, queued_hash);
            assert_eq!(handles[0].kind, AssetKind::Geometry);
            break;
        }
    }
    cache.shutdown();
}

#[tokio::test]
async fn wait_on_unrequested_hash_resolves_shed() {
    let (endpoint, _log) = spawn_service(AssetTable::new()).await;
    let cache = ResourceCache::start(test_options(&endpoint)).unwrap();

    let hash = AssetHash::digest(b"never-requested");
    let outcomes = cache.wait_for_assets(vec![hash]).await.unwrap();
    assert_eq!(outcomes, vec![(hash, WaitOutcome::Shed)]);
    cache.shutdown();
}

#[tokio::test]
async fn restart_serves_from_disk_store() {
    let dir = tempfile::tempdir().unwrap();
    let (hash, blob) = geometry_blob(4, 4);
    let mut assets = AssetTable::new();
    assets.insert(hash, (AssetKind::Geometry, blob));
    let (endpoint, log) = spawn_service(assets).await;

    let opts = test_options(&endpoint).with_cache_dir(dir.path());
    let cache = ResourceCache::start(opts.clone()).unwrap();
    cache.request_geometry(hash, 1.0, 1).await.unwrap();
    cache.wait_for_assets(vec![hash]).await.unwrap();
    cache.shutdown();
    // Let the coordinator run its final store flush.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let cache = ResourceCache::start(opts).unwrap();
    cache.request_geometry(hash, 1.0, 1).await.unwrap();
    let outcomes = cache.wait_for_assets(vec![hash]).await.unwrap();
    assert_eq!(outcomes, vec![(hash, WaitOutcome::Decoded)]);
    assert_eq!(
        log.lock().unwrap().len(),
        1,
        "second session must be served from disk"
    );
    cache.shutdown();
}

#[tokio::test]
async fn eviction_reclaims_unreferenced_assets() {
    // Two 72 KB decoded geometries against a 100 KB cap.
    let (a_hash, a_blob) = geometry_blob(5, 1500);
    let (b_hash, b_blob) = geometry_blob(6, 1500);
    let mut assets = AssetTable::new();
    assets.insert(a_hash, (AssetKind::Geometry, a_blob));
    assets.insert(b_hash, (AssetKind::Geometry, b_blob));
    let (endpoint, _log) = spawn_service(assets).await;

    let mut opts = test_options(&endpoint);
    opts.memory_cap_bytes = 100_000;
    opts.min_reclaim_bytes = 20_000;
    let cache = ResourceCache::start(opts).unwrap();
    let mut events = cache.events();

    cache.request_geometry(a_hash, 1.0, 1).await.unwrap();
    cache.wait_for_assets(vec![a_hash]).await.unwrap();
    cache.cancel_requests(HashSet::from([a_hash])).await.unwrap();

    // Inserting the second asset pushes residency past the cap; the only
    // unreferenced entry is the first one.
    cache.request_geometry(b_hash, 1.0, 1).await.unwrap();
    cache.wait_for_assets(vec![b_hash]).await.unwrap();

    loop {
        if let CacheEvent::EvictionPass {
            evicted,
            reclaimed_bytes,
        } = next_cache_event(&mut events).await
        {
            assert!(evicted >= 1);
            assert!(reclaimed_bytes > 0);
            break;
        }
    }
    cache.shutdown();
}

#[tokio::test]
async fn removing_last_viewer_shuts_down() {
    let (endpoint, _log) = spawn_service(AssetTable::new()).await;
    let cache = ResourceCache::start(test_options(&endpoint)).unwrap();

    let viewer = cache.add_viewer().await.unwrap();
    cache.remove_viewer(viewer).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let err = cache
        .request_geometry(AssetHash::digest(b"late"), 1.0, 1)
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::ShutDown));
}
