use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stride_core::{
    ActivitySink, Clock, ConnectivityState, DeliveryError, EngineConfig, EngineDeps, KeyValueStore,
    ManualClock, ManualLocationProvider, MemoryStore, NetworkKind, PendingActivity, PendingQueue,
    PermissionStatus, Sample, SessionEnd, SessionPhase, StrideEngine, StrideError,
    WatchNetworkMonitor,
};
use stride_protocol::{ActivityStatus, ConnectionKind, SaveActivityRequest, SaveMethod};

#[derive(Default)]
struct RecordingSink {
    requests: Mutex<Vec<SaveActivityRequest>>,
    attempts: AtomicUsize,
    /// How many upcoming deliveries fail before the sink starts accepting.
    fail_next: AtomicUsize,
}

#[async_trait]
impl ActivitySink for RecordingSink {
    async fn deliver(&self, request: &SaveActivityRequest) -> Result<(), DeliveryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(DeliveryError::Network("connection reset".to_string()));
        }
        self.requests
            .lock()
            .expect("sink lock")
            .push(request.clone());
        Ok(())
    }
}

impl RecordingSink {
    fn count(&self) -> usize {
        self.requests.lock().expect("sink lock").len()
    }

    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

struct Rig {
    engine: StrideEngine,
    location: Arc<ManualLocationProvider>,
    network: Arc<WatchNetworkMonitor>,
    sink: Arc<RecordingSink>,
    clock: Arc<ManualClock>,
    store: Arc<dyn KeyValueStore>,
}

struct RigOptions {
    store: Arc<dyn KeyValueStore>,
    permission: PermissionStatus,
    connectivity: ConnectivityState,
    user_id: &'static str,
    periodic_secs: u64,
    failing_deliveries: usize,
}

impl RigOptions {
    fn new(connectivity: ConnectivityState) -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            permission: PermissionStatus::Granted,
            connectivity,
            user_id: "runner-7",
            periodic_secs: 0,
            failing_deliveries: 0,
        }
    }

    fn build(self) -> Rig {
        let location = Arc::new(ManualLocationProvider::new(self.permission));
        let network = Arc::new(WatchNetworkMonitor::new(self.connectivity));
        let sink = Arc::new(RecordingSink::default());
        sink.fail_next.store(self.failing_deliveries, Ordering::SeqCst);
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 9, 12, 18, 0, 0).unwrap(),
        ));

        let mut config = EngineConfig::default();
        config.sync.periodic_interval_secs = self.periodic_secs;

        let store = self.store;
        let engine = StrideEngine::init(
            config,
            EngineDeps {
                store: store.clone(),
                location: location.clone(),
                network: network.clone(),
                sink: sink.clone(),
                clock: clock.clone(),
                user_id: self.user_id.to_string(),
            },
        );
        Rig {
            engine,
            location,
            network,
            sink,
            clock,
            store,
        }
    }
}

fn rig_with(
    store: Arc<dyn KeyValueStore>,
    permission: PermissionStatus,
    connectivity: ConnectivityState,
) -> Rig {
    RigOptions {
        store,
        permission,
        ..RigOptions::new(connectivity)
    }
    .build()
}

fn queued_walk(id: &str) -> PendingActivity {
    PendingActivity {
        id: id.to_string(),
        distance_km: 2.4,
        duration_sec: 1800,
        route: vec![],
        occurred_at: Utc.with_ymd_and_hms(2026, 9, 11, 7, 0, 0).unwrap(),
        connection_at_save: ConnectionKind::Offline,
        save_method: SaveMethod::OfflineThenSynced,
        status: ActivityStatus::Valida,
        invalid_reason: None,
        avg_speed_kmh: 4.8,
    }
}

fn store_with_queued(ids: &[&str]) -> Arc<dyn KeyValueStore> {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let mut queue = PendingQueue::load(store.clone(), "runner-7");
    for id in ids {
        queue.append(queued_walk(id)).expect("seed queue");
    }
    store
}

fn rig(connectivity: ConnectivityState) -> Rig {
    RigOptions::new(connectivity).build()
}

impl Rig {
    /// Walks north in ~55 m steps, one every 30 s.
    fn walk(&self, steps: usize, speed_mps: f64) {
        for step in 0..steps {
            self.clock.advance(Duration::from_secs(30));
            let pushed = self.location.push(Sample {
                latitude: 43.2630 + step as f64 * 0.0005,
                longitude: -2.9350,
                accuracy_meters: 6.0,
                instant_speed_mps: Some(speed_mps),
                timestamp: self.clock.wall(),
            });
            assert!(pushed, "provider should be watched while recording");
        }
    }
}

async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("Timed out waiting for {what}");
}

#[tokio::test]
async fn finished_walk_is_delivered_immediately_when_online() {
    let rig = rig(ConnectivityState::online(NetworkKind::Wifi));
    rig.engine.start_session().await.expect("start");
    rig.walk(12, 1.8);

    let record = rig.engine.stop_session().await.expect("stop");
    assert_eq!(record.connection_at_save, ConnectionKind::Wifi);
    assert_eq!(record.save_method, SaveMethod::Online);
    assert_eq!(record.duration_sec, 360);
    assert_eq!(record.route.len(), 12);
    assert!(!rig.location.is_watching());

    assert!(rig.engine.recovered_snapshot().is_none());

    eventually("delivery", || rig.sink.count() == 1).await;
    eventually("queue drain", || rig.engine.pending().is_empty()).await;
    let sent = rig.sink.requests.lock().expect("sink lock")[0].clone();
    assert_eq!(sent.id, record.id);
    assert_eq!(sent.user_id, "runner-7");

    rig.engine.shutdown().await;
}

#[tokio::test]
async fn offline_walk_waits_for_connectivity() {
    let rig = rig(ConnectivityState::OFFLINE);
    rig.engine.start_session().await.expect("start");
    rig.walk(4, 1.5);
    let record = rig.engine.stop_session().await.expect("stop");
    assert_eq!(record.save_method, SaveMethod::OfflineThenSynced);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(rig.sink.count(), 0);
    assert_eq!(rig.engine.pending().len(), 1);

    rig.network
        .set(ConnectivityState::online(NetworkKind::Cellular));
    eventually("delivery after reconnect", || rig.sink.count() == 1).await;
    eventually("queue drain", || rig.engine.pending().is_empty()).await;

    rig.engine.shutdown().await;
}

#[tokio::test]
async fn denied_permission_surfaces_and_stays_idle() {
    let rig = rig_with(
        Arc::new(MemoryStore::new()),
        PermissionStatus::Denied,
        ConnectivityState::OFFLINE,
    );
    let err = rig.engine.start_session().await.unwrap_err();
    assert!(matches!(err, StrideError::PermissionDenied));
    assert_eq!(rig.engine.view().phase, SessionPhase::Idle);
    assert!(!rig.location.is_watching());
    rig.engine.shutdown().await;
}

#[tokio::test]
async fn speed_guard_discards_the_session() {
    let rig = rig(ConnectivityState::online(NetworkKind::Wifi));
    rig.engine.start_session().await.expect("start");
    let mut view = rig.engine.subscribe_view();
    rig.walk(4, 12.0);

    let aborted = tokio::time::timeout(
        Duration::from_secs(2),
        view.wait_for(|v| matches!(v.end, Some(SessionEnd::Aborted(_)))),
    )
    .await
    .expect("abort in time")
    .expect("view channel open")
    .clone();
    assert_eq!(aborted.phase, SessionPhase::Finished);

    assert!(rig.engine.stop_session().await.is_err());
    assert!(rig.engine.pending().is_empty());
    assert!(rig.engine.recovered_snapshot().is_none());
    rig.engine.shutdown().await;
}

#[tokio::test]
async fn shutdown_releases_subscription_and_keeps_snapshot_for_resume() {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let rig = rig_with(
        store.clone(),
        PermissionStatus::Granted,
        ConnectivityState::OFFLINE,
    );
    rig.engine.start_session().await.expect("start");
    rig.walk(3, 1.4);
    let mut view = rig.engine.subscribe_view();
    tokio::time::timeout(Duration::from_secs(2), view.wait_for(|v| v.route_len == 3))
        .await
        .expect("fixes applied")
        .expect("view channel open");
    let distance = rig.engine.view().distance_km;

    let Rig {
        engine, location, ..
    } = rig;
    engine.shutdown().await;
    assert!(!location.is_watching());

    let restarted = rig_with(store, PermissionStatus::Granted, ConnectivityState::OFFLINE);
    let snapshot = restarted
        .engine
        .recovered_snapshot()
        .expect("snapshot survives shutdown");
    assert!(snapshot.route.len() <= 3);
    assert!(snapshot.check_consistency().is_ok());

    restarted
        .engine
        .resume_session(snapshot)
        .await
        .expect("resume");
    assert_eq!(restarted.engine.view().phase, SessionPhase::Recording);
    assert!(restarted.engine.view().distance_km <= distance);

    restarted.engine.cancel_session().await.expect("cancel");
    assert!(restarted.engine.recovered_snapshot().is_none());
    assert!(restarted.store.get("session_current").expect("read").is_none());
    restarted.engine.shutdown().await;
}

#[tokio::test]
async fn explicit_discard_is_refused_while_recording() {
    let rig = rig(ConnectivityState::OFFLINE);
    rig.engine.start_session().await.expect("start");
    assert!(rig.engine.discard_snapshot().await.is_err());
    assert!(rig.engine.start_session().await.is_err());

    rig.engine.cancel_session().await.expect("cancel");
    rig.engine.discard_snapshot().await.expect("discard when idle");
    rig.engine.shutdown().await;
}

#[tokio::test]
async fn unqueued_record_is_returned_and_its_snapshot_kept() {
    let rig = RigOptions {
        user_id: "",
        ..RigOptions::new(ConnectivityState::OFFLINE)
    }
    .build();
    rig.engine.start_session().await.expect("start");
    rig.walk(20, 1.4);

    let (record, source) = match rig.engine.stop_session().await {
        Err(StrideError::NotQueued { record, source }) => (record, source),
        other => panic!("expected NotQueued, got {other:?}"),
    };
    assert!(matches!(*source, StrideError::MissingUser));
    assert_eq!(record.route.len(), 20);
    assert_eq!(record.duration_sec, 600);
    assert!(rig.engine.pending().is_empty());

    let snapshot = rig
        .engine
        .recovered_snapshot()
        .expect("final state survives the failed hand-off");
    assert_eq!(snapshot.route.len(), 20);
    assert_eq!(snapshot.elapsed_seconds, 600);
    assert_eq!(snapshot.total_distance_km, record.distance_km);
    rig.engine.shutdown().await;
}

#[tokio::test]
async fn fresh_start_is_refused_while_a_snapshot_waits() {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let first = rig_with(
        store.clone(),
        PermissionStatus::Granted,
        ConnectivityState::OFFLINE,
    );
    first.engine.start_session().await.expect("start");
    first.walk(2, 1.4);
    first.engine.shutdown().await;

    let restarted = rig_with(store, PermissionStatus::Granted, ConnectivityState::OFFLINE);
    let err = restarted.engine.start_session().await.unwrap_err();
    assert!(matches!(err, StrideError::UnrecoveredSnapshot));
    assert!(!restarted.location.is_watching());
    assert!(restarted.engine.recovered_snapshot().is_some());

    restarted.engine.discard_snapshot().await.expect("discard");
    restarted.engine.start_session().await.expect("start after discard");
    restarted.engine.cancel_session().await.expect("cancel");
    restarted.engine.shutdown().await;
}

#[tokio::test]
async fn startup_drains_a_queue_left_from_an_earlier_run() {
    let rig = RigOptions {
        store: store_with_queued(&["left-1", "left-2"]),
        ..RigOptions::new(ConnectivityState::online(NetworkKind::Wifi))
    }
    .build();

    eventually("startup delivery", || rig.sink.count() == 2).await;
    eventually("queue drain", || rig.engine.pending().is_empty()).await;
    rig.engine.shutdown().await;
}

#[tokio::test]
async fn explicit_request_retries_a_failed_delivery() {
    let rig = RigOptions {
        store: store_with_queued(&["retry-me"]),
        failing_deliveries: 1,
        ..RigOptions::new(ConnectivityState::online(NetworkKind::Cellular))
    }
    .build();

    eventually("failed startup attempt", || rig.sink.attempts() == 1).await;
    eventually("startup pass to end", || !rig.engine.sync_engine().is_syncing()).await;
    assert_eq!(rig.engine.pending().len(), 1);

    rig.engine.request_sync();
    eventually("delivery after request", || rig.sink.count() == 1).await;
    eventually("queue drain", || rig.engine.pending().is_empty()).await;
    assert_eq!(rig.sink.attempts(), 2);
    rig.engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn periodic_timer_retries_without_any_other_trigger() {
    let rig = RigOptions {
        store: store_with_queued(&["periodic"]),
        periodic_secs: 60,
        failing_deliveries: 1,
        ..RigOptions::new(ConnectivityState::online(NetworkKind::Wifi))
    }
    .build();

    eventually("failed startup attempt", || rig.sink.attempts() == 1).await;
    assert_eq!(rig.sink.count(), 0);

    tokio::time::sleep(Duration::from_secs(61)).await;
    eventually("periodic delivery", || rig.sink.count() == 1).await;
    eventually("queue drain", || rig.engine.pending().is_empty()).await;
    rig.engine.shutdown().await;
}
