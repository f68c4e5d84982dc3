//! End-to-end tests of the polling engine against the simulation adapter.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ironview_devices::{
    AdapterRegistry, Poller, PollerSettings, PollerState, ProtocolAdapter, SimAdapter,
    StartOutcome, StopOutcome, Supervisor, SupervisorSettings, ValueCache,
};
use ironview_storage::{
    DataKind, NewDevice, NewRegisterConfig, ProtocolKind, Quality, RegisterKind, Stores, WordOrder,
};

fn fast_settings() -> PollerSettings {
    PollerSettings {
        tick: Duration::from_millis(50),
        idle_backoff: Duration::from_millis(100),
        reconnect_backoff: Duration::from_millis(50),
        stop_grace: Duration::from_millis(2000),
    }
}

fn new_device(ip: [u8; 4], interval_ms: u64) -> NewDevice {
    NewDevice {
        name: "bench plc".into(),
        ip: Ipv4Addr::from(ip),
        mac: None,
        subnet: None,
        ports: vec![502],
        protocol: ProtocolKind::ModbusTcp,
        kind: "modbus_plc".into(),
        unit_id: 1,
        polling_interval_ms: interval_ms,
        timeout_ms: 3000,
        active: true,
        manual: true,
        word_order: WordOrder::HighFirst,
        info: Default::default(),
    }
}

fn new_register(device_id: i64, address: u16, scale: f64, offset: f64) -> NewRegisterConfig {
    NewRegisterConfig {
        device_id,
        name: format!("reg_{address}"),
        address,
        count: 1,
        register_type: RegisterKind::Holding,
        data_type: DataKind::Uint16,
        scale_factor: scale,
        offset,
        unit: None,
        interval_ms: None,
        active: true,
    }
}

async fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cond()
}

#[tokio::test]
async fn single_read_produces_scaled_reading_and_cache_entry() {
    let stores = Stores::memory().unwrap();
    let device = stores.devices.insert(new_device([10, 0, 0, 5], 1000)).unwrap();
    let register = stores
        .registers
        .insert(new_register(device.id, 0, 2.0, -1.0))
        .unwrap();

    let adapter = Arc::new(SimAdapter::new());
    adapter.set_register(RegisterKind::Holding, 0, 42);

    let cache = ValueCache::new();
    let poller = Poller::spawn(
        device.clone(),
        adapter.clone() as Arc<dyn ProtocolAdapter>,
        stores.clone(),
        cache.clone(),
        fast_settings(),
    );

    let stores_probe = stores.clone();
    let reg_id = register.id;
    assert!(
        wait_until(Duration::from_secs(5), move || {
            stores_probe.readings.latest(reg_id).unwrap().is_some()
        })
        .await
    );

    let reading = stores.readings.latest(register.id).unwrap().unwrap();
    assert_eq!(reading.raw_value, 42.0);
    assert_eq!(reading.scaled_value, 83.0);
    assert_eq!(reading.quality, Quality::Good);

    let cached = cache.get(device.ip, "reg_0").await.unwrap();
    assert_eq!(cached.raw, 42.0);
    assert_eq!(cached.value, 83.0);
    assert_eq!(cached.address, 0);

    assert_eq!(poller.last_status().state, PollerState::Connected);
    assert!(poller.stop().await);
}

#[tokio::test]
async fn reconnect_after_scripted_connect_failures() {
    let stores = Stores::memory().unwrap();
    let device = stores.devices.insert(new_device([10, 0, 0, 6], 1000)).unwrap();
    let register = stores
        .registers
        .insert(new_register(device.id, 0, 1.0, 0.0))
        .unwrap();

    let adapter = Arc::new(SimAdapter::new());
    adapter.set_register(RegisterKind::Holding, 0, 7);
    adapter.fail_next_connects(2);

    let cache = ValueCache::new();
    let poller = Poller::spawn(
        device.clone(),
        adapter.clone() as Arc<dyn ProtocolAdapter>,
        stores.clone(),
        cache,
        fast_settings(),
    );

    // A reading must land within five seconds despite the two refusals.
    let stores_probe = stores.clone();
    let reg_id = register.id;
    assert!(
        wait_until(Duration::from_secs(5), move || {
            stores_probe.readings.latest(reg_id).unwrap().is_some()
        })
        .await
    );

    assert_eq!(poller.last_status().state, PollerState::Connected);
    assert!(adapter.connect_count() >= 3);

    let row = stores.devices.get(device.id).unwrap().unwrap();
    assert!(row.online);
    assert!(row.last_connection.is_some());

    poller.stop().await;
    let row = stores.devices.get(device.id).unwrap().unwrap();
    assert!(!row.online);
}

#[tokio::test]
async fn transport_failure_moves_to_reconnecting_and_back() {
    let stores = Stores::memory().unwrap();
    let device = stores.devices.insert(new_device([10, 0, 0, 7], 1000)).unwrap();
    stores
        .registers
        .insert(new_register(device.id, 0, 1.0, 0.0))
        .unwrap();

    let adapter = Arc::new(SimAdapter::new());
    let cache = ValueCache::new();
    let poller = Poller::spawn(
        device.clone(),
        adapter.clone() as Arc<dyn ProtocolAdapter>,
        stores.clone(),
        cache,
        fast_settings(),
    );

    let probe = adapter.clone();
    assert!(wait_until(Duration::from_secs(5), move || probe.read_count() > 0).await);

    // Kill the transport mid-run; the poller must classify the failed read
    // as transport-level and enter Reconnecting.
    adapter.set_fail_reads(true);
    assert!(
        wait_until(Duration::from_secs(5), || {
            poller.last_status().state == PollerState::Reconnecting
        })
        .await
    );

    // Heal it and verify the poller reconnects on its own.
    adapter.set_fail_reads(false);
    assert!(
        wait_until(Duration::from_secs(5), || {
            poller.last_status().state == PollerState::Connected
                && adapter.connected_to(device.ip)
        })
        .await
    );

    poller.stop().await;
}

#[tokio::test]
async fn supervisor_start_stop_idempotent() {
    let stores = Stores::memory().unwrap();
    let device = stores.devices.insert(new_device([10, 0, 0, 8], 1000)).unwrap();
    stores
        .registers
        .insert(new_register(device.id, 0, 1.0, 0.0))
        .unwrap();

    let mut registry = AdapterRegistry::new();
    registry.register(Arc::new(SimAdapter::new()));
    let supervisor = Supervisor::new(
        stores.clone(),
        Arc::new(registry),
        ValueCache::new(),
        SupervisorSettings {
            poller: fast_settings(),
            ..Default::default()
        },
    );

    assert_eq!(supervisor.start(device.id).await, StartOutcome::Started);
    assert_eq!(supervisor.start(device.id).await, StartOutcome::AlreadyRunning);
    assert!(supervisor.is_running(device.id).await);

    assert_eq!(supervisor.stop(device.id).await, StopOutcome::Stopped);
    assert_eq!(supervisor.stop(device.id).await, StopOutcome::NotRunning);
    assert!(!supervisor.is_running(device.id).await);

    assert_eq!(supervisor.start(9999).await, StartOutcome::NotFound);
    assert_eq!(supervisor.stop(9999).await, StopOutcome::NotFound);
}

#[tokio::test]
async fn supervisor_refuses_device_without_adapter() {
    let stores = Stores::memory().unwrap();
    let mut raw = new_device([10, 0, 0, 9], 1000);
    raw.protocol = ProtocolKind::S7Tcp;
    let device = stores.devices.insert(raw).unwrap();

    let mut registry = AdapterRegistry::new();
    registry.register(Arc::new(SimAdapter::new()));
    let supervisor = Supervisor::new(
        stores,
        Arc::new(registry),
        ValueCache::new(),
        SupervisorSettings::default(),
    );

    let outcome = supervisor.start(device.id).await;
    assert!(matches!(outcome, StartOutcome::Refused(_)));

    let status = supervisor.status().await;
    let row = status.get(&device.id).unwrap();
    assert!(!row.running);
    assert!(row.last_error.as_deref().unwrap().contains("no adapter"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stop_all_returns_within_deadline_despite_slow_reads() {
    let stores = Stores::memory().unwrap();
    let adapter = Arc::new(SimAdapter::new());
    adapter.set_read_delay(Duration::from_secs(30));

    let mut registry = AdapterRegistry::new();
    registry.register(adapter.clone() as Arc<dyn ProtocolAdapter>);
    let supervisor = Supervisor::new(
        stores.clone(),
        Arc::new(registry),
        ValueCache::new(),
        SupervisorSettings {
            poller: fast_settings(),
            ..Default::default()
        },
    );

    for i in 0..4u8 {
        let device = stores
            .devices
            .insert(new_device([10, 0, 1, i + 1], 1000))
            .unwrap();
        stores
            .registers
            .insert(new_register(device.id, 0, 1.0, 0.0))
            .unwrap();
    }

    assert_eq!(supervisor.start_all_from_store().await, 4);

    // Give every poller a chance to enter its 30-second read.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let begin = Instant::now();
    supervisor.stop_all().await;
    assert!(
        begin.elapsed() < Duration::from_secs(10),
        "stop_all took {:?}",
        begin.elapsed()
    );

    let status = supervisor.status().await;
    assert!(status.values().all(|row| !row.running));
}

#[tokio::test]
async fn reconcile_restarts_crashed_and_stops_deactivated() {
    let stores = Stores::memory().unwrap();
    let device = stores.devices.insert(new_device([10, 0, 0, 11], 1000)).unwrap();
    stores
        .registers
        .insert(new_register(device.id, 0, 1.0, 0.0))
        .unwrap();

    let mut registry = AdapterRegistry::new();
    registry.register(Arc::new(SimAdapter::new()));
    let supervisor = Supervisor::new(
        stores.clone(),
        Arc::new(registry),
        ValueCache::new(),
        SupervisorSettings {
            poller: fast_settings(),
            ..Default::default()
        },
    );

    // Nothing running: reconcile starts the active device.
    supervisor.reconcile().await;
    assert!(supervisor.is_running(device.id).await);

    // Deactivate: reconcile stops it.
    stores.devices.set_active(device.id, false).unwrap();
    supervisor.reconcile().await;
    assert!(!supervisor.is_running(device.id).await);

    // Reactivate: reconcile brings it back.
    stores.devices.set_active(device.id, true).unwrap();
    supervisor.reconcile().await;
    assert!(supervisor.is_running(device.id).await);

    supervisor.stop_all().await;
}

#[tokio::test]
async fn supervisor_write_register_reaches_device() {
    let stores = Stores::memory().unwrap();
    let device = stores.devices.insert(new_device([10, 0, 0, 13], 1000)).unwrap();

    let adapter = Arc::new(SimAdapter::new());
    let mut registry = AdapterRegistry::new();
    registry.register(adapter.clone() as Arc<dyn ProtocolAdapter>);
    let supervisor = Supervisor::new(
        stores,
        Arc::new(registry),
        ValueCache::new(),
        SupervisorSettings::default(),
    );

    let written = supervisor.write_register(device.id, 10, 777).await.unwrap();
    assert!(written);

    let target = ironview_devices::DeviceTarget::from_device(
        &device,
        None,
        Arc::new(ironview_core::DeviceLog::new()),
    );
    let words = adapter.read(&target, RegisterKind::Holding, 10, 1).await.unwrap();
    assert_eq!(words, vec![777]);

    // Unknown device is a configuration error, not a silent false.
    assert!(supervisor.write_register(9999, 0, 0).await.is_err());
}

#[tokio::test]
async fn per_poller_timestamps_are_monotonic() {
    let stores = Stores::memory().unwrap();
    let device = stores.devices.insert(new_device([10, 0, 0, 12], 100)).unwrap();
    let register = stores
        .registers
        .insert(new_register(device.id, 0, 1.0, 0.0))
        .unwrap();

    let adapter = Arc::new(SimAdapter::new());
    adapter.set_register(RegisterKind::Holding, 0, 1);

    let poller = Poller::spawn(
        device,
        adapter as Arc<dyn ProtocolAdapter>,
        stores.clone(),
        ValueCache::new(),
        fast_settings(),
    );

    let stores_probe = stores.clone();
    let reg_id = register.id;
    assert!(
        wait_until(Duration::from_secs(5), move || {
            stores_probe.readings.range(reg_id, 0, i64::MAX, 1000).unwrap().len() >= 5
        })
        .await
    );
    poller.stop().await;

    let rows = stores.readings.range(register.id, 0, i64::MAX, 1000).unwrap();
    for pair in rows.windows(2) {
        assert!(pair[1].timestamp_ms >= pair[0].timestamp_ms);
    }
}
