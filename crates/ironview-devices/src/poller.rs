//! Per-device polling worker.
//!
//! One poller owns one device: its adapter connection, its read schedule and
//! the persistence of its readings. The worker is a cooperatively cancelled
//! task driven by a watch channel; every sleep and every batch boundary
//! observes the stop signal.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use ironview_core::config::polling;
use ironview_core::device_log::LogEntry;
use ironview_core::DeviceLog;
use ironview_storage::{Device, Quality, Reading, RegisterConfig, Stores};

use crate::adapter::{DeviceTarget, ProtocolAdapter};
use crate::batcher::{plan_batches, ReadBatch};
use crate::decode::{apply_scaling, decode_words};
use crate::value_cache::{CachedValue, ValueCache};

/// Lifecycle of a poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollerState {
    Created,
    Starting,
    Connected,
    Reconnecting,
    Stopping,
    Stopped,
}

/// Tunables of the polling loop.
#[derive(Debug, Clone)]
pub struct PollerSettings {
    pub tick: Duration,
    pub idle_backoff: Duration,
    pub reconnect_backoff: Duration,
    pub stop_grace: Duration,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(polling::TICK_MS),
            idle_backoff: Duration::from_millis(polling::IDLE_BACKOFF_MS),
            reconnect_backoff: Duration::from_millis(polling::RECONNECT_BACKOFF_MS),
            stop_grace: Duration::from_millis(polling::STOP_GRACE_MS),
        }
    }
}

/// Status snapshot reported to the supervisor.
#[derive(Debug, Clone, Serialize)]
pub struct PollerStatus {
    pub state: PollerState,
    pub last_error: Option<String>,
    /// Unix millis of the last successful batch read.
    pub last_good_read_ms: Option<i64>,
    /// Per-call timeouts, counted apart from other transport failures.
    pub timeouts: u64,
    pub transport_errors: u64,
    pub protocol_errors: u64,
    /// Reading batches dropped after retry exhaustion.
    pub persist_failures: u64,
}

struct PollerShared {
    state: Mutex<PollerState>,
    last_error: Mutex<Option<String>>,
    last_good_read_ms: AtomicI64,
    persist_failures: AtomicU64,
    log: Arc<DeviceLog>,
    stats: Arc<crate::adapter::TargetStats>,
}

impl PollerShared {
    fn new(log: Arc<DeviceLog>, stats: Arc<crate::adapter::TargetStats>) -> Self {
        Self {
            state: Mutex::new(PollerState::Created),
            last_error: Mutex::new(None),
            last_good_read_ms: AtomicI64::new(0),
            persist_failures: AtomicU64::new(0),
            log,
            stats,
        }
    }

    fn set_state(&self, state: PollerState) {
        *self.state.lock().expect("poller state poisoned") = state;
    }

    fn state(&self) -> PollerState {
        *self.state.lock().expect("poller state poisoned")
    }

    fn set_error(&self, error: impl Into<String>) {
        *self.last_error.lock().expect("poller error poisoned") = Some(error.into());
    }

    fn status(&self) -> PollerStatus {
        let last_good = self.last_good_read_ms.load(Ordering::Relaxed);
        PollerStatus {
            state: self.state(),
            last_error: self.last_error.lock().expect("poller error poisoned").clone(),
            last_good_read_ms: (last_good > 0).then_some(last_good),
            timeouts: self.stats.timeouts.load(Ordering::Relaxed),
            transport_errors: self.stats.transport_errors.load(Ordering::Relaxed),
            protocol_errors: self.stats.protocol_errors.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
        }
    }
}

/// Handle to a running per-device worker.
pub struct Poller {
    device_id: i64,
    ip: Ipv4Addr,
    shared: Arc<PollerShared>,
    stop_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
    stop_grace: Duration,
}

impl Poller {
    /// Spawn the worker for a device.
    pub fn spawn(
        device: Device,
        adapter: Arc<dyn ProtocolAdapter>,
        stores: Arc<Stores>,
        cache: Arc<ValueCache>,
        settings: PollerSettings,
    ) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let log = Arc::new(DeviceLog::new());
        let target = DeviceTarget::from_device(&device, None, log.clone());
        let shared = Arc::new(PollerShared::new(log, target.stats.clone()));
        let stop_grace = settings.stop_grace;
        let device_id = device.id;
        let ip = device.ip;

        let run = PollerRun {
            device,
            target,
            adapter,
            stores,
            cache,
            settings,
            shared: shared.clone(),
            stop_rx,
            last_read: HashMap::new(),
            pending: Vec::new(),
        };
        let handle = tokio::spawn(run.run());

        Self {
            device_id,
            ip,
            shared,
            stop_tx,
            handle: Mutex::new(Some(handle)),
            stop_grace,
        }
    }

    pub fn device_id(&self) -> i64 {
        self.device_id
    }

    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .expect("poller handle poisoned")
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    pub fn last_status(&self) -> PollerStatus {
        self.shared.status()
    }

    pub fn log_snapshot(&self) -> Vec<LogEntry> {
        self.shared.log.snapshot()
    }

    /// Signal the worker and wait for it to exit. The in-flight batch gets
    /// `stop_grace` to finish; after that the task is force-detached.
    /// Returns true when the worker exited cooperatively. Idempotent.
    pub async fn stop(&self) -> bool {
        let _ = self.stop_tx.send(true);
        let handle = self.handle.lock().expect("poller handle poisoned").take();
        let Some(mut handle) = handle else {
            return true;
        };

        match timeout(self.stop_grace, &mut handle).await {
            Ok(_) => true,
            Err(_) => {
                warn!(device_id = self.device_id, "poller missed stop grace, detaching");
                handle.abort();
                let _ = handle.await;
                self.shared.set_state(PollerState::Stopped);
                false
            }
        }
    }
}

const FLUSH_RETRIES: u32 = 3;

struct PollerRun {
    device: Device,
    target: DeviceTarget,
    adapter: Arc<dyn ProtocolAdapter>,
    stores: Arc<Stores>,
    cache: Arc<ValueCache>,
    settings: PollerSettings,
    shared: Arc<PollerShared>,
    stop_rx: watch::Receiver<bool>,
    last_read: HashMap<i64, Instant>,
    pending: Vec<Reading>,
}

impl PollerRun {
    fn stop_requested(&self) -> bool {
        *self.stop_rx.borrow()
    }

    /// Sleep that wakes early on the stop signal. Returns false when the
    /// worker should exit.
    async fn pause(&mut self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.stop_rx.changed() => !*self.stop_rx.borrow(),
        }
    }

    fn is_due(&self, member: &RegisterConfig) -> bool {
        let interval = Duration::from_millis(
            member.interval_ms.unwrap_or(self.device.polling_interval_ms),
        );
        match self.last_read.get(&member.id) {
            None => true,
            Some(at) => at.elapsed() >= interval,
        }
    }

    async fn run(mut self) {
        self.shared.set_state(PollerState::Starting);
        debug!(device_id = self.device.id, ip = %self.device.ip, "poller started");

        loop {
            if self.stop_requested() {
                break;
            }

            let configs = match self.stores.registers.list_active_for_device(self.device.id) {
                Ok(configs) => configs,
                Err(e) => {
                    self.shared.set_error(format!("config load failed: {e}"));
                    if !self.pause(self.settings.tick).await {
                        break;
                    }
                    continue;
                }
            };

            if configs.is_empty() {
                if !self.pause(self.settings.idle_backoff).await {
                    break;
                }
                continue;
            }

            let batches = plan_batches(&configs);
            for batch in &batches {
                if self.stop_requested() {
                    break;
                }
                if !batch.members.iter().any(|m| self.is_due(m)) {
                    continue;
                }
                if !self.ensure_connected().await {
                    if !self.pause(self.settings.reconnect_backoff).await {
                        break;
                    }
                    continue;
                }
                self.read_batch(batch).await;
            }

            // No retry backoff once a stop is pending: stay inside the grace.
            let retry = !self.stop_requested();
            self.flush(retry).await;

            if self.stop_requested() {
                break;
            }
            if !self.pause(self.settings.tick).await {
                break;
            }
        }

        self.shutdown().await;
    }

    async fn ensure_connected(&mut self) -> bool {
        if self.adapter.is_connected(self.device.ip).await {
            return true;
        }

        if self.adapter.connect(&self.target).await {
            self.shared.set_state(PollerState::Connected);
            let now = chrono::Utc::now().timestamp_millis();
            if let Err(e) = self.stores.devices.set_online(self.device.id, true) {
                warn!(device_id = self.device.id, "failed to persist online flag: {e}");
            }
            if let Err(e) = self.stores.devices.set_last_connection(self.device.id, now) {
                warn!(device_id = self.device.id, "failed to persist last_connection: {e}");
            }
            true
        } else {
            self.shared.set_state(PollerState::Reconnecting);
            self.shared.set_error("connect failed");
            let _ = self.stores.devices.set_online(self.device.id, false);
            false
        }
    }

    async fn read_batch(&mut self, batch: &ReadBatch) {
        let words = self
            .adapter
            .read(&self.target, batch.kind, batch.start, batch.count)
            .await;
        let now = Instant::now();
        let ts = chrono::Utc::now().timestamp_millis();

        let Some(words) = words else {
            if !self.adapter.is_connected(self.device.ip).await {
                // Transport-class failure: reconnect on the next pass.
                self.shared.set_state(PollerState::Reconnecting);
                self.shared.set_error("read failed (transport)");
                let _ = self.stores.devices.set_online(self.device.id, false);
            } else {
                // Device exception: this batch is bad, the connection lives on.
                self.shared.set_error("read failed (protocol)");
                for member in &batch.members {
                    self.pending.push(Reading {
                        register_id: member.id,
                        timestamp_ms: ts,
                        raw_value: 0.0,
                        scaled_value: 0.0,
                        quality: Quality::Bad,
                    });
                    self.last_read.insert(member.id, now);
                }
            }
            return;
        };

        self.shared.set_state(PollerState::Connected);

        for member in &batch.members {
            let decoded = batch
                .slice(&words, member)
                .and_then(|slice| decode_words(slice, member.data_type, self.device.word_order));

            let Some(raw_value) = decoded else {
                self.pending.push(Reading {
                    register_id: member.id,
                    timestamp_ms: ts,
                    raw_value: 0.0,
                    scaled_value: 0.0,
                    quality: Quality::Bad,
                });
                self.last_read.insert(member.id, now);
                continue;
            };

            let (scaled, finite) = apply_scaling(raw_value, member.scale_factor, member.offset);
            let quality = if finite { Quality::Good } else { Quality::Uncertain };

            self.cache
                .set(
                    self.device.ip,
                    &member.name,
                    CachedValue {
                        value: scaled,
                        raw: raw_value,
                        ts_ms: ts,
                        address: member.address,
                    },
                )
                .await;

            self.pending.push(Reading {
                register_id: member.id,
                timestamp_ms: ts,
                raw_value,
                scaled_value: scaled,
                quality,
            });
            self.last_read.insert(member.id, now);
        }

        self.shared.last_good_read_ms.store(ts, Ordering::Relaxed);
    }

    /// Persist pending readings. With `retry` set the write is retried with
    /// exponential backoff (100/400/1600 ms) and the batch is dropped after
    /// the last attempt.
    async fn flush(&mut self, retry: bool) {
        if self.pending.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.pending);

        let mut attempt: u32 = 0;
        loop {
            let stores = self.stores.clone();
            let rows = batch.clone();
            let result =
                tokio::task::spawn_blocking(move || stores.readings.append_batch(&rows)).await;

            let error = match result {
                Ok(Ok(())) => {
                    debug!(device_id = self.device.id, rows = batch.len(), "readings flushed");
                    return;
                }
                Ok(Err(e)) => e.to_string(),
                Err(e) => e.to_string(),
            };

            if !retry || attempt >= FLUSH_RETRIES {
                self.shared.persist_failures.fetch_add(1, Ordering::Relaxed);
                self.shared.set_error(format!("persist failed: {error}"));
                self.shared.log.push(
                    LogEntry::new("readings_dropped", self.device.ip.to_string())
                        .with_details(format!("{} rows: {error}", batch.len())),
                );
                warn!(device_id = self.device.id, rows = batch.len(), "dropped reading batch: {error}");
                return;
            }

            tokio::time::sleep(Duration::from_millis(100 * 4u64.pow(attempt))).await;
            attempt += 1;
        }
    }

    async fn shutdown(mut self) {
        self.shared.set_state(PollerState::Stopping);
        // One last write attempt, no retries: stop must stay inside its grace.
        self.flush(false).await;
        self.adapter.disconnect(&self.target).await;
        let _ = self.stores.devices.set_online(self.device.id, false);
        self.shared.set_state(PollerState::Stopped);
        debug!(device_id = self.device.id, "poller stopped");
    }
}
