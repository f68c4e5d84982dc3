//! Fleet supervisor.
//!
//! Owns the set of pollers keyed by device id. All table mutations go
//! through one async mutex so `start`, `stop` and `status` observe a
//! consistent view. The supervisor never raises into its callers: every
//! per-device failure is reported through [`Supervisor::status`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use ironview_core::config::polling;
use ironview_core::Error;
use ironview_storage::{Device, Stores};

use crate::poller::{Poller, PollerSettings, PollerState, PollerStatus};
use crate::registry::AdapterRegistry;
use crate::value_cache::ValueCache;

/// Supervisor tunables.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub shutdown_deadline: Duration,
    /// Reconcile tick: crashed pollers are re-created, pollers of
    /// deactivated devices stopped.
    pub tick: Duration,
    pub poller: PollerSettings,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            shutdown_deadline: Duration::from_millis(polling::SHUTDOWN_DEADLINE_MS),
            tick: Duration::from_millis(polling::SUPERVISOR_TICK_MS),
            poller: PollerSettings::default(),
        }
    }
}

/// Outcome of a start request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
    NotFound,
    /// Configuration problem; the device is refused, not crashed.
    Refused(String),
}

/// Outcome of a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    NotRunning,
    NotFound,
}

/// Per-device status row.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatusReport {
    pub device_id: i64,
    pub running: bool,
    pub state: PollerState,
    pub last_error: Option<String>,
    pub last_good_read_ms: Option<i64>,
    pub timeouts: u64,
    pub transport_errors: u64,
    pub protocol_errors: u64,
    pub persist_failures: u64,
}

impl DeviceStatusReport {
    fn from_poller(device_id: i64, running: bool, status: PollerStatus) -> Self {
        Self {
            device_id,
            running,
            state: status.state,
            last_error: status.last_error,
            last_good_read_ms: status.last_good_read_ms,
            timeouts: status.timeouts,
            transport_errors: status.transport_errors,
            protocol_errors: status.protocol_errors,
            persist_failures: status.persist_failures,
        }
    }

    fn refused(device_id: i64, reason: String) -> Self {
        Self {
            device_id,
            running: false,
            state: PollerState::Stopped,
            last_error: Some(reason),
            last_good_read_ms: None,
            timeouts: 0,
            transport_errors: 0,
            protocol_errors: 0,
            persist_failures: 0,
        }
    }
}

struct Inner {
    stores: Arc<Stores>,
    registry: Arc<AdapterRegistry>,
    cache: Arc<ValueCache>,
    settings: SupervisorSettings,
    pollers: Mutex<HashMap<i64, Arc<Poller>>>,
    /// Devices refused for configuration reasons, with the reason.
    refused: StdMutex<HashMap<i64, String>>,
}

/// Fleet-level orchestrator of per-device pollers.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    pub fn new(
        stores: Arc<Stores>,
        registry: Arc<AdapterRegistry>,
        cache: Arc<ValueCache>,
        settings: SupervisorSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                stores,
                registry,
                cache,
                settings,
                pollers: Mutex::new(HashMap::new()),
                refused: StdMutex::new(HashMap::new()),
            }),
        }
    }

    pub fn cache(&self) -> Arc<ValueCache> {
        self.inner.cache.clone()
    }

    fn validate(&self, device: &Device) -> Result<(), Error> {
        if device.polling_interval_ms < polling::MIN_INTERVAL_MS {
            return Err(Error::Config(format!(
                "device {}: polling_interval_ms below {}",
                device.id,
                polling::MIN_INTERVAL_MS
            )));
        }
        if device.timeout_ms < polling::MIN_INTERVAL_MS {
            return Err(Error::Config(format!(
                "device {}: timeout_ms below {}",
                device.id,
                polling::MIN_INTERVAL_MS
            )));
        }
        // Resolving the adapter is the real gate: unknown tags fail here.
        self.inner.registry.get(device.protocol).map(|_| ())
    }

    /// Start polling one device. Idempotent: starting a running device is
    /// reported, not an error.
    pub async fn start(&self, device_id: i64) -> StartOutcome {
        let device = match self.inner.stores.devices.get(device_id) {
            Ok(Some(device)) => device,
            Ok(None) => return StartOutcome::NotFound,
            Err(e) => return StartOutcome::Refused(e.to_string()),
        };

        if !device.active {
            return StartOutcome::Refused(format!("device {device_id} is not active"));
        }

        let mut pollers = self.inner.pollers.lock().await;
        if let Some(existing) = pollers.get(&device_id) {
            if existing.is_running() {
                return StartOutcome::AlreadyRunning;
            }
            // A finished worker is replaced below.
        }

        if let Err(e) = self.validate(&device) {
            let reason = e.to_string();
            self.inner
                .refused
                .lock()
                .expect("refused map poisoned")
                .insert(device_id, reason.clone());
            warn!(device_id, "device refused: {reason}");
            return StartOutcome::Refused(reason);
        }
        self.inner
            .refused
            .lock()
            .expect("refused map poisoned")
            .remove(&device_id);

        let adapter = match self.inner.registry.get(device.protocol) {
            Ok(adapter) => adapter,
            Err(e) => return StartOutcome::Refused(e.to_string()),
        };

        info!(device_id, ip = %device.ip, "starting poller");
        let poller = Poller::spawn(
            device,
            adapter,
            self.inner.stores.clone(),
            self.inner.cache.clone(),
            self.inner.settings.poller.clone(),
        );
        pollers.insert(device_id, Arc::new(poller));
        StartOutcome::Started
    }

    /// Stop polling one device. Idempotent.
    pub async fn stop(&self, device_id: i64) -> StopOutcome {
        let known = matches!(self.inner.stores.devices.get(device_id), Ok(Some(_)));

        let poller = {
            let mut pollers = self.inner.pollers.lock().await;
            pollers.remove(&device_id)
        };

        match poller {
            Some(poller) => {
                info!(device_id, "stopping poller");
                poller.stop().await;
                StopOutcome::Stopped
            }
            None if known => StopOutcome::NotRunning,
            None => StopOutcome::NotFound,
        }
    }

    /// Start a poller for every active device that is not already running.
    /// Returns the number of pollers started.
    pub async fn start_all_from_store(&self) -> usize {
        let devices = match self.inner.stores.devices.list_active() {
            Ok(devices) => devices,
            Err(e) => {
                warn!("failed to load active devices: {e}");
                return 0;
            }
        };

        let mut started = 0;
        for device in devices {
            if matches!(self.start(device.id).await, StartOutcome::Started) {
                started += 1;
            }
        }
        info!(started, "supervisor start pass finished");
        started
    }

    /// Cooperative shutdown of every poller within the configured deadline.
    /// Workers that miss the deadline are detached and logged.
    pub async fn stop_all(&self) {
        let pollers: Vec<Arc<Poller>> = {
            let mut table = self.inner.pollers.lock().await;
            table.drain().map(|(_, p)| p).collect()
        };
        if pollers.is_empty() {
            return;
        }

        info!(count = pollers.len(), "stopping all pollers");
        let shutdown = futures::future::join_all(pollers.iter().map(|p| p.stop()));
        match tokio::time::timeout(self.inner.settings.shutdown_deadline, shutdown).await {
            Ok(results) => {
                let forced = results.iter().filter(|clean| !**clean).count();
                if forced > 0 {
                    warn!(forced, "pollers detached during shutdown");
                }
            }
            Err(_) => {
                warn!("shutdown deadline exceeded, detaching remaining pollers");
            }
        }
    }

    /// Whether a poller for the device is currently running.
    pub async fn is_running(&self, device_id: i64) -> bool {
        let pollers = self.inner.pollers.lock().await;
        pollers
            .get(&device_id)
            .map(|p| p.is_running())
            .unwrap_or(false)
    }

    /// Per-device status map, covering running pollers and refused devices.
    pub async fn status(&self) -> HashMap<i64, DeviceStatusReport> {
        let mut report = HashMap::new();

        {
            let pollers = self.inner.pollers.lock().await;
            for (device_id, poller) in pollers.iter() {
                report.insert(
                    *device_id,
                    DeviceStatusReport::from_poller(
                        *device_id,
                        poller.is_running(),
                        poller.last_status(),
                    ),
                );
            }
        }

        let refused = self.inner.refused.lock().expect("refused map poisoned");
        for (device_id, reason) in refused.iter() {
            report
                .entry(*device_id)
                .or_insert_with(|| DeviceStatusReport::refused(*device_id, reason.clone()));
        }

        report
    }

    /// Per-device log ring snapshot, if the device has a poller.
    pub async fn device_log(&self, device_id: i64) -> Option<Vec<ironview_core::LogEntry>> {
        let pollers = self.inner.pollers.lock().await;
        pollers.get(&device_id).map(|p| p.log_snapshot())
    }

    /// Operator write of a single register. Reuses the device's live
    /// connection when one exists; requests on a connection are serialized
    /// at the adapter boundary, so this is safe alongside a running poller.
    pub async fn write_register(
        &self,
        device_id: i64,
        address: u16,
        value: u16,
    ) -> Result<bool, Error> {
        let device = self
            .inner
            .stores
            .devices
            .get(device_id)
            .map_err(ironview_core::Error::from)?
            .ok_or_else(|| Error::Config(format!("unknown device {device_id}")))?;

        let adapter = self.inner.registry.get(device.protocol)?;
        let target = crate::adapter::DeviceTarget::from_device(
            &device,
            None,
            std::sync::Arc::new(ironview_core::DeviceLog::new()),
        );

        if !adapter.is_connected(device.ip).await && !adapter.connect(&target).await {
            return Ok(false);
        }
        Ok(adapter.write(&target, address, value).await)
    }

    /// One reconcile pass: restart crashed pollers of active devices, stop
    /// pollers of devices that disappeared or were deactivated.
    pub async fn reconcile(&self) {
        let active = match self.inner.stores.devices.list_active() {
            Ok(devices) => devices,
            Err(e) => {
                warn!("reconcile: failed to load devices: {e}");
                return;
            }
        };
        let active_ids: std::collections::HashSet<i64> = active.iter().map(|d| d.id).collect();

        // Stop pollers whose device is gone or inactive.
        let stale: Vec<i64> = {
            let pollers = self.inner.pollers.lock().await;
            pollers
                .keys()
                .filter(|id| !active_ids.contains(id))
                .copied()
                .collect()
        };
        for device_id in stale {
            debug!(device_id, "reconcile: stopping poller of inactive device");
            self.stop(device_id).await;
        }

        // (Re)start pollers for active devices without a live worker.
        for device in active {
            if !self.is_running(device.id).await {
                match self.start(device.id).await {
                    StartOutcome::Started => {
                        debug!(device_id = device.id, "reconcile: poller (re)started")
                    }
                    StartOutcome::Refused(reason) => {
                        debug!(device_id = device.id, "reconcile: still refused: {reason}")
                    }
                    _ => {}
                }
            }
        }
    }

    /// Spawn the periodic reconcile loop. The task exits when `stop_rx`
    /// flips to true.
    pub fn spawn_reconcile_loop(&self, mut stop_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        let supervisor = self.clone();
        let tick = supervisor.inner.settings.tick;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(tick) => supervisor.reconcile().await,
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }
}
