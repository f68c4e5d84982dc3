//! Protocol adapter contract.
//!
//! An adapter is pure transport: connect, disconnect, read, write. It never
//! raises into the caller; every failure is reported through the return
//! value and recorded in the device's log ring. Persisting online/offline
//! transitions is the poller's job, which keeps adapters free of any
//! storage dependency.

use std::net::Ipv4Addr;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use ironview_core::DeviceLog;
use ironview_storage::{Device, ProtocolKind, RegisterKind};

/// Failure counters an adapter maintains per target.
///
/// Timeouts classify like transport failures for recovery but are counted
/// separately so status can tell a slow device from a dead one.
#[derive(Debug, Default)]
pub struct TargetStats {
    pub timeouts: AtomicU64,
    pub transport_errors: AtomicU64,
    pub protocol_errors: AtomicU64,
}

/// Everything an adapter needs to talk to one device.
#[derive(Clone)]
pub struct DeviceTarget {
    pub device_id: i64,
    pub ip: Ipv4Addr,
    pub port: u16,
    /// Modbus unit (slave) id.
    pub unit_id: u8,
    /// Hard per-call timeout.
    pub timeout: Duration,
    /// The device's log ring; adapters append structured events here.
    pub log: Arc<DeviceLog>,
    /// Failure counters; adapters bump these, the poller reports them.
    pub stats: Arc<TargetStats>,
}

impl DeviceTarget {
    /// Build a target from a device row. An explicit `port` wins over the
    /// device's first declared port and the protocol default.
    pub fn from_device(device: &Device, port: Option<u16>, log: Arc<DeviceLog>) -> Self {
        Self {
            device_id: device.id,
            ip: device.ip,
            port: device.connect_port(port),
            unit_id: device.unit_id,
            timeout: device.timeout(),
            log,
            stats: Arc::new(TargetStats::default()),
        }
    }
}

/// Uniform connect/read/write contract over a wire protocol.
///
/// One adapter instance per protocol is shared across the whole process; it
/// owns the `ip -> live client` map behind it. Only the poller that owns a
/// device calls `read`/`write` for it, but `connect`/`disconnect` are
/// idempotent and safe from any task.
#[async_trait]
pub trait ProtocolAdapter: Send + Sync {
    fn protocol(&self) -> ProtocolKind;

    /// Open (or reuse) a transport to the device. Returns false on failure
    /// after logging the cause.
    async fn connect(&self, target: &DeviceTarget) -> bool;

    /// Close the active transport. No-op if there is none.
    async fn disconnect(&self, target: &DeviceTarget);

    /// Whether a live client exists for the ip.
    async fn is_connected(&self, ip: Ipv4Addr) -> bool;

    /// Read `count` 16-bit words starting at `address`. `None` on transport
    /// error, protocol exception, timeout or empty payload; transport-class
    /// failures also drop the live client so the next connect re-dials.
    async fn read(
        &self,
        target: &DeviceTarget,
        kind: RegisterKind,
        address: u16,
        count: u16,
    ) -> Option<Vec<u16>>;

    /// Write a single register. Returns false on any error.
    async fn write(&self, target: &DeviceTarget, address: u16, value: u16) -> bool;
}
