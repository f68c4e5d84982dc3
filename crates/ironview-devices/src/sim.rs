//! Deterministic simulation adapter.
//!
//! Stands in for a real controller in tests and demos: register values are
//! scripted, connect attempts can be made to fail a configured number of
//! times, and reads can be slowed down to exercise cancellation paths.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use ironview_core::device_log::LogEntry;
use ironview_storage::{ProtocolKind, RegisterKind};

use crate::adapter::{DeviceTarget, ProtocolAdapter};

/// Scriptable in-memory implementation of [`ProtocolAdapter`].
pub struct SimAdapter {
    registers: Mutex<HashMap<(RegisterKind, u16), u16>>,
    connected: DashMap<Ipv4Addr, ()>,
    /// Remaining connect attempts that must fail.
    connect_failures: AtomicU32,
    /// When set, every read fails as a transport error.
    fail_reads: AtomicBool,
    read_delay_ms: AtomicU64,
    reads: AtomicU64,
    connects: AtomicU64,
}

impl SimAdapter {
    pub fn new() -> Self {
        Self {
            registers: Mutex::new(HashMap::new()),
            connected: DashMap::new(),
            connect_failures: AtomicU32::new(0),
            fail_reads: AtomicBool::new(false),
            read_delay_ms: AtomicU64::new(0),
            reads: AtomicU64::new(0),
            connects: AtomicU64::new(0),
        }
    }

    pub fn set_register(&self, kind: RegisterKind, address: u16, value: u16) {
        self.registers
            .lock()
            .expect("sim registers poisoned")
            .insert((kind, address), value);
    }

    /// Make the next `n` connect attempts fail.
    pub fn fail_next_connects(&self, n: u32) {
        self.connect_failures.store(n, Ordering::SeqCst);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Delay every read by the given duration (cancellation tests).
    pub fn set_read_delay(&self, delay: Duration) {
        self.read_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    /// Synchronous connection probe for tests.
    pub fn connected_to(&self, ip: Ipv4Addr) -> bool {
        self.connected.contains_key(&ip)
    }

    pub fn connect_count(&self) -> u64 {
        self.connects.load(Ordering::SeqCst)
    }
}

impl Default for SimAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProtocolAdapter for SimAdapter {
    fn protocol(&self) -> ProtocolKind {
        ProtocolKind::ModbusTcp
    }

    async fn connect(&self, target: &DeviceTarget) -> bool {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.connected.contains_key(&target.ip) {
            return true;
        }

        let remaining = self.connect_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.connect_failures.store(remaining - 1, Ordering::SeqCst);
            target.log.push(
                LogEntry::new("connect_failed", target.ip.to_string())
                    .with_port(target.port)
                    .with_details("scripted failure"),
            );
            return false;
        }

        self.connected.insert(target.ip, ());
        target
            .log
            .push(LogEntry::new("connect_ok", target.ip.to_string()).with_port(target.port));
        true
    }

    async fn disconnect(&self, target: &DeviceTarget) {
        if self.connected.remove(&target.ip).is_some() {
            target
                .log
                .push(LogEntry::new("disconnect", target.ip.to_string()).with_port(target.port));
        }
    }

    async fn is_connected(&self, ip: Ipv4Addr) -> bool {
        self.connected.contains_key(&ip)
    }

    async fn read(
        &self,
        target: &DeviceTarget,
        kind: RegisterKind,
        address: u16,
        count: u16,
    ) -> Option<Vec<u16>> {
        if !self.connected.contains_key(&target.ip) {
            return None;
        }

        let delay = self.read_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        self.reads.fetch_add(1, Ordering::SeqCst);

        if self.fail_reads.load(Ordering::SeqCst) {
            self.connected.remove(&target.ip);
            target.stats.transport_errors.fetch_add(1, Ordering::Relaxed);
            target.log.push(
                LogEntry::new("read_failed", target.ip.to_string())
                    .with_address(address)
                    .with_details("scripted transport failure"),
            );
            return None;
        }

        let registers = self.registers.lock().expect("sim registers poisoned");
        Some(
            (address..address.saturating_add(count))
                .map(|a| registers.get(&(kind, a)).copied().unwrap_or(0))
                .collect(),
        )
    }

    async fn write(&self, target: &DeviceTarget, address: u16, value: u16) -> bool {
        if !self.connected.contains_key(&target.ip) {
            return false;
        }
        self.set_register(RegisterKind::Holding, address, value);
        true
    }
}
