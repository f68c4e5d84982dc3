//! Modbus/TCP adapter.
//!
//! Keeps one live client per device ip in a process-local map. A client is
//! wrapped in a mutex so at most one request is in flight per connection;
//! transport-class failures evict the client and the next connect re-dials.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_modbus::client::{tcp, Context, Reader, Writer};
use tokio_modbus::Slave;
use tracing::debug;

use ironview_core::device_log::LogEntry;
use ironview_storage::{ProtocolKind, RegisterKind};

use crate::adapter::{DeviceTarget, ProtocolAdapter};

/// Modbus/TCP implementation of [`ProtocolAdapter`].
#[derive(Default)]
pub struct ModbusTcpAdapter {
    clients: DashMap<Ipv4Addr, Arc<Mutex<Context>>>,
}

impl ModbusTcpAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn client(&self, ip: Ipv4Addr) -> Option<Arc<Mutex<Context>>> {
        self.clients.get(&ip).map(|entry| entry.value().clone())
    }

    fn evict(&self, ip: Ipv4Addr) {
        self.clients.remove(&ip);
    }

    /// Convert coil/discrete responses to the uniform word representation.
    fn bits_to_words(bits: Vec<bool>) -> Vec<u16> {
        bits.into_iter().map(u16::from).collect()
    }
}

#[async_trait]
impl ProtocolAdapter for ModbusTcpAdapter {
    fn protocol(&self) -> ProtocolKind {
        ProtocolKind::ModbusTcp
    }

    async fn connect(&self, target: &DeviceTarget) -> bool {
        if self.clients.contains_key(&target.ip) {
            // Idempotent: reuse the live connection.
            return true;
        }

        let addr = SocketAddr::from((target.ip, target.port));
        let slave = Slave(target.unit_id);
        match timeout(target.timeout, tcp::connect_slave(addr, slave)).await {
            Ok(Ok(ctx)) => {
                self.clients.insert(target.ip, Arc::new(Mutex::new(ctx)));
                target.log.push(
                    LogEntry::new("connect_ok", target.ip.to_string()).with_port(target.port),
                );
                debug!(ip = %target.ip, port = target.port, "modbus connected");
                true
            }
            Ok(Err(e)) => {
                target.stats.transport_errors.fetch_add(1, Ordering::Relaxed);
                target.log.push(
                    LogEntry::new("connect_failed", target.ip.to_string())
                        .with_port(target.port)
                        .with_details(e.to_string()),
                );
                false
            }
            Err(_) => {
                target.stats.timeouts.fetch_add(1, Ordering::Relaxed);
                target.log.push(
                    LogEntry::new("connect_timeout", target.ip.to_string())
                        .with_port(target.port)
                        .with_details(format!("{} ms", target.timeout.as_millis())),
                );
                false
            }
        }
    }

    async fn disconnect(&self, target: &DeviceTarget) {
        // Dropping the context closes the TCP stream; Modbus/TCP needs no
        // protocol-level goodbye.
        if self.clients.remove(&target.ip).is_some() {
            target
                .log
                .push(LogEntry::new("disconnect", target.ip.to_string()).with_port(target.port));
        }
    }

    async fn is_connected(&self, ip: Ipv4Addr) -> bool {
        self.clients.contains_key(&ip)
    }

    async fn read(
        &self,
        target: &DeviceTarget,
        kind: RegisterKind,
        address: u16,
        count: u16,
    ) -> Option<Vec<u16>> {
        let client = self.client(target.ip)?;
        let mut ctx = client.lock().await;

        // tokio-modbus read calls yield Result<Result<T, Exception>, Error>:
        // the outer error is transport, the inner one a device exception.
        let call = async {
            match kind {
                RegisterKind::Holding => ctx.read_holding_registers(address, count).await,
                RegisterKind::Input => ctx.read_input_registers(address, count).await,
                RegisterKind::Coil => ctx
                    .read_coils(address, count)
                    .await
                    .map(|inner| inner.map(Self::bits_to_words)),
                RegisterKind::Discrete => ctx
                    .read_discrete_inputs(address, count)
                    .await
                    .map(|inner| inner.map(Self::bits_to_words)),
            }
        };

        match timeout(target.timeout, call).await {
            Ok(Ok(Ok(words))) => {
                if words.is_empty() {
                    target.log.push(
                        LogEntry::new("read_empty", target.ip.to_string()).with_address(address),
                    );
                    return None;
                }
                Some(words)
            }
            Ok(Ok(Err(exception))) => {
                target.stats.protocol_errors.fetch_add(1, Ordering::Relaxed);
                target.log.push(
                    LogEntry::new("read_exception", target.ip.to_string())
                        .with_address(address)
                        .with_details(exception.to_string()),
                );
                None
            }
            Ok(Err(e)) => {
                target.stats.transport_errors.fetch_add(1, Ordering::Relaxed);
                target.log.push(
                    LogEntry::new("read_failed", target.ip.to_string())
                        .with_address(address)
                        .with_details(e.to_string()),
                );
                drop(ctx);
                self.evict(target.ip);
                None
            }
            Err(_) => {
                target.stats.timeouts.fetch_add(1, Ordering::Relaxed);
                target.log.push(
                    LogEntry::new("read_timeout", target.ip.to_string())
                        .with_address(address)
                        .with_details(format!("{} ms", target.timeout.as_millis())),
                );
                drop(ctx);
                self.evict(target.ip);
                None
            }
        }
    }

    async fn write(&self, target: &DeviceTarget, address: u16, value: u16) -> bool {
        let Some(client) = self.client(target.ip) else {
            return false;
        };
        let mut ctx = client.lock().await;

        match timeout(target.timeout, ctx.write_single_register(address, value)).await {
            Ok(Ok(Ok(()))) => {
                target.log.push(
                    LogEntry::new("write_ok", target.ip.to_string()).with_address(address),
                );
                true
            }
            Ok(Ok(Err(exception))) => {
                target.stats.protocol_errors.fetch_add(1, Ordering::Relaxed);
                target.log.push(
                    LogEntry::new("write_exception", target.ip.to_string())
                        .with_address(address)
                        .with_details(exception.to_string()),
                );
                false
            }
            Ok(Err(e)) => {
                target.stats.transport_errors.fetch_add(1, Ordering::Relaxed);
                target.log.push(
                    LogEntry::new("write_failed", target.ip.to_string())
                        .with_address(address)
                        .with_details(e.to_string()),
                );
                drop(ctx);
                self.evict(target.ip);
                false
            }
            Err(_) => {
                target.stats.timeouts.fetch_add(1, Ordering::Relaxed);
                target.log.push(
                    LogEntry::new("write_timeout", target.ip.to_string()).with_address(address),
                );
                drop(ctx);
                self.evict(target.ip);
                false
            }
        }
    }
}
