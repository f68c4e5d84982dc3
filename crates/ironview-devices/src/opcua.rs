//! OPC-UA adapter stub.
//!
//! The tag is recognized so discovered OPC-UA servers can live in the
//! inventory, but every call reports failure until a real session layer
//! lands. Pollers treat the permanent connect failure like any other
//! unreachable device.

use std::net::Ipv4Addr;

use async_trait::async_trait;

use ironview_core::device_log::LogEntry;
use ironview_storage::{ProtocolKind, RegisterKind};

use crate::adapter::{DeviceTarget, ProtocolAdapter};

/// Placeholder OPC-UA implementation of [`ProtocolAdapter`].
#[derive(Default)]
pub struct OpcuaAdapter;

impl OpcuaAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProtocolAdapter for OpcuaAdapter {
    fn protocol(&self) -> ProtocolKind {
        ProtocolKind::Opcua
    }

    async fn connect(&self, target: &DeviceTarget) -> bool {
        target.log.push(
            LogEntry::new("connect_failed", target.ip.to_string())
                .with_port(target.port)
                .with_details("opcua transport not implemented"),
        );
        false
    }

    async fn disconnect(&self, _target: &DeviceTarget) {}

    async fn is_connected(&self, _ip: Ipv4Addr) -> bool {
        false
    }

    async fn read(
        &self,
        _target: &DeviceTarget,
        _kind: RegisterKind,
        _address: u16,
        _count: u16,
    ) -> Option<Vec<u16>> {
        None
    }

    async fn write(&self, _target: &DeviceTarget, _address: u16, _value: u16) -> bool {
        false
    }
}
