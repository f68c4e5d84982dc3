//! Canonical inventory models.
//!
//! These are the typed records behind the repositories: the device row, its
//! register configurations, and the readings sampled from them.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use ironview_core::config::polling;

use crate::{Error, Result};

/// Wire protocol spoken by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolKind {
    ModbusTcp,
    S7Tcp,
    EthernetIp,
    Opcua,
}

impl ProtocolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ModbusTcp => "modbus_tcp",
            Self::S7Tcp => "s7_tcp",
            Self::EthernetIp => "ethernet_ip",
            Self::Opcua => "opcua",
        }
    }

    /// Default TCP port for the protocol.
    pub fn default_port(&self) -> u16 {
        match self {
            Self::ModbusTcp => 502,
            Self::S7Tcp => 102,
            Self::EthernetIp => 44818,
            Self::Opcua => 4840,
        }
    }
}

impl FromStr for ProtocolKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "modbus_tcp" | "modbus" => Ok(Self::ModbusTcp),
            "s7_tcp" | "s7comm" | "s7" => Ok(Self::S7Tcp),
            "ethernet_ip" => Ok(Self::EthernetIp),
            "opcua" => Ok(Self::Opcua),
            other => Err(Error::InvalidInput(format!("unknown protocol tag: {other}"))),
        }
    }
}

impl std::fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Word order for multi-register values (float32).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WordOrder {
    /// High word at the lower address.
    #[default]
    HighFirst,
    LowFirst,
}

/// Modbus register class; determines the function code used to read it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegisterKind {
    Holding,
    Input,
    Coil,
    Discrete,
}

impl RegisterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Holding => "holding",
            Self::Input => "input",
            Self::Coil => "coil",
            Self::Discrete => "discrete",
        }
    }
}

impl FromStr for RegisterKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "holding" => Ok(Self::Holding),
            "input" => Ok(Self::Input),
            "coil" => Ok(Self::Coil),
            "discrete" => Ok(Self::Discrete),
            other => Err(Error::InvalidInput(format!("unknown register type: {other}"))),
        }
    }
}

/// Declared data type of a register value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataKind {
    Uint16,
    Int16,
    Float32,
    Bool,
}

impl DataKind {
    /// Register count the type occupies on the wire.
    pub fn width(&self) -> u16 {
        match self {
            Self::Float32 => 2,
            _ => 1,
        }
    }
}

/// Quality flag attached to every reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Good,
    Bad,
    Uncertain,
}

/// A controller in the inventory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: i64,
    pub name: String,
    /// Unique across the inventory.
    pub ip: Ipv4Addr,
    pub mac: Option<String>,
    pub subnet: Option<String>,
    /// Open ports observed for the device; the first one is preferred for
    /// connecting when no explicit port is given.
    pub ports: Vec<u16>,
    pub protocol: ProtocolKind,
    /// Device type tag assigned by discovery ("modbus_plc", "siemens_plc", ...).
    pub kind: String,
    /// Modbus unit (slave) id.
    pub unit_id: u8,
    pub polling_interval_ms: u64,
    pub timeout_ms: u64,
    pub active: bool,
    pub online: bool,
    /// Unix millis of the last successful connection.
    pub last_connection: Option<i64>,
    /// Operator-created; protected from discovery overwrite.
    pub manual: bool,
    pub word_order: WordOrder,
    pub info: HashMap<String, String>,
    pub created_at: i64,
}

impl Device {
    /// Port to connect to: explicit argument wins, else the first declared
    /// port, else the protocol default.
    pub fn connect_port(&self, explicit: Option<u16>) -> u16 {
        explicit
            .or_else(|| self.ports.first().copied())
            .unwrap_or_else(|| self.protocol.default_port())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }
}

/// Payload for creating a device through the operator path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDevice {
    pub name: String,
    pub ip: Ipv4Addr,
    #[serde(default)]
    pub mac: Option<String>,
    #[serde(default)]
    pub subnet: Option<String>,
    #[serde(default)]
    pub ports: Vec<u16>,
    pub protocol: ProtocolKind,
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,
    #[serde(default = "default_polling_interval_ms")]
    pub polling_interval_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub active: bool,
    #[serde(default = "default_manual")]
    pub manual: bool,
    #[serde(default)]
    pub word_order: WordOrder,
    #[serde(default)]
    pub info: HashMap<String, String>,
}

fn default_kind() -> String {
    "device".to_string()
}

fn default_unit_id() -> u8 {
    1
}

fn default_polling_interval_ms() -> u64 {
    polling::DEFAULT_INTERVAL_MS
}

fn default_timeout_ms() -> u64 {
    polling::DEFAULT_TIMEOUT_MS
}

fn default_manual() -> bool {
    true
}

impl NewDevice {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidInput("device name must not be empty".into()));
        }
        if self.polling_interval_ms < polling::MIN_INTERVAL_MS {
            return Err(Error::InvalidInput(format!(
                "polling_interval_ms must be >= {}",
                polling::MIN_INTERVAL_MS
            )));
        }
        if self.timeout_ms < polling::MIN_INTERVAL_MS {
            return Err(Error::InvalidInput(format!(
                "timeout_ms must be >= {}",
                polling::MIN_INTERVAL_MS
            )));
        }
        Ok(())
    }
}

/// A declared variable to read on a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterConfig {
    pub id: i64,
    pub device_id: i64,
    pub name: String,
    pub address: u16,
    pub count: u16,
    pub register_type: RegisterKind,
    pub data_type: DataKind,
    pub scale_factor: f64,
    pub offset: f64,
    pub unit: Option<String>,
    /// Per-register override of the device polling interval.
    pub interval_ms: Option<u64>,
    pub active: bool,
}

/// Payload for declaring a register config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRegisterConfig {
    pub device_id: i64,
    pub name: String,
    pub address: u16,
    #[serde(default = "default_count")]
    pub count: u16,
    pub register_type: RegisterKind,
    pub data_type: DataKind,
    #[serde(default = "default_scale")]
    pub scale_factor: f64,
    #[serde(default)]
    pub offset: f64,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub interval_ms: Option<u64>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_count() -> u16 {
    1
}

fn default_scale() -> f64 {
    1.0
}

fn default_active() -> bool {
    true
}

impl NewRegisterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidInput("register name must not be empty".into()));
        }
        if self.count < 1 {
            return Err(Error::InvalidInput("count must be >= 1".into()));
        }
        if self.count != self.data_type.width() {
            return Err(Error::InvalidInput(format!(
                "count {} does not match width {} of {:?}",
                self.count,
                self.data_type.width(),
                self.data_type
            )));
        }
        if let Some(interval) = self.interval_ms {
            if interval < polling::MIN_INTERVAL_MS {
                return Err(Error::InvalidInput(format!(
                    "interval_ms must be >= {}",
                    polling::MIN_INTERVAL_MS
                )));
            }
        }
        Ok(())
    }
}

/// One sample of one register.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reading {
    pub register_id: i64,
    /// Unix millis, UTC.
    pub timestamp_ms: i64,
    pub raw_value: f64,
    pub scaled_value: f64,
    pub quality: Quality,
}

/// Per-bucket aggregate over good-quality readings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadingBucket {
    pub bucket_start_ms: i64,
    pub count: u64,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_round_trip() {
        for tag in ["modbus_tcp", "s7_tcp", "ethernet_ip", "opcua"] {
            let kind: ProtocolKind = tag.parse().unwrap();
            assert_eq!(kind.as_str(), tag);
        }
        assert!("profinet".parse::<ProtocolKind>().is_err());
    }

    #[test]
    fn test_connect_port_precedence() {
        let device = Device {
            id: 1,
            name: "press".into(),
            ip: Ipv4Addr::new(10, 0, 0, 5),
            mac: None,
            subnet: None,
            ports: vec![1502, 502],
            protocol: ProtocolKind::ModbusTcp,
            kind: "modbus_plc".into(),
            unit_id: 1,
            polling_interval_ms: 1000,
            timeout_ms: 3000,
            active: true,
            online: false,
            last_connection: None,
            manual: false,
            word_order: WordOrder::HighFirst,
            info: HashMap::new(),
            created_at: 0,
        };
        assert_eq!(device.connect_port(Some(9502)), 9502);
        assert_eq!(device.connect_port(None), 1502);
    }

    #[test]
    fn test_new_register_validation() {
        let mut cfg = NewRegisterConfig {
            device_id: 1,
            name: "temperature".into(),
            address: 100,
            count: 1,
            register_type: RegisterKind::Holding,
            data_type: DataKind::Uint16,
            scale_factor: 1.0,
            offset: 0.0,
            unit: None,
            interval_ms: None,
            active: true,
        };
        assert!(cfg.validate().is_ok());

        cfg.data_type = DataKind::Float32;
        assert!(cfg.validate().is_err());
        cfg.count = 2;
        assert!(cfg.validate().is_ok());

        cfg.interval_ms = Some(50);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_data_kind_width() {
        assert_eq!(DataKind::Uint16.width(), 1);
        assert_eq!(DataKind::Float32.width(), 2);
    }
}
