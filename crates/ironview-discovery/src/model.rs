//! Discovery data model.
//!
//! A [`DiscoveredHost`] is the transient record a scan produces per host.
//! Entries from different phases are merged keyed by ip first, then
//! deduplicated by MAC (see [`crate::dedup`]).

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

/// How a host (or one of its ports) was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryMethod {
    Passive,
    Arp,
    Icmp,
    Tcp,
    Nmap,
}

/// Observed state of a probed port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortState {
    Open,
    Closed,
    Filtered,
}

/// Per-port observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortInfo {
    pub state: PortState,
    pub method: DiscoveryMethod,
    /// Product/version string from the deep scan, when available.
    pub product: Option<String>,
}

/// Rough class of a service hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    Industrial,
    Web,
    Management,
    Unknown,
}

/// Service guess attached to an open port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHint {
    pub name: String,
    pub protocol: Option<String>,
    pub kind: ServiceKind,
}

/// Classifier verdict for a host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndustrialAssessment {
    /// Device type tag ("modbus_plc", "siemens_plc", ...).
    pub kind: String,
    pub manufacturer: Option<String>,
    pub protocols: Vec<String>,
    /// 0..=100.
    pub confidence: u8,
}

/// Transient per-scan record of one host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredHost {
    pub ip: Ipv4Addr,
    /// Normalized `aa:bb:cc:dd:ee:ff`, when learned.
    pub mac: Option<String>,
    pub interface: Option<String>,
    /// CIDR of the network the host was seen on.
    pub network: Option<String>,
    pub open_ports: BTreeMap<u16, PortInfo>,
    pub services: BTreeMap<u16, ServiceHint>,
    pub discovered_via: BTreeSet<DiscoveryMethod>,
    pub responds_to_ping: bool,
    /// Every ip this host was observed under (MAC dedup can fold several).
    pub ips_seen: Vec<Ipv4Addr>,
    pub industrial: Option<IndustrialAssessment>,
    /// Unix millis of the observation.
    pub timestamp_ms: i64,
}

impl DiscoveredHost {
    pub fn new(ip: Ipv4Addr) -> Self {
        Self {
            ip,
            mac: None,
            interface: None,
            network: None,
            open_ports: BTreeMap::new(),
            services: BTreeMap::new(),
            discovered_via: BTreeSet::new(),
            responds_to_ping: false,
            ips_seen: vec![ip],
            industrial: None,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn seen_via(mut self, method: DiscoveryMethod) -> Self {
        self.discovered_via.insert(method);
        self
    }

    pub fn open_port_list(&self) -> Vec<u16> {
        self.open_ports
            .iter()
            .filter(|(_, info)| info.state == PortState::Open)
            .map(|(port, _)| *port)
            .collect()
    }

    pub fn has_open_port(&self, port: u16) -> bool {
        self.open_ports
            .get(&port)
            .map(|info| info.state == PortState::Open)
            .unwrap_or(false)
    }

    /// Fold another observation of the same host into this one.
    ///
    /// Sets union, open beats non-open, and known values overwrite unknowns;
    /// existing known values are kept.
    pub fn merge(&mut self, other: DiscoveredHost) {
        self.discovered_via.extend(other.discovered_via);
        self.responds_to_ping |= other.responds_to_ping;

        if self.mac.is_none() {
            self.mac = other.mac;
        }
        if self.interface.is_none() {
            self.interface = other.interface;
        }
        if self.network.is_none() {
            self.network = other.network;
        }

        for (port, info) in other.open_ports {
            match self.open_ports.get_mut(&port) {
                Some(existing) => {
                    if existing.state != PortState::Open && info.state == PortState::Open {
                        existing.state = PortState::Open;
                        existing.method = info.method;
                    }
                    if existing.product.is_none() {
                        existing.product = info.product;
                    }
                }
                None => {
                    self.open_ports.insert(port, info);
                }
            }
        }

        for (port, hint) in other.services {
            self.services.entry(port).or_insert(hint);
        }

        for ip in other.ips_seen {
            if !self.ips_seen.contains(&ip) {
                self.ips_seen.push(ip);
            }
        }

        if self.industrial.is_none() {
            self.industrial = other.industrial;
        }
    }
}
