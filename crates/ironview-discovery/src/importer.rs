//! Discovery importer.
//!
//! Reconciles scan results into the device inventory. Only PLC candidates
//! (classifier confidence at or above the threshold) or hosts with a
//! recognized industrial port are imported; everything else is noise.

use serde::Serialize;

use ironview_storage::{DiscoveredUpsert, ProtocolKind, Stores, UpsertOutcome};

use crate::classify::PLC_CONFIDENCE_THRESHOLD;
use crate::model::DiscoveredHost;
use crate::services::{
    is_industrial_port, ETHERNET_IP_PORTS, MODBUS_PORTS, OPCUA_PORTS, S7_PORTS,
};

/// Importer flags.
#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub auto_activate: bool,
    pub overwrite_existing: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            auto_activate: true,
            overwrite_existing: false,
        }
    }
}

/// Import statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportStats {
    pub total_found: usize,
    pub candidates: usize,
    pub saved: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: usize,
}

fn is_import_candidate(host: &DiscoveredHost) -> bool {
    let confident = host
        .industrial
        .as_ref()
        .map(|a| a.confidence >= PLC_CONFIDENCE_THRESHOLD)
        .unwrap_or(false);
    confident
        || host
            .open_port_list()
            .iter()
            .any(|port| is_industrial_port(*port))
}

/// First recognized industrial port, by protocol priority; 502 when none.
fn primary_port(host: &DiscoveredHost) -> u16 {
    for group in [MODBUS_PORTS, S7_PORTS, ETHERNET_IP_PORTS, OPCUA_PORTS] {
        for port in group {
            if host.has_open_port(*port) {
                return *port;
            }
        }
    }
    502
}

fn map_protocol(primary: u16) -> ProtocolKind {
    if S7_PORTS.contains(&primary) {
        ProtocolKind::S7Tcp
    } else if ETHERNET_IP_PORTS.contains(&primary) {
        ProtocolKind::EthernetIp
    } else if OPCUA_PORTS.contains(&primary) {
        ProtocolKind::Opcua
    } else {
        ProtocolKind::ModbusTcp
    }
}

fn title_case(tag: &str) -> String {
    tag.split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Generated inventory name for a discovered controller.
fn plc_name(host: &DiscoveredHost) -> String {
    let protocols: Vec<&str> = host
        .industrial
        .as_ref()
        .map(|a| a.protocols.iter().map(String::as_str).collect())
        .unwrap_or_default();

    if protocols.contains(&"modbus") {
        format!("Modbus PLC {}", host.ip)
    } else if protocols.contains(&"s7") {
        format!("Siemens PLC {}", host.ip)
    } else if protocols.contains(&"ethernet_ip") {
        format!("Rockwell PLC {}", host.ip)
    } else if protocols.contains(&"opcua") {
        format!("OPC-UA Device {}", host.ip)
    } else {
        let kind = host
            .industrial
            .as_ref()
            .map(|a| a.kind.as_str())
            .unwrap_or("device");
        format!("{} {}", title_case(kind), host.ip)
    }
}

/// Reconcile hosts into the inventory with the manual-protection rule.
pub fn import_hosts(
    stores: &Stores,
    hosts: &[DiscoveredHost],
    options: &ImportOptions,
) -> ImportStats {
    let mut stats = ImportStats {
        total_found: hosts.len(),
        ..Default::default()
    };

    for host in hosts {
        if !is_import_candidate(host) {
            continue;
        }
        stats.candidates += 1;

        let primary = primary_port(host);
        let detected_ports: Vec<u16> = host
            .open_port_list()
            .into_iter()
            .filter(|port| is_industrial_port(*port))
            .collect();
        let ports = if detected_ports.is_empty() {
            vec![primary]
        } else {
            detected_ports
        };

        let upsert = DiscoveredUpsert {
            ip: host.ip,
            name: plc_name(host),
            mac: host.mac.clone(),
            subnet: host.network.clone(),
            ports,
            protocol: map_protocol(primary),
            kind: host
                .industrial
                .as_ref()
                .map(|a| a.kind.clone())
                .unwrap_or_else(|| "device".to_string()),
            online: host.responds_to_ping,
            auto_activate: options.auto_activate,
        };

        match stores
            .devices
            .upsert_discovered(&upsert, options.overwrite_existing)
        {
            Ok(UpsertOutcome::Created(id)) => {
                tracing::info!(device_id = id, ip = %host.ip, "imported new device");
                stats.saved += 1;
            }
            Ok(UpsertOutcome::Updated(id)) => {
                tracing::debug!(device_id = id, ip = %host.ip, "refreshed device from discovery");
                stats.updated += 1;
            }
            Ok(UpsertOutcome::Skipped(_)) => stats.skipped += 1,
            Err(e) => {
                tracing::warn!(ip = %host.ip, "import failed: {e}");
                stats.errors += 1;
            }
        }
    }

    stats
}
