//! Port catalogue and service identification.

use crate::model::{ServiceHint, ServiceKind};

pub const MODBUS_PORTS: &[u16] = &[502, 1502];
pub const S7_PORTS: &[u16] = &[102];
pub const ETHERNET_IP_PORTS: &[u16] = &[44818, 2222, 5555, 1911];
pub const OPCUA_PORTS: &[u16] = &[4840, 48400, 48401, 48402];
pub const SNMP_PORTS: &[u16] = &[161, 162];
pub const WEB_PORTS: &[u16] = &[80, 443, 8080];
pub const DNP3_PORTS: &[u16] = &[20000, 20001, 20002];

/// Fixed port set probed by the quick TCP phase.
pub const SCAN_PORTS: &[u16] = &[
    502, 1502, 102, 44818, 2222, 5555, 1911, 4840, 48400, 48401, 48402, 161, 162, 80, 443, 8080,
    20000, 20001, 20002, 21, 23,
];

/// Ports that identify an industrial protocol endpoint.
pub fn is_industrial_port(port: u16) -> bool {
    MODBUS_PORTS.contains(&port)
        || S7_PORTS.contains(&port)
        || ETHERNET_IP_PORTS.contains(&port)
        || OPCUA_PORTS.contains(&port)
        || DNP3_PORTS.contains(&port)
}

/// Best-effort service guess for an open port.
pub fn service_hint(port: u16) -> ServiceHint {
    let (name, protocol, kind) = match port {
        p if MODBUS_PORTS.contains(&p) => ("modbus", Some("modbus_tcp"), ServiceKind::Industrial),
        102 => ("s7comm", Some("s7_tcp"), ServiceKind::Industrial),
        p if ETHERNET_IP_PORTS.contains(&p) => {
            ("ethernet_ip", Some("ethernet_ip"), ServiceKind::Industrial)
        }
        p if OPCUA_PORTS.contains(&p) => ("opcua", Some("opcua"), ServiceKind::Industrial),
        p if DNP3_PORTS.contains(&p) => ("dnp3", Some("dnp3"), ServiceKind::Industrial),
        p if SNMP_PORTS.contains(&p) => ("snmp", None, ServiceKind::Management),
        80 | 8080 => ("http", None, ServiceKind::Web),
        443 => ("https", None, ServiceKind::Web),
        21 => ("ftp", None, ServiceKind::Management),
        23 => ("telnet", None, ServiceKind::Management),
        _ => ("unknown", None, ServiceKind::Unknown),
    };
    ServiceHint {
        name: name.to_string(),
        protocol: protocol.map(str::to_string),
        kind,
    }
}
