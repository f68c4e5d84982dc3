//! Industrial device classifier.
//!
//! Scores a host's open-port evidence and emits a type/manufacturer/protocol
//! assessment with a 0..=100 confidence. A host at or above
//! [`PLC_CONFIDENCE_THRESHOLD`] is a PLC candidate.

use crate::model::{DiscoveredHost, IndustrialAssessment};
use crate::services::{ETHERNET_IP_PORTS, MODBUS_PORTS, OPCUA_PORTS, SNMP_PORTS, WEB_PORTS};

pub const PLC_CONFIDENCE_THRESHOLD: u8 = 60;

/// Score a host. Deterministic: the same input always yields the same
/// assessment.
pub fn classify(host: &DiscoveredHost) -> IndustrialAssessment {
    let open = |port: u16| host.has_open_port(port);
    let any_open = |ports: &[u16]| ports.iter().any(|p| open(*p));

    let mut score: u32 = 0;
    let mut kind = "device".to_string();
    let mut manufacturer: Option<String> = None;
    let mut protocols: Vec<String> = Vec::new();

    let mut add_protocol = |protocols: &mut Vec<String>, name: &str| {
        if !protocols.iter().any(|p| p == name) {
            protocols.push(name.to_string());
        }
    };

    let modbus = any_open(MODBUS_PORTS);
    if modbus {
        score += 30;
        kind = "modbus_plc".to_string();
        add_protocol(&mut protocols, "modbus");
    }

    let s7 = open(102);
    if s7 {
        score += 25;
        manufacturer.get_or_insert_with(|| "siemens".to_string());
        add_protocol(&mut protocols, "s7");
    }

    if any_open(ETHERNET_IP_PORTS) {
        score += 25;
        manufacturer.get_or_insert_with(|| "rockwell".to_string());
        add_protocol(&mut protocols, "ethernet_ip");
    }

    if any_open(OPCUA_PORTS) {
        score += 20;
        add_protocol(&mut protocols, "opcua");
    }

    if any_open(SNMP_PORTS) {
        score += 15;
    }

    let industrial_evidence = !protocols.is_empty();
    let web = any_open(WEB_PORTS);
    if web && industrial_evidence {
        score += 10;
        add_protocol(&mut protocols, "http");
    }

    if modbus && (open(80) || open(443)) {
        score += 20;
        kind = "modbus_plc".to_string();
    }

    if s7 && open(80) {
        score += 25;
        manufacturer = Some("siemens".to_string());
        kind = "siemens_plc".to_string();
    }

    // A host carrying only non-Modbus industrial evidence still deserves a
    // type tag.
    if kind == "device" {
        if protocols.iter().any(|p| p == "s7") {
            kind = "siemens_plc".to_string();
        } else if protocols.iter().any(|p| p == "ethernet_ip") {
            kind = "rockwell_plc".to_string();
        } else if protocols.iter().any(|p| p == "opcua") {
            kind = "opcua_device".to_string();
        }
    }

    IndustrialAssessment {
        kind,
        manufacturer,
        protocols,
        confidence: score.min(100) as u8,
    }
}

/// Whether an assessment marks a PLC candidate.
pub fn is_candidate(assessment: &IndustrialAssessment) -> bool {
    assessment.confidence >= PLC_CONFIDENCE_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DiscoveryMethod, PortInfo, PortState};
    use std::net::Ipv4Addr;

    fn host_with_ports(ports: &[u16]) -> DiscoveredHost {
        let mut host = DiscoveredHost::new(Ipv4Addr::new(10, 0, 0, 5));
        for port in ports {
            host.open_ports.insert(
                *port,
                PortInfo { state: PortState::Open, method: DiscoveryMethod::Tcp, product: None },
            );
        }
        host
    }

    #[test]
    fn test_siemens_with_web_interface() {
        let assessment = classify(&host_with_ports(&[102, 80]));
        assert_eq!(assessment.confidence, 60);
        assert_eq!(assessment.kind, "siemens_plc");
        assert_eq!(assessment.manufacturer.as_deref(), Some("siemens"));
        assert!(assessment.protocols.iter().any(|p| p == "s7"));
        assert!(assessment.protocols.iter().any(|p| p == "http"));
        assert!(is_candidate(&assessment));
    }

    #[test]
    fn test_bare_modbus() {
        let assessment = classify(&host_with_ports(&[502]));
        assert_eq!(assessment.confidence, 30);
        assert_eq!(assessment.kind, "modbus_plc");
        assert_eq!(assessment.protocols, vec!["modbus"]);
        assert!(!is_candidate(&assessment));
    }

    #[test]
    fn test_modbus_with_web() {
        // 30 (modbus) + 10 (web alongside industrial) + 20 (502 and 80)
        let assessment = classify(&host_with_ports(&[502, 80]));
        assert_eq!(assessment.confidence, 60);
        assert_eq!(assessment.kind, "modbus_plc");
        assert!(is_candidate(&assessment));
    }

    #[test]
    fn test_plain_web_host_scores_zero() {
        let assessment = classify(&host_with_ports(&[80, 443]));
        assert_eq!(assessment.confidence, 0);
        assert_eq!(assessment.kind, "device");
        assert!(assessment.protocols.is_empty());
    }

    #[test]
    fn test_confidence_capped_at_100() {
        let assessment = classify(&host_with_ports(&[502, 1502, 102, 44818, 4840, 161, 80, 443]));
        assert_eq!(assessment.confidence, 100);
    }

    #[test]
    fn test_deterministic() {
        let host = host_with_ports(&[102, 80, 502]);
        let first = classify(&host);
        let second = classify(&host);
        assert_eq!(first.confidence, second.confidence);
        assert_eq!(first.kind, second.kind);
        assert_eq!(first.protocols, second.protocols);
    }

    #[test]
    fn test_rockwell() {
        let assessment = classify(&host_with_ports(&[44818]));
        assert_eq!(assessment.kind, "rockwell_plc");
        assert_eq!(assessment.manufacturer.as_deref(), Some("rockwell"));
    }
}
