//! Interface enumeration (discovery phase 1).
//!
//! Collects every UP, non-loopback IPv4 interface with enough metadata for
//! the later phases: the CIDR to sweep, the MAC to stamp into ARP frames and
//! a rough type classification from the interface name.

use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use pnet::datalink;
use serde::Serialize;

/// Rough interface class, guessed from the name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceKind {
    Ethernet,
    Wireless,
    Bridge,
    Virtual,
    Tunnel,
    Unknown,
}

/// One scannable interface.
#[derive(Debug, Clone, Serialize)]
pub struct NetInterface {
    pub name: String,
    pub ip: Ipv4Addr,
    pub netmask: Ipv4Addr,
    /// Network CIDR, e.g. `10.0.0.0/24`.
    pub network: Ipv4Network,
    pub broadcast: Option<Ipv4Addr>,
    pub mac: Option<String>,
    pub kind: InterfaceKind,
}

impl NetInterface {
    /// Number of host addresses in the interface's network.
    pub fn host_count(&self) -> u32 {
        let bits = 32 - self.network.prefix();
        if bits >= 2 {
            2u32.saturating_pow(bits as u32) - 2
        } else {
            1
        }
    }
}

/// Classify an interface by its name.
pub fn classify_name(name: &str) -> InterfaceKind {
    let lower = name.to_ascii_lowercase();
    if lower.starts_with("veth")
        || lower.starts_with("virbr")
        || lower.starts_with("docker")
        || lower.starts_with("vmnet")
    {
        InterfaceKind::Virtual
    } else if lower.starts_with("br") {
        InterfaceKind::Bridge
    } else if lower.starts_with("tun") || lower.starts_with("tap") || lower.starts_with("wg") {
        InterfaceKind::Tunnel
    } else if lower.starts_with("wl") || lower.starts_with("ath") || lower.starts_with("wifi") {
        InterfaceKind::Wireless
    } else if lower.starts_with("eth") || lower.starts_with("en") || lower.starts_with("em") {
        InterfaceKind::Ethernet
    } else {
        InterfaceKind::Unknown
    }
}

/// Enumerate scannable interfaces, optionally restricted by name.
pub fn enumerate(only: Option<&[String]>) -> Vec<NetInterface> {
    let mut result = Vec::new();

    for iface in datalink::interfaces() {
        if !iface.is_up() || iface.is_loopback() {
            continue;
        }
        if let Some(names) = only {
            if !names.iter().any(|n| n == &iface.name) {
                continue;
            }
        }

        for ip_network in &iface.ips {
            let ipnetwork::IpNetwork::V4(v4) = ip_network else {
                continue;
            };

            result.push(NetInterface {
                name: iface.name.clone(),
                ip: v4.ip(),
                netmask: v4.mask(),
                network: Ipv4Network::new(v4.network(), v4.prefix())
                    .unwrap_or_else(|_| *v4),
                broadcast: Some(v4.broadcast()),
                mac: iface.mac.map(|m| m.to_string().to_ascii_lowercase()),
                kind: classify_name(&iface.name),
            });
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_names() {
        assert_eq!(classify_name("eth0"), InterfaceKind::Ethernet);
        assert_eq!(classify_name("enp3s0"), InterfaceKind::Ethernet);
        assert_eq!(classify_name("wlan0"), InterfaceKind::Wireless);
        assert_eq!(classify_name("wlp2s0"), InterfaceKind::Wireless);
        assert_eq!(classify_name("br0"), InterfaceKind::Bridge);
        assert_eq!(classify_name("docker0"), InterfaceKind::Virtual);
        assert_eq!(classify_name("veth12ab"), InterfaceKind::Virtual);
        assert_eq!(classify_name("tun0"), InterfaceKind::Tunnel);
        assert_eq!(classify_name("wg0"), InterfaceKind::Tunnel);
        assert_eq!(classify_name("ppp0"), InterfaceKind::Unknown);
    }

    #[test]
    fn test_host_count() {
        let iface = NetInterface {
            name: "eth0".into(),
            ip: Ipv4Addr::new(10, 0, 0, 5),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            network: Ipv4Network::new(Ipv4Addr::new(10, 0, 0, 0), 24).unwrap(),
            broadcast: Some(Ipv4Addr::new(10, 0, 0, 255)),
            mac: None,
            kind: InterfaceKind::Ethernet,
        };
        assert_eq!(iface.host_count(), 254);
    }

    #[test]
    fn test_enumerate_does_not_panic() {
        // Environment-dependent; only the invariants are checked.
        for iface in enumerate(None) {
            assert!(!iface.name.is_empty());
            assert!(iface.network.prefix() <= 32);
        }
    }
}
