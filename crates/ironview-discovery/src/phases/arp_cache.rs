//! OS ARP-cache blend (discovery phase 4).
//!
//! The kernel already knows the MACs of recently seen neighbours; blending
//! `/proc/net/arp` in costs nothing and needs no privileges.

use std::net::Ipv4Addr;

use crate::dedup::normalize_mac;

/// One cache row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArpCacheEntry {
    pub ip: Ipv4Addr,
    pub mac: String,
    pub device: String,
}

/// Parse the `/proc/net/arp` table format.
pub fn parse_arp_table(content: &str) -> Vec<ArpCacheEntry> {
    let mut entries = Vec::new();
    for line in content.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        // IP address, HW type, Flags, HW address, Mask, Device
        if fields.len() < 6 {
            continue;
        }
        // Flags 0x0 marks an incomplete entry.
        if fields[2] == "0x0" {
            continue;
        }
        let Ok(ip) = fields[0].parse::<Ipv4Addr>() else {
            continue;
        };
        let Some(mac) = normalize_mac(fields[3]) else {
            continue;
        };
        entries.push(ArpCacheEntry {
            ip,
            mac,
            device: fields[5].to_string(),
        });
    }
    entries
}

/// Read the OS ARP table. Missing or unreadable tables simply contribute
/// nothing.
pub fn read_arp_table() -> Vec<ArpCacheEntry> {
    match std::fs::read_to_string("/proc/net/arp") {
        Ok(content) => parse_arp_table(&content),
        Err(e) => {
            tracing::debug!("arp cache unavailable: {e}");
            Vec::new()
        }
    }
}
