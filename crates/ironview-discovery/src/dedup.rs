//! MAC-based host deduplication.
//!
//! After all phases ran, entries are grouped by normalized MAC when one is
//! known (a host answering on two ips folds into one record) and by ip
//! otherwise. Merge semantics live on [`DiscoveredHost::merge`]; this module
//! adds the grouping and the representative-ip rule.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use crate::model::DiscoveredHost;

/// Normalize a MAC to `aa:bb:cc:dd:ee:ff`.
///
/// Accepts `:`/`-`/`.` separated and bare-hex forms. Returns `None` for
/// anything that is not 12 hex digits, for the all-zero address and for the
/// broadcast address.
pub fn normalize_mac(raw: &str) -> Option<String> {
    let hex: String = raw
        .trim()
        .chars()
        .filter(|c| *c != ':' && *c != '-' && *c != '.')
        .collect::<String>()
        .to_ascii_lowercase();

    if hex.len() != 12 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    if hex == "000000000000" || hex == "ffffffffffff" {
        return None;
    }

    let mut out = String::with_capacity(17);
    for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
        if i > 0 {
            out.push(':');
        }
        out.push(chunk[0] as char);
        out.push(chunk[1] as char);
    }
    Some(out)
}

/// Representative ip of a merged group: the first ip that answered a ping,
/// else the first with any open port, else the first seen.
fn representative_ip(entries: &[DiscoveredHost]) -> Ipv4Addr {
    entries
        .iter()
        .find(|h| h.responds_to_ping)
        .or_else(|| entries.iter().find(|h| !h.open_port_list().is_empty()))
        .unwrap_or(&entries[0])
        .ip
}

/// Collapse raw per-ip entries into unique hosts.
pub fn dedupe_hosts(raw: Vec<DiscoveredHost>) -> Vec<DiscoveredHost> {
    // Group key: normalized mac when valid, otherwise the ip itself.
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<DiscoveredHost>> = HashMap::new();

    for mut host in raw {
        host.mac = host.mac.as_deref().and_then(normalize_mac);
        let key = host
            .mac
            .clone()
            .unwrap_or_else(|| format!("ip:{}", host.ip));
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(host);
    }

    let mut result = Vec::with_capacity(order.len());
    for key in order {
        let entries = groups.remove(&key).expect("group present");
        let ip = representative_ip(&entries);

        let mut iter = entries.into_iter();
        let mut merged = iter.next().expect("non-empty group");
        for entry in iter {
            merged.merge(entry);
        }
        merged.ip = ip;
        if !merged.ips_seen.contains(&ip) {
            merged.ips_seen.push(ip);
        }
        result.push(merged);
    }
    result
}
