//! The multi-phase scan pipeline.
//!
//! Phases run in a fixed order, each merging its evidence into a map keyed
//! by ip: passive sniff, ARP sweep, ARP-cache blend, ICMP sweep, quick TCP
//! probe, optional deep scan, service identification, classification, MAC
//! dedup. A phase that fails or times out contributes partial results and
//! the pipeline moves on; only the privileged phases can be skipped
//! entirely, which the report flags as a degraded run.

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use tracing::debug;

use ironview_core::config;
use ironview_core::Error;

use crate::classify::classify;
use crate::dedup::dedupe_hosts;
use crate::interfaces::{enumerate, NetInterface};
use crate::model::{DiscoveredHost, DiscoveryMethod, PortInfo, PortState};
use crate::phases::{arp, arp_cache, deep, icmp, passive, tcp};
use crate::run_log::RunLog;
use crate::services::{is_industrial_port, service_hint, SCAN_PORTS};

/// Per-phase base durations; the adaptive scaling multiplies these by the
/// network-size factor.
#[derive(Debug, Clone)]
pub struct PhaseBases {
    pub passive: Duration,
    pub arp: Duration,
    pub icmp: Duration,
    pub tcp: Duration,
}

impl Default for PhaseBases {
    fn default() -> Self {
        Self {
            passive: Duration::from_secs(10),
            arp: Duration::from_secs(2),
            icmp: Duration::from_secs(1),
            tcp: Duration::from_millis(500),
        }
    }
}

/// Scan configuration.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Restrict the scan to these interface names.
    pub interfaces: Option<Vec<String>>,
    pub use_deep_scan: bool,
    pub deep_scan_per_host_timeout: Duration,
    pub bases: PhaseBases,
    pub max_total_workers: usize,
    pub max_workers_per_interface: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            interfaces: None,
            use_deep_scan: config::use_deep_scan(),
            deep_scan_per_host_timeout: config::deep_scan_per_host_timeout(),
            bases: PhaseBases::default(),
            max_total_workers: config::max_total_workers(),
            max_workers_per_interface: config::max_workers_per_interface(),
        }
    }
}

/// Effective phase timeouts after network-size scaling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseTimeouts {
    pub passive: Duration,
    pub arp: Duration,
    pub icmp: Duration,
    pub tcp: Duration,
}

/// Scale the base timeouts with the total network size.
pub fn adaptive_timeouts(total_hosts: u32, bases: &PhaseBases) -> PhaseTimeouts {
    let factor = (total_hosts as f64 / 256.0).max(1.0);
    let scale = |base: Duration, cap: Duration| -> Duration {
        Duration::from_secs_f64(base.as_secs_f64() * factor).min(cap)
    };
    PhaseTimeouts {
        passive: scale(bases.passive, Duration::from_secs(120)),
        arp: scale(bases.arp, Duration::from_secs(10)),
        icmp: scale(bases.icmp, Duration::from_secs(5)),
        tcp: scale(bases.tcp, Duration::from_secs(3)),
    }
}

/// Outcome of a full scan.
#[derive(Debug)]
pub struct ScanReport {
    pub hosts: Vec<DiscoveredHost>,
    /// Human-readable notes about phases that returned partial results.
    pub partial: Vec<String>,
    /// True when the privileged phases were unavailable and the run fell
    /// back to connect-scanning.
    pub degraded: bool,
    pub interfaces: Vec<NetInterface>,
    pub duration: Duration,
}

struct HostMap {
    hosts: HashMap<Ipv4Addr, DiscoveredHost>,
}

impl HostMap {
    fn new() -> Self {
        Self { hosts: HashMap::new() }
    }

    fn entry(&mut self, ip: Ipv4Addr) -> &mut DiscoveredHost {
        self.hosts.entry(ip).or_insert_with(|| DiscoveredHost::new(ip))
    }

    fn known_ips(&self) -> Vec<Ipv4Addr> {
        self.hosts.keys().copied().collect()
    }
}

/// Candidate addresses for the active phases when nothing was learned
/// passively: the interface CIDRs, truncated per interface.
fn cidr_targets(interfaces: &[NetInterface]) -> Vec<Ipv4Addr> {
    let mut targets = Vec::new();
    let mut seen = HashSet::new();
    for iface in interfaces {
        let mut count = 0usize;
        for ip in iface.network.iter() {
            if ip == iface.network.network() || ip == iface.network.broadcast() || ip == iface.ip {
                continue;
            }
            if count >= arp::MAX_SWEEP_ADDRESSES {
                break;
            }
            if seen.insert(ip) {
                targets.push(ip);
            }
            count += 1;
        }
    }
    targets
}

/// Run the full pipeline.
pub async fn run_scan(options: &ScanOptions, log: &RunLog) -> ScanReport {
    let begin = Instant::now();
    let mut partial = Vec::new();
    let mut degraded = false;

    // Phase 1: interface enumeration.
    let interfaces = enumerate(options.interfaces.as_deref());
    log.push(format!("phase 1: {} scannable interface(s)", interfaces.len()));
    if interfaces.is_empty() {
        return ScanReport {
            hosts: Vec::new(),
            partial,
            degraded,
            interfaces,
            duration: begin.elapsed(),
        };
    }

    let total_hosts: u32 = interfaces.iter().map(|i| i.host_count()).sum();
    let timeouts = adaptive_timeouts(total_hosts, &options.bases);
    log.push(format!(
        "network size {total_hosts} host(s); timeouts passive={:?} arp={:?} icmp={:?} tcp={:?}",
        timeouts.passive, timeouts.arp, timeouts.icmp, timeouts.tcp
    ));

    let mut map = HostMap::new();

    // Phase 2: passive sniff, all interfaces concurrently.
    let sniffs = futures::future::join_all(
        interfaces
            .iter()
            .map(|iface| passive::sniff_interface(iface, timeouts.passive)),
    )
    .await;
    for (iface, result) in interfaces.iter().zip(sniffs) {
        match result {
            Ok(sources) => {
                log.push(format!(
                    "phase 2: passive sniff on {} saw {} source ip(s)",
                    iface.name,
                    sources.len()
                ));
                for ip in sources {
                    let host = map.entry(ip);
                    host.discovered_via.insert(DiscoveryMethod::Passive);
                    host.interface.get_or_insert_with(|| iface.name.clone());
                    host.network.get_or_insert_with(|| iface.network.to_string());
                }
            }
            Err(Error::Permission(detail)) => {
                if !degraded {
                    log.push(format!(
                        "phase 2: raw sockets unavailable ({detail}); degrading to connect scan"
                    ));
                }
                degraded = true;
            }
            Err(e) => {
                partial.push(format!("passive/{}: {e}", iface.name));
            }
        }
    }

    // Phase 3: ARP sweep per interface (skipped once we know we lack the
    // capability).
    if !degraded {
        let sweeps = futures::future::join_all(
            interfaces
                .iter()
                .map(|iface| arp::sweep_interface(iface, timeouts.arp)),
        )
        .await;
        for (iface, result) in interfaces.iter().zip(sweeps) {
            match result {
                Ok(entries) => {
                    log.push(format!(
                        "phase 3: arp sweep on {} answered by {} host(s)",
                        iface.name,
                        entries.len()
                    ));
                    for entry in entries {
                        let host = map.entry(entry.ip);
                        host.discovered_via.insert(DiscoveryMethod::Arp);
                        host.mac.get_or_insert(entry.mac);
                        host.interface.get_or_insert(entry.interface);
                        host.network.get_or_insert(entry.network);
                    }
                }
                Err(Error::Permission(detail)) => {
                    if !degraded {
                        log.push(format!(
                            "phase 3: raw sockets unavailable ({detail}); degrading to connect scan"
                        ));
                    }
                    degraded = true;
                }
                Err(e) => partial.push(format!("arp/{}: {e}", iface.name)),
            }
        }
    }

    // Phase 4: ARP cache blend, a read-only MAC source.
    let cache_entries = arp_cache::read_arp_table();
    let mut blended = 0;
    for entry in cache_entries {
        if let Some(host) = map.hosts.get_mut(&entry.ip) {
            if host.mac.is_none() {
                host.mac = Some(entry.mac);
                blended += 1;
            }
        }
    }
    log.push(format!("phase 4: arp cache filled {blended} mac(s)"));

    // Target set for the active phases.
    let targets = if map.hosts.is_empty() {
        let targets = cidr_targets(&interfaces);
        log.push(format!(
            "no hosts learned yet; sweeping {} cidr address(es)",
            targets.len()
        ));
        targets
    } else {
        map.known_ips()
    };

    // Phase 5: ICMP sweep.
    match icmp::ping_sweep(&targets, timeouts.icmp).await {
        Ok(alive) => {
            log.push(format!("phase 5: {} host(s) answer ping", alive.len()));
            for ip in alive {
                let host = map.entry(ip);
                host.responds_to_ping = true;
                host.discovered_via.insert(DiscoveryMethod::Icmp);
            }
        }
        Err(Error::Permission(detail)) => {
            log.push(format!("phase 5: icmp unavailable ({detail})"));
            partial.push(format!("icmp: {detail}"));
        }
        Err(e) => partial.push(format!("icmp: {e}")),
    }

    // Phase 6: quick TCP probe of the industrial port set.
    let probe_targets = if map.hosts.is_empty() { targets } else { map.known_ips() };
    let per_iface_cap = options
        .max_workers_per_interface
        .saturating_mul(interfaces.len().max(1));
    let workers = options.max_total_workers.min(per_iface_cap.max(1));
    let open_map = tcp::probe_hosts(&probe_targets, SCAN_PORTS, timeouts.tcp, workers).await;
    let open_hosts = open_map.len();
    for (ip, ports) in open_map {
        let host = map.entry(ip);
        host.discovered_via.insert(DiscoveryMethod::Tcp);
        for port in ports {
            host.open_ports.insert(
                port,
                PortInfo { state: PortState::Open, method: DiscoveryMethod::Tcp, product: None },
            );
        }
    }
    log.push(format!("phase 6: tcp probe found open ports on {open_hosts} host(s)"));

    // Phase 7: deep scan of hosts showing an industrial port.
    if options.use_deep_scan {
        let candidates: Vec<Ipv4Addr> = map
            .hosts
            .values()
            .filter(|h| h.open_port_list().iter().any(|p| is_industrial_port(*p)))
            .map(|h| h.ip)
            .collect();
        log.push(format!("phase 7: deep scanning {} candidate(s)", candidates.len()));

        let per_host = options.deep_scan_per_host_timeout;
        let results = stream::iter(candidates)
            .map(|ip| async move { (ip, deep::scan_host(ip, per_host).await) })
            .buffer_unordered(4)
            .collect::<Vec<_>>()
            .await;

        for (ip, result) in results {
            match result {
                Ok(findings) => {
                    let host = map.entry(ip);
                    host.discovered_via.insert(DiscoveryMethod::Nmap);
                    for finding in findings {
                        if finding.state != "open" {
                            continue;
                        }
                        let info = host.open_ports.entry(finding.port).or_insert(PortInfo {
                            state: PortState::Open,
                            method: DiscoveryMethod::Nmap,
                            product: None,
                        });
                        info.state = PortState::Open;
                        if info.product.is_none() {
                            info.product = finding.product;
                        }
                    }
                }
                Err(e) => {
                    debug!("deep scan of {ip}: {e}");
                    partial.push(format!("deep/{ip}: {e}"));
                }
            }
        }
    }

    // Phase 8: service identification + classification.
    for host in map.hosts.values_mut() {
        for port in host.open_port_list() {
            host.services.entry(port).or_insert_with(|| service_hint(port));
        }
        host.industrial = Some(classify(host));
    }

    // MAC dedup across everything.
    let mut raw: Vec<DiscoveredHost> = map.hosts.into_values().collect();
    raw.sort_by_key(|h| h.ip);
    let hosts = dedupe_hosts(raw);
    log.push(format!("scan finished: {} unique host(s)", hosts.len()));

    ScanReport {
        hosts,
        partial,
        degraded,
        interfaces,
        duration: begin.elapsed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adaptive_timeouts_small_network() {
        let bases = PhaseBases::default();
        let t = adaptive_timeouts(254, &bases);
        // Factor clamps at 1 for anything up to a /24.
        assert_eq!(t.passive, bases.passive);
        assert_eq!(t.arp, bases.arp);
    }

    #[test]
    fn test_adaptive_timeouts_scale_and_cap() {
        let bases = PhaseBases::default();
        let t = adaptive_timeouts(1024, &bases);
        // Factor 4.
        assert_eq!(t.passive, Duration::from_secs(40));
        assert_eq!(t.arp, Duration::from_secs(8));
        assert_eq!(t.icmp, Duration::from_secs(4));
        assert_eq!(t.tcp, Duration::from_secs(2));

        let huge = adaptive_timeouts(1_000_000, &bases);
        assert_eq!(huge.passive, Duration::from_secs(120));
        assert_eq!(huge.arp, Duration::from_secs(10));
        assert_eq!(huge.icmp, Duration::from_secs(5));
        assert_eq!(huge.tcp, Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_run_scan_without_interfaces_is_empty() {
        let options = ScanOptions {
            interfaces: Some(vec!["definitely-not-a-real-interface".into()]),
            use_deep_scan: false,
            ..Default::default()
        };
        let log = RunLog::new();
        let report = run_scan(&options, &log).await;
        assert!(report.hosts.is_empty());
        assert!(report.interfaces.is_empty());
        assert!(!log.snapshot_text().is_empty());
    }
}
