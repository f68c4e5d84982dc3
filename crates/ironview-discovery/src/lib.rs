//! Network discovery for ironview.
//!
//! A multi-interface, multi-phase scan: passive sniff, ARP sweep, ARP-cache
//! blend, ICMP sweep, quick TCP probe, optional nmap deep scan, service
//! identification, industrial classification and MAC-keyed dedup. Results
//! feed the importer, which reconciles candidates into the inventory.
//!
//! The privileged phases (sniff, ARP) require the raw-socket capability;
//! without it a run degrades to connect-scanning and says so once in its log.

pub mod classify;
pub mod dedup;
pub mod importer;
pub mod interfaces;
pub mod model;
pub mod phases;
pub mod pipeline;
pub mod run_log;
pub mod service;
pub mod services;

pub use classify::{classify, is_candidate, PLC_CONFIDENCE_THRESHOLD};
pub use dedup::{dedupe_hosts, normalize_mac};
pub use importer::{import_hosts, ImportOptions, ImportStats};
pub use interfaces::{enumerate, InterfaceKind, NetInterface};
pub use model::{
    DiscoveredHost, DiscoveryMethod, IndustrialAssessment, PortInfo, PortState, ServiceHint,
    ServiceKind,
};
pub use pipeline::{adaptive_timeouts, run_scan, PhaseTimeouts, ScanOptions, ScanReport};
pub use run_log::RunLog;
pub use service::{DiscoveryService, DiscoveryStatus, RunError, RunOptions, RunStats};
