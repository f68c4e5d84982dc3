//! Unified configuration loading.
//!
//! All tunables live in environment variables. This module is the single
//! place that knows the variable names and their defaults, so the other
//! crates never hardcode either.

use std::path::PathBuf;
use std::time::Duration;

/// Default values for the polling engine.
pub mod polling {
    /// Default per-register polling interval in milliseconds.
    pub const DEFAULT_INTERVAL_MS: u64 = 1000;
    /// Default per-call timeout in milliseconds.
    pub const DEFAULT_TIMEOUT_MS: u64 = 3000;
    /// Lower bound for both interval and timeout.
    pub const MIN_INTERVAL_MS: u64 = 100;
    /// Poller loop tick.
    pub const TICK_MS: u64 = 500;
    /// Sleep when a device has no active register configs.
    pub const IDLE_BACKOFF_MS: u64 = 5000;
    /// Sleep after a failed connect attempt.
    pub const RECONNECT_BACKOFF_MS: u64 = 2000;
    /// Grace period for a poller to finish its in-flight batch on stop.
    pub const STOP_GRACE_MS: u64 = 2000;
    /// Supervisor-wide cooperative shutdown deadline.
    pub const SHUTDOWN_DEADLINE_MS: u64 = 10_000;
    /// Supervisor reconcile tick.
    pub const SUPERVISOR_TICK_MS: u64 = 5000;
}

/// Default values for the discovery pipeline.
pub mod discovery {
    /// Hard cap on concurrent discovery workers.
    pub const DEFAULT_MAX_TOTAL_WORKERS: usize = 32;
    /// Per-interface concurrency cap.
    pub const DEFAULT_MAX_WORKERS_PER_INTERFACE: usize = 8;
    /// ICMP sweep chunk size.
    pub const ICMP_CHUNK: usize = 200;
    /// Per-host deep scan timeout in seconds.
    pub const DEFAULT_DEEP_SCAN_TIMEOUT_S: u64 = 300;
}

/// Environment variable names.
pub mod env_vars {
    pub const DATA_DIR: &str = "DATA_DIR";
    pub const DISCOVERY_FILE: &str = "DISCOVERY_FILE";
    pub const POLL_DEFAULT_INTERVAL_MS: &str = "POLL_DEFAULT_INTERVAL_MS";
    pub const POLL_DEFAULT_TIMEOUT_MS: &str = "POLL_DEFAULT_TIMEOUT_MS";
    pub const RETENTION_DAYS: &str = "RETENTION_DAYS";
    pub const USE_DEEP_SCAN: &str = "USE_DEEP_SCAN";
    pub const DEEP_SCAN_PER_HOST_TIMEOUT_S: &str = "DEEP_SCAN_PER_HOST_TIMEOUT_S";
    pub const MAX_TOTAL_WORKERS: &str = "MAX_TOTAL_WORKERS";
    pub const MAX_WORKERS_PER_INTERFACE: &str = "MAX_WORKERS_PER_INTERFACE";
    pub const LOG_JSON: &str = "IRONVIEW_LOG_JSON";
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Base directory for persistent state.
pub fn data_dir() -> PathBuf {
    std::env::var(env_vars::DATA_DIR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./data"))
}

/// Optional path for the raw discovery result file.
pub fn discovery_file() -> Option<PathBuf> {
    std::env::var(env_vars::DISCOVERY_FILE).ok().map(PathBuf::from)
}

/// Fleet-wide default polling interval.
pub fn poll_default_interval() -> Duration {
    Duration::from_millis(env_parse(
        env_vars::POLL_DEFAULT_INTERVAL_MS,
        polling::DEFAULT_INTERVAL_MS,
    ))
}

/// Fleet-wide default per-call timeout.
pub fn poll_default_timeout() -> Duration {
    Duration::from_millis(env_parse(
        env_vars::POLL_DEFAULT_TIMEOUT_MS,
        polling::DEFAULT_TIMEOUT_MS,
    ))
}

/// Reading retention window in days.
pub fn retention_days() -> u64 {
    env_parse(env_vars::RETENTION_DAYS, 30)
}

/// Whether the deep (nmap) scan phase is enabled.
pub fn use_deep_scan() -> bool {
    env_parse(env_vars::USE_DEEP_SCAN, true)
}

/// Per-host deep scan timeout.
pub fn deep_scan_per_host_timeout() -> Duration {
    Duration::from_secs(env_parse(
        env_vars::DEEP_SCAN_PER_HOST_TIMEOUT_S,
        discovery::DEFAULT_DEEP_SCAN_TIMEOUT_S,
    ))
}

/// Total discovery worker cap.
pub fn max_total_workers() -> usize {
    env_parse(
        env_vars::MAX_TOTAL_WORKERS,
        discovery::DEFAULT_MAX_TOTAL_WORKERS,
    )
    .max(1)
}

/// Per-interface discovery worker cap.
pub fn max_workers_per_interface() -> usize {
    env_parse(
        env_vars::MAX_WORKERS_PER_INTERFACE,
        discovery::DEFAULT_MAX_WORKERS_PER_INTERFACE,
    )
    .max(1)
}

/// Whether log output should be JSON (container environments).
pub fn log_json() -> bool {
    env_parse(env_vars::LOG_JSON, false)
}
