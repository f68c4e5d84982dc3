//! Discovery service: single-flight runs, status and the result file.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use thiserror::Error;

use ironview_core::config;
use ironview_storage::Stores;

use crate::importer::{import_hosts, ImportOptions, ImportStats};
use crate::model::DiscoveredHost;
use crate::pipeline::{run_scan, ScanOptions};
use crate::run_log::RunLog;

/// Flags accepted by the run endpoint.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub interfaces: Option<Vec<String>>,
    pub auto_activate: bool,
    pub overwrite_existing: bool,
}

/// Combined scan + import statistics of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunStats {
    #[serde(flatten)]
    pub import: ImportStats,
    pub duration_ms: u64,
    pub degraded: bool,
    pub partial_phases: Vec<String>,
}

/// Externally visible service state.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryStatus {
    pub running: bool,
    pub started_at_ms: Option<i64>,
    pub last_finished_at_ms: Option<i64>,
    pub result_count: usize,
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("a discovery run is already active")]
    AlreadyRunning,
}

#[derive(Default)]
struct StatusInner {
    started_at_ms: Option<i64>,
    last_finished_at_ms: Option<i64>,
    result_count: usize,
}

/// Orchestrates scans and imports; at most one run at a time.
pub struct DiscoveryService {
    stores: Arc<Stores>,
    running: AtomicBool,
    status: Mutex<StatusInner>,
    log: RunLog,
}

impl DiscoveryService {
    pub fn new(stores: Arc<Stores>) -> Arc<Self> {
        Arc::new(Self {
            stores,
            running: AtomicBool::new(false),
            status: Mutex::new(StatusInner::default()),
            log: RunLog::new(),
        })
    }

    pub fn status(&self) -> DiscoveryStatus {
        let inner = self.status.lock().expect("discovery status poisoned");
        DiscoveryStatus {
            running: self.running.load(Ordering::SeqCst),
            started_at_ms: inner.started_at_ms,
            last_finished_at_ms: inner.last_finished_at_ms,
            result_count: inner.result_count,
        }
    }

    /// Text of the current (or last) run log.
    pub fn log_text(&self) -> String {
        self.log.snapshot_text()
    }

    /// Run one scan-and-import cycle. Rejected while another run is active.
    pub async fn run(&self, options: RunOptions) -> Result<RunStats, RunError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(RunError::AlreadyRunning);
        }

        self.log.clear();
        self.log.push("discovery run started");
        {
            let mut inner = self.status.lock().expect("discovery status poisoned");
            inner.started_at_ms = Some(chrono::Utc::now().timestamp_millis());
        }

        let scan_options = ScanOptions {
            interfaces: options.interfaces.clone(),
            ..Default::default()
        };
        let report = run_scan(&scan_options, &self.log).await;

        if let Some(path) = config::discovery_file() {
            if let Err(e) = write_results_atomic(&path, &report.hosts) {
                self.log.push(format!("result file write failed: {e}"));
            }
        }

        let import_options = ImportOptions {
            auto_activate: options.auto_activate,
            overwrite_existing: options.overwrite_existing,
        };
        let import = import_hosts(&self.stores, &report.hosts, &import_options);
        self.log.push(format!(
            "import: {} saved, {} updated, {} skipped, {} error(s)",
            import.saved, import.updated, import.skipped, import.errors
        ));

        {
            let mut inner = self.status.lock().expect("discovery status poisoned");
            inner.last_finished_at_ms = Some(chrono::Utc::now().timestamp_millis());
            inner.result_count = report.hosts.len();
        }
        self.running.store(false, Ordering::SeqCst);

        Ok(RunStats {
            import,
            duration_ms: report.duration.as_millis() as u64,
            degraded: report.degraded,
            partial_phases: report.partial,
        })
    }
}

/// Write the raw host list as JSON via temp-file + rename so readers never
/// observe a torn file.
pub fn write_results_atomic(path: &Path, hosts: &[DiscoveredHost]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut sorted: Vec<&DiscoveredHost> = hosts.iter().collect();
    sorted.sort_by_key(|h| h.ip);
    let json = serde_json::to_vec_pretty(&sorted)?;

    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_atomic_write_and_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/discovery.json");

        let hosts = vec![
            DiscoveredHost::new(Ipv4Addr::new(10, 0, 0, 9)),
            DiscoveredHost::new(Ipv4Addr::new(10, 0, 0, 2)),
        ];
        write_results_atomic(&path, &hosts).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let parsed: Vec<serde_json::Value> = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed.len(), 2);
        // Sorted by ip.
        assert_eq!(parsed[0]["ip"], "10.0.0.2");
        assert!(!path.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_run_updates_status() {
        let stores = Stores::memory().unwrap();
        let service = DiscoveryService::new(stores);

        assert!(!service.status().running);
        assert!(service.status().started_at_ms.is_none());

        let stats = service
            .run(RunOptions {
                interfaces: Some(vec!["no-such-interface".into()]),
                auto_activate: false,
                overwrite_existing: false,
            })
            .await
            .unwrap();

        assert_eq!(stats.import.total_found, 0);
        let status = service.status();
        assert!(!status.running);
        assert!(status.started_at_ms.is_some());
        assert!(status.last_finished_at_ms.is_some());
        assert_eq!(status.result_count, 0);
        assert!(service.log_text().contains("discovery run started"));
    }
}
