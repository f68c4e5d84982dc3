//! Bounded per-device log ring.
//!
//! Every device carries a small ring of structured log lines describing its
//! recent connect/read/write history. The ring is capped and collapses
//! consecutive duplicates into a repeat counter so a flapping device cannot
//! flood memory.

use std::collections::VecDeque;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// Maximum entries retained per device.
pub const LOG_CAP: usize = 200;

/// One structured log line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogEntry {
    /// Unix millis.
    pub ts: i64,
    /// Short event tag, e.g. "connect_failed", "read_timeout".
    pub event: String,
    pub ip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// How many consecutive identical lines this entry stands for.
    #[serde(default = "default_repeat")]
    pub repeat: u32,
}

fn default_repeat() -> u32 {
    1
}

impl LogEntry {
    pub fn new(event: impl Into<String>, ip: impl Into<String>) -> Self {
        Self {
            ts: chrono::Utc::now().timestamp_millis(),
            event: event.into(),
            ip: ip.into(),
            port: None,
            address: None,
            details: None,
            repeat: 1,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_address(mut self, address: u16) -> Self {
        self.address = Some(address);
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    fn same_shape(&self, other: &Self) -> bool {
        self.event == other.event
            && self.ip == other.ip
            && self.port == other.port
            && self.address == other.address
            && self.details == other.details
    }
}

/// Capped ring of [`LogEntry`] values with duplicate collapse.
#[derive(Debug, Default)]
pub struct DeviceLog {
    entries: Mutex<VecDeque<LogEntry>>,
}

impl DeviceLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry. A line identical to the newest one (timestamp aside)
    /// bumps its repeat counter instead of growing the ring.
    pub fn push(&self, entry: LogEntry) {
        let mut entries = self.entries.lock().expect("device log poisoned");
        if let Some(last) = entries.back_mut() {
            if last.same_shape(&entry) {
                last.repeat += 1;
                last.ts = entry.ts;
                return;
            }
        }
        if entries.len() >= LOG_CAP {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Snapshot of the ring, oldest first.
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .expect("device log poisoned")
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("device log poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().expect("device log poisoned").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_snapshot() {
        let log = DeviceLog::new();
        log.push(LogEntry::new("connect_ok", "10.0.0.5").with_port(502));
        log.push(LogEntry::new("read_timeout", "10.0.0.5").with_address(100));

        let lines = log.snapshot();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].event, "connect_ok");
        assert_eq!(lines[1].address, Some(100));
    }

    #[test]
    fn test_duplicate_collapse() {
        let log = DeviceLog::new();
        for _ in 0..5 {
            log.push(LogEntry::new("connect_failed", "10.0.0.5").with_port(502));
        }
        let lines = log.snapshot();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].repeat, 5);
    }

    #[test]
    fn test_cap() {
        let log = DeviceLog::new();
        for i in 0..(LOG_CAP + 50) {
            log.push(LogEntry::new(format!("event_{i}"), "10.0.0.5"));
        }
        assert_eq!(log.len(), LOG_CAP);
        // Oldest entries were dropped.
        assert_eq!(log.snapshot()[0].event, "event_50");
    }

    #[test]
    fn test_non_consecutive_duplicates_not_collapsed() {
        let log = DeviceLog::new();
        log.push(LogEntry::new("a", "10.0.0.5"));
        log.push(LogEntry::new("b", "10.0.0.5"));
        log.push(LogEntry::new("a", "10.0.0.5"));
        assert_eq!(log.len(), 3);
    }
}
