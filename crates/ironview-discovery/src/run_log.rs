//! In-memory log of the current discovery run.
//!
//! The API streams this back while a scan is in progress; the ring is capped
//! so a long run cannot grow without bound.

use std::collections::VecDeque;
use std::sync::Mutex;

const LOG_CAP: usize = 1000;

#[derive(Default)]
pub struct RunLog {
    lines: Mutex<VecDeque<String>>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, line: impl Into<String>) {
        let line = line.into();
        tracing::info!(target: "discovery", "{line}");
        let stamped = format!("{} {}", chrono::Utc::now().format("%H:%M:%S%.3f"), line);

        let mut lines = self.lines.lock().expect("run log poisoned");
        if lines.len() >= LOG_CAP {
            lines.pop_front();
        }
        lines.push_back(stamped);
    }

    pub fn clear(&self) {
        self.lines.lock().expect("run log poisoned").clear();
    }

    pub fn snapshot_text(&self) -> String {
        let lines = self.lines.lock().expect("run log poisoned");
        let mut out = String::new();
        for line in lines.iter() {
            out.push_str(line);
            out.push('\n');
        }
        out
    }
}
