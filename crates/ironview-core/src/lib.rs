//! Shared foundation for the ironview supervisor.
//!
//! This crate carries the pieces every other ironview crate needs:
//! - environment-driven configuration (`config`)
//! - the process-wide error taxonomy (`error`)
//! - the bounded per-device log ring (`device_log`)

pub mod config;
pub mod device_log;
pub mod error;

pub use device_log::{DeviceLog, LogEntry};
pub use error::{Error, Result};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
