//! Persistent inventory and reading storage for ironview.
//!
//! One redb file backs three stores:
//! - [`DeviceStore`] — the canonical device inventory (unique by ip)
//! - [`RegisterStore`] — declared register configurations per device
//! - [`ReadingStore`] — append-only, time-indexed samples
//!
//! [`Stores`] bundles the three over a shared database handle and carries the
//! cross-store operations (device deletion cascade, latest-per-register).

pub mod db;
pub mod devices;
pub mod error;
pub mod model;
pub mod readings;
pub mod registers;

use std::path::Path;
use std::sync::Arc;

pub use db::Db;
pub use devices::{DeviceStore, DiscoveredUpsert, UpsertOutcome};
pub use error::{Error, Result};
pub use model::{
    DataKind, Device, NewDevice, NewRegisterConfig, ProtocolKind, Quality, Reading, ReadingBucket,
    RegisterConfig, RegisterKind, WordOrder,
};
pub use readings::ReadingStore;
pub use registers::RegisterStore;

/// All stores over one database.
pub struct Stores {
    pub devices: DeviceStore,
    pub registers: RegisterStore,
    pub readings: ReadingStore,
    db: Db,
}

impl Stores {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Arc<Self>> {
        Self::from_db(Db::open(path)?)
    }

    /// Throwaway instance for tests.
    pub fn memory() -> Result<Arc<Self>> {
        Self::from_db(Db::memory()?)
    }

    fn from_db(db: Db) -> Result<Arc<Self>> {
        Ok(Arc::new(Self {
            devices: DeviceStore::new(db.clone())?,
            registers: RegisterStore::new(db.clone())?,
            readings: ReadingStore::new(db.clone())?,
            db,
        }))
    }

    pub fn path(&self) -> &str {
        self.db.path()
    }

    /// Delete a device and cascade to its register configs.
    pub fn delete_device(&self, id: i64) -> Result<bool> {
        let removed = self.devices.delete(id)?;
        if removed {
            let dropped = self.registers.delete_for_device(id)?;
            if !dropped.is_empty() {
                tracing::debug!(device_id = id, configs = dropped.len(), "cascade-deleted register configs");
            }
        }
        Ok(removed)
    }

    /// Newest reading of every register declared on a device.
    pub fn latest_per_register(&self, device_id: i64) -> Result<Vec<(RegisterConfig, Reading)>> {
        let mut result = Vec::new();
        for config in self.registers.list_for_device(device_id)? {
            if let Some(reading) = self.readings.latest(config.id)? {
                result.push((config, reading));
            }
        }
        // Newest first.
        result.sort_by_key(|(_, r)| std::cmp::Reverse(r.timestamp_ms));
        Ok(result)
    }
}
