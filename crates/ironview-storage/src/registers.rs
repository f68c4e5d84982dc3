//! Register configuration store.
//!
//! Uniqueness of (device_id, address, register_type) is enforced with a
//! composite key index, mirroring how the device store enforces unique ips.

use redb::{ReadableTable, TableDefinition};

use crate::db::Db;
use crate::model::{NewRegisterConfig, RegisterConfig, RegisterKind};
use crate::{Error, Result};

const REGISTERS: TableDefinition<u64, &[u8]> = TableDefinition::new("register_configs");
const REGISTER_KEY_INDEX: TableDefinition<&str, u64> = TableDefinition::new("register_key_index");
const COUNTERS: TableDefinition<&str, u64> = TableDefinition::new("counters");

const REGISTER_ID_COUNTER: &str = "register_id";

fn composite_key(device_id: i64, address: u16, kind: RegisterKind) -> String {
    format!("{}:{}:{}", device_id, address, kind.as_str())
}

/// Store for [`RegisterConfig`] rows.
pub struct RegisterStore {
    db: Db,
}

impl RegisterStore {
    pub fn new(db: Db) -> Result<Self> {
        let txn = db.begin_write()?;
        {
            txn.open_table(REGISTERS)?;
            txn.open_table(REGISTER_KEY_INDEX)?;
            txn.open_table(COUNTERS)?;
        }
        txn.commit()?;
        Ok(Self { db })
    }

    pub fn insert(&self, new: NewRegisterConfig) -> Result<RegisterConfig> {
        new.validate()?;
        let key = composite_key(new.device_id, new.address, new.register_type);

        let txn = self.db.begin_write()?;
        let config = {
            let mut index = txn.open_table(REGISTER_KEY_INDEX)?;
            if index.get(key.as_str())?.is_some() {
                return Err(Error::Conflict(format!(
                    "register ({}, {}, {}) already declared",
                    new.device_id,
                    new.address,
                    new.register_type.as_str()
                )));
            }

            let mut counters = txn.open_table(COUNTERS)?;
            let id = counters
                .get(REGISTER_ID_COUNTER)?
                .map(|v| v.value())
                .unwrap_or(0)
                + 1;
            counters.insert(REGISTER_ID_COUNTER, id)?;

            let config = RegisterConfig {
                id: id as i64,
                device_id: new.device_id,
                name: new.name,
                address: new.address,
                count: new.count,
                register_type: new.register_type,
                data_type: new.data_type,
                scale_factor: new.scale_factor,
                offset: new.offset,
                unit: new.unit,
                interval_ms: new.interval_ms,
                active: new.active,
            };

            let encoded = bincode::serialize(&config)?;
            let mut registers = txn.open_table(REGISTERS)?;
            registers.insert(id, encoded.as_slice())?;
            index.insert(key.as_str(), id)?;
            config
        };
        txn.commit()?;
        Ok(config)
    }

    pub fn get(&self, id: i64) -> Result<Option<RegisterConfig>> {
        let txn = self.db.begin_read()?;
        let registers = txn.open_table(REGISTERS)?;
        match registers.get(id as u64)? {
            Some(value) => Ok(Some(bincode::deserialize(value.value())?)),
            None => Ok(None),
        }
    }

    pub fn list_for_device(&self, device_id: i64) -> Result<Vec<RegisterConfig>> {
        let txn = self.db.begin_read()?;
        let registers = txn.open_table(REGISTERS)?;
        let mut result = Vec::new();
        for item in registers.iter()? {
            let (_, value) = item?;
            let config: RegisterConfig = bincode::deserialize(value.value())?;
            if config.device_id == device_id {
                result.push(config);
            }
        }
        Ok(result)
    }

    /// Active configs for a device; the poller's working set.
    pub fn list_active_for_device(&self, device_id: i64) -> Result<Vec<RegisterConfig>> {
        Ok(self
            .list_for_device(device_id)?
            .into_iter()
            .filter(|c| c.active)
            .collect())
    }

    pub fn set_active(&self, id: i64, active: bool) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut registers = txn.open_table(REGISTERS)?;
            let mut config: RegisterConfig = match registers.get(id as u64)? {
                Some(value) => bincode::deserialize(value.value())?,
                None => return Err(Error::NotFound(format!("register config {id}"))),
            };
            config.active = active;
            let encoded = bincode::serialize(&config)?;
            registers.insert(id as u64, encoded.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn delete(&self, id: i64) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut registers = txn.open_table(REGISTERS)?;
            let removed_value = registers.remove(id as u64)?;
            match removed_value {
                Some(value) => {
                    let config: RegisterConfig = bincode::deserialize(value.value())?;
                    let mut index = txn.open_table(REGISTER_KEY_INDEX)?;
                    index.remove(
                        composite_key(config.device_id, config.address, config.register_type)
                            .as_str(),
                    )?;
                    true
                }
                None => false,
            }
        };
        txn.commit()?;
        Ok(removed)
    }

    /// Remove every config of a device. Returns the ids that were deleted.
    pub fn delete_for_device(&self, device_id: i64) -> Result<Vec<i64>> {
        let ids: Vec<i64> = self
            .list_for_device(device_id)?
            .into_iter()
            .map(|c| c.id)
            .collect();
        for id in &ids {
            self.delete(*id)?;
        }
        Ok(ids)
    }
}
