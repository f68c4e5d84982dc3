//! Device inventory store.
//!
//! Rows are keyed by id; a secondary table maps `ip -> id` so lookups by ip
//! stay indexed and the unique-ip invariant is enforced on every write path.
//! A small LRU cache fronts the hot `get` path (pollers re-read their device
//! row every loop).

use std::net::Ipv4Addr;
use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;
use redb::{ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::db::Db;
use crate::model::{Device, NewDevice, ProtocolKind};
use crate::{Error, Result};

const DEVICES: TableDefinition<u64, &[u8]> = TableDefinition::new("devices");
const DEVICE_IP_INDEX: TableDefinition<&str, u64> = TableDefinition::new("device_ip_index");
const COUNTERS: TableDefinition<&str, u64> = TableDefinition::new("counters");

const DEVICE_ID_COUNTER: &str = "device_id";
const CACHE_CAPACITY: usize = 256;

/// Discovery-side upsert payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredUpsert {
    pub ip: Ipv4Addr,
    pub name: String,
    pub mac: Option<String>,
    pub subnet: Option<String>,
    pub ports: Vec<u16>,
    pub protocol: ProtocolKind,
    pub kind: String,
    pub online: bool,
    pub auto_activate: bool,
}

/// Outcome of a discovery upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created(i64),
    Updated(i64),
    /// Manual device left untouched.
    Skipped(i64),
}

/// Store for [`Device`] rows.
pub struct DeviceStore {
    db: Db,
    cache: Mutex<LruCache<i64, Device>>,
}

impl DeviceStore {
    pub fn new(db: Db) -> Result<Self> {
        // Create the tables up front so later reads never hit a missing table.
        let txn = db.begin_write()?;
        {
            txn.open_table(DEVICES)?;
            txn.open_table(DEVICE_IP_INDEX)?;
            txn.open_table(COUNTERS)?;
        }
        txn.commit()?;

        Ok(Self {
            db,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(CACHE_CAPACITY).expect("capacity > 0"),
            )),
        })
    }

    fn cache_put(&self, device: &Device) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(device.id, device.clone());
        }
    }

    fn cache_pop(&self, id: i64) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.pop(&id);
        }
    }

    /// Create a device through the operator path.
    pub fn insert(&self, new: NewDevice) -> Result<Device> {
        new.validate()?;
        let ip_key = new.ip.to_string();

        let txn = self.db.begin_write()?;
        let device = {
            let mut index = txn.open_table(DEVICE_IP_INDEX)?;
            if index.get(ip_key.as_str())?.is_some() {
                return Err(Error::Conflict(format!("ip {ip_key} already registered")));
            }

            let mut counters = txn.open_table(COUNTERS)?;
            let id = counters.get(DEVICE_ID_COUNTER)?.map(|v| v.value()).unwrap_or(0) + 1;
            counters.insert(DEVICE_ID_COUNTER, id)?;

            let device = Device {
                id: id as i64,
                name: new.name,
                ip: new.ip,
                mac: new.mac,
                subnet: new.subnet,
                ports: new.ports,
                protocol: new.protocol,
                kind: new.kind,
                unit_id: new.unit_id,
                polling_interval_ms: new.polling_interval_ms,
                timeout_ms: new.timeout_ms,
                active: new.active,
                online: false,
                last_connection: None,
                manual: new.manual,
                word_order: new.word_order,
                info: new.info,
                created_at: chrono::Utc::now().timestamp_millis(),
            };

            let encoded = bincode::serialize(&device)?;
            let mut devices = txn.open_table(DEVICES)?;
            devices.insert(id, encoded.as_slice())?;
            index.insert(ip_key.as_str(), id)?;
            device
        };
        txn.commit()?;

        self.cache_put(&device);
        Ok(device)
    }

    pub fn get(&self, id: i64) -> Result<Option<Device>> {
        if let Ok(mut cache) = self.cache.lock() {
            if let Some(device) = cache.get(&id) {
                return Ok(Some(device.clone()));
            }
        }

        let txn = self.db.begin_read()?;
        let devices = txn.open_table(DEVICES)?;
        let row = devices.get(id as u64)?;
        match row {
            Some(value) => {
                let device: Device = bincode::deserialize(value.value())?;
                self.cache_put(&device);
                Ok(Some(device))
            }
            None => Ok(None),
        }
    }

    pub fn get_by_ip(&self, ip: Ipv4Addr) -> Result<Option<Device>> {
        let txn = self.db.begin_read()?;
        let index = txn.open_table(DEVICE_IP_INDEX)?;
        let id = match index.get(ip.to_string().as_str())? {
            Some(v) => v.value() as i64,
            None => return Ok(None),
        };
        drop(index);
        drop(txn);
        self.get(id)
    }

    pub fn list_all(&self) -> Result<Vec<Device>> {
        let txn = self.db.begin_read()?;
        let devices = txn.open_table(DEVICES)?;
        let mut result = Vec::new();
        for item in devices.iter()? {
            let (_, value) = item?;
            result.push(bincode::deserialize(value.value())?);
        }
        Ok(result)
    }

    pub fn list_active(&self) -> Result<Vec<Device>> {
        Ok(self.list_all()?.into_iter().filter(|d| d.active).collect())
    }

    /// Full-row update through the operator path.
    pub fn update(&self, device: &Device) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut devices = txn.open_table(DEVICES)?;
            let existing: Device = match devices.get(device.id as u64)? {
                Some(value) => bincode::deserialize(value.value())?,
                None => return Err(Error::NotFound(format!("device {}", device.id))),
            };

            let mut index = txn.open_table(DEVICE_IP_INDEX)?;
            if existing.ip != device.ip {
                if index.get(device.ip.to_string().as_str())?.is_some() {
                    return Err(Error::Conflict(format!(
                        "ip {} already registered",
                        device.ip
                    )));
                }
                index.remove(existing.ip.to_string().as_str())?;
                index.insert(device.ip.to_string().as_str(), device.id as u64)?;
            }

            let encoded = bincode::serialize(device)?;
            devices.insert(device.id as u64, encoded.as_slice())?;
        }
        txn.commit()?;

        self.cache_put(device);
        Ok(())
    }

    /// Remove a device row. Register cascade happens in [`crate::Stores`].
    pub fn delete(&self, id: i64) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut devices = txn.open_table(DEVICES)?;
            let removed_value = devices.remove(id as u64)?;
            match removed_value {
                Some(value) => {
                    let device: Device = bincode::deserialize(value.value())?;
                    let mut index = txn.open_table(DEVICE_IP_INDEX)?;
                    index.remove(device.ip.to_string().as_str())?;
                    true
                }
                None => false,
            }
        };
        txn.commit()?;

        self.cache_pop(id);
        Ok(removed)
    }

    pub fn set_online(&self, id: i64, online: bool) -> Result<()> {
        self.mutate(id, |device| {
            device.online = online;
        })
    }

    pub fn set_last_connection(&self, id: i64, ts_ms: i64) -> Result<()> {
        self.mutate(id, |device| {
            device.last_connection = Some(ts_ms);
        })
    }

    pub fn set_active(&self, id: i64, active: bool) -> Result<()> {
        self.mutate(id, |device| {
            device.active = active;
        })
    }

    fn mutate(&self, id: i64, f: impl FnOnce(&mut Device)) -> Result<()> {
        let txn = self.db.begin_write()?;
        let device = {
            let mut devices = txn.open_table(DEVICES)?;
            let mut device: Device = match devices.get(id as u64)? {
                Some(value) => bincode::deserialize(value.value())?,
                None => return Err(Error::NotFound(format!("device {id}"))),
            };
            f(&mut device);
            let encoded = bincode::serialize(&device)?;
            devices.insert(id as u64, encoded.as_slice())?;
            device
        };
        txn.commit()?;

        self.cache_put(&device);
        Ok(())
    }

    /// Reconcile a discovered host into the inventory.
    ///
    /// - unseen ip: a new row is created (`manual = false`).
    /// - existing row, `manual = false`: discovery may refresh mac, subnet,
    ///   ports, protocol, kind, online and last_connection; operator-owned
    ///   fields (name, active, intervals, unit id) are preserved.
    /// - existing row, `manual = true`: untouched unless `overwrite_existing`
    ///   was explicitly requested, which takes the full discovery view and
    ///   clears the manual flag.
    pub fn upsert_discovered(
        &self,
        found: &DiscoveredUpsert,
        overwrite_existing: bool,
    ) -> Result<UpsertOutcome> {
        let existing = self.get_by_ip(found.ip)?;
        let now = chrono::Utc::now().timestamp_millis();

        match existing {
            None => {
                let new = NewDevice {
                    name: found.name.clone(),
                    ip: found.ip,
                    mac: found.mac.clone(),
                    subnet: found.subnet.clone(),
                    ports: found.ports.clone(),
                    protocol: found.protocol,
                    kind: found.kind.clone(),
                    unit_id: 1,
                    polling_interval_ms: ironview_core::config::polling::DEFAULT_INTERVAL_MS,
                    timeout_ms: ironview_core::config::polling::DEFAULT_TIMEOUT_MS,
                    active: found.auto_activate,
                    manual: false,
                    word_order: Default::default(),
                    info: Default::default(),
                };
                let mut device = self.insert(new)?;
                if found.online {
                    device.online = true;
                    device.last_connection = Some(now);
                    self.update(&device)?;
                }
                Ok(UpsertOutcome::Created(device.id))
            }
            Some(mut device) => {
                if device.manual && !overwrite_existing {
                    return Ok(UpsertOutcome::Skipped(device.id));
                }

                device.mac = found.mac.clone().or(device.mac.take());
                device.subnet = found.subnet.clone().or(device.subnet.take());
                if !found.ports.is_empty() {
                    device.ports = found.ports.clone();
                }
                device.protocol = found.protocol;
                device.kind = found.kind.clone();
                device.online = found.online;
                if found.online {
                    device.last_connection = Some(now);
                }

                if overwrite_existing {
                    device.name = found.name.clone();
                    device.active = found.auto_activate;
                    device.manual = false;
                }

                self.update(&device)?;
                Ok(UpsertOutcome::Updated(device.id))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::WordOrder;
    use std::collections::HashMap;

    fn store() -> DeviceStore {
        DeviceStore::new(Db::memory().unwrap()).unwrap()
    }

    fn sample(ip: [u8; 4]) -> NewDevice {
        NewDevice {
            name: "Line A".into(),
            ip: Ipv4Addr::from(ip),
            mac: None,
            subnet: None,
            ports: vec![502],
            protocol: ProtocolKind::ModbusTcp,
            kind: "modbus_plc".into(),
            unit_id: 1,
            polling_interval_ms: 1000,
            timeout_ms: 3000,
            active: true,
            manual: true,
            word_order: WordOrder::HighFirst,
            info: HashMap::new(),
        }
    }

    fn discovered(ip: [u8; 4]) -> DiscoveredUpsert {
        DiscoveredUpsert {
            ip: Ipv4Addr::from(ip),
            name: "Modbus PLC 10.1.1.1".into(),
            mac: Some("aa:bb:cc:dd:ee:01".into()),
            subnet: Some("10.1.1.0/24".into()),
            ports: vec![502, 80],
            protocol: ProtocolKind::ModbusTcp,
            kind: "modbus_plc".into(),
            online: true,
            auto_activate: true,
        }
    }

    #[test]
    fn test_insert_and_lookup() {
        let store = store();
        let device = store.insert(sample([10, 1, 1, 1])).unwrap();
        assert_eq!(device.id, 1);

        let by_id = store.get(device.id).unwrap().unwrap();
        assert_eq!(by_id.name, "Line A");

        let by_ip = store.get_by_ip(Ipv4Addr::new(10, 1, 1, 1)).unwrap().unwrap();
        assert_eq!(by_ip.id, device.id);
    }

    #[test]
    fn test_ip_unique() {
        let store = store();
        store.insert(sample([10, 1, 1, 1])).unwrap();
        let err = store.insert(sample([10, 1, 1, 1])).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert_eq!(store.list_all().unwrap().len(), 1);
    }

    #[test]
    fn test_list_active() {
        let store = store();
        store.insert(sample([10, 1, 1, 1])).unwrap();
        let mut inactive = sample([10, 1, 1, 2]);
        inactive.active = false;
        store.insert(inactive).unwrap();

        let active = store.list_active().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].ip, Ipv4Addr::new(10, 1, 1, 1));
    }

    #[test]
    fn test_online_and_last_connection() {
        let store = store();
        let device = store.insert(sample([10, 1, 1, 1])).unwrap();

        store.set_online(device.id, true).unwrap();
        store.set_last_connection(device.id, 1234).unwrap();

        let device = store.get(device.id).unwrap().unwrap();
        assert!(device.online);
        assert_eq!(device.last_connection, Some(1234));
    }

    #[test]
    fn test_upsert_creates_row() {
        let store = store();
        let outcome = store.upsert_discovered(&discovered([10, 1, 1, 1]), false).unwrap();
        assert!(matches!(outcome, UpsertOutcome::Created(_)));

        let device = store.get_by_ip(Ipv4Addr::new(10, 1, 1, 1)).unwrap().unwrap();
        assert!(!device.manual);
        assert!(device.online);
        assert!(device.last_connection.is_some());
    }

    #[test]
    fn test_upsert_duplicate_ip_does_not_grow() {
        let store = store();
        store.upsert_discovered(&discovered([10, 1, 1, 1]), false).unwrap();
        let outcome = store.upsert_discovered(&discovered([10, 1, 1, 1]), false).unwrap();
        assert!(matches!(outcome, UpsertOutcome::Updated(_)));
        assert_eq!(store.list_all().unwrap().len(), 1);
    }

    #[test]
    fn test_manual_protection() {
        let store = store();
        let device = store.insert(sample([10, 1, 1, 1])).unwrap();

        let outcome = store.upsert_discovered(&discovered([10, 1, 1, 1]), false).unwrap();
        assert_eq!(outcome, UpsertOutcome::Skipped(device.id));

        let unchanged = store.get(device.id).unwrap().unwrap();
        assert_eq!(unchanged.name, "Line A");
        assert_eq!(unchanged.ports, vec![502]);
        assert!(unchanged.manual);
    }

    #[test]
    fn test_manual_overwrite_when_requested() {
        let store = store();
        let device = store.insert(sample([10, 1, 1, 1])).unwrap();

        let outcome = store.upsert_discovered(&discovered([10, 1, 1, 1]), true).unwrap();
        assert_eq!(outcome, UpsertOutcome::Updated(device.id));

        let updated = store.get(device.id).unwrap().unwrap();
        assert_eq!(updated.name, "Modbus PLC 10.1.1.1");
        assert!(!updated.manual);
        assert_eq!(updated.ports, vec![502, 80]);
    }

    #[test]
    fn test_discovery_preserves_operator_fields() {
        let store = store();
        let mut auto = sample([10, 1, 1, 1]);
        auto.manual = false;
        auto.name = "Press 3".into();
        auto.polling_interval_ms = 250;
        let device = store.insert(auto).unwrap();

        store.upsert_discovered(&discovered([10, 1, 1, 1]), false).unwrap();

        let updated = store.get(device.id).unwrap().unwrap();
        assert_eq!(updated.name, "Press 3");
        assert_eq!(updated.polling_interval_ms, 250);
        assert_eq!(updated.mac.as_deref(), Some("aa:bb:cc:dd:ee:01"));
        assert_eq!(updated.ports, vec![502, 80]);
    }

    #[test]
    fn test_delete() {
        let store = store();
        let device = store.insert(sample([10, 1, 1, 1])).unwrap();
        assert!(store.delete(device.id).unwrap());
        assert!(!store.delete(device.id).unwrap());
        assert!(store.get_by_ip(Ipv4Addr::new(10, 1, 1, 1)).unwrap().is_none());
        // The ip can be reused after deletion.
        store.insert(sample([10, 1, 1, 1])).unwrap();
    }
}
