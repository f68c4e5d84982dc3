//! Append-only reading store.
//!
//! Rows are keyed `(register_id, timestamp, seq)` in big-endian bytes so a
//! redb range scan serves the time-window queries directly. A secondary
//! `(timestamp, register_id, seq)` index serves the retention sweep. The
//! `seq` component is a monotonic insert counter: it keeps identical
//! timestamps distinct and preserves batch order.

use redb::{ReadableTable, TableDefinition};

use crate::db::Db;
use crate::model::{Quality, Reading, ReadingBucket};
use crate::{Error, Result};

const READINGS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("readings");
const READINGS_BY_TS: TableDefinition<&[u8], ()> = TableDefinition::new("readings_by_ts");
const COUNTERS: TableDefinition<&str, u64> = TableDefinition::new("counters");

const READING_SEQ_COUNTER: &str = "reading_seq";

const KEY_LEN: usize = 8 + 8 + 4;

fn reading_key(register_id: i64, ts_ms: i64, seq: u32) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    key[..8].copy_from_slice(&(register_id as u64).to_be_bytes());
    key[8..16].copy_from_slice(&(ts_ms as u64).to_be_bytes());
    key[16..].copy_from_slice(&seq.to_be_bytes());
    key
}

fn ts_key(ts_ms: i64, register_id: i64, seq: u32) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    key[..8].copy_from_slice(&(ts_ms as u64).to_be_bytes());
    key[8..16].copy_from_slice(&(register_id as u64).to_be_bytes());
    key[16..].copy_from_slice(&seq.to_be_bytes());
    key
}

fn split_ts_key(key: &[u8]) -> (i64, i64, u32) {
    let ts = u64::from_be_bytes(key[..8].try_into().expect("key length")) as i64;
    let register_id = u64::from_be_bytes(key[8..16].try_into().expect("key length")) as i64;
    let seq = u32::from_be_bytes(key[16..].try_into().expect("key length"));
    (ts, register_id, seq)
}

/// Store for [`Reading`] rows.
pub struct ReadingStore {
    db: Db,
}

impl ReadingStore {
    pub fn new(db: Db) -> Result<Self> {
        let txn = db.begin_write()?;
        {
            txn.open_table(READINGS)?;
            txn.open_table(READINGS_BY_TS)?;
            txn.open_table(COUNTERS)?;
        }
        txn.commit()?;
        Ok(Self { db })
    }

    /// Batched insert. The whole batch commits or fails as one transaction
    /// and insertion order within the batch is preserved.
    pub fn append_batch(&self, readings: &[Reading]) -> Result<()> {
        if readings.is_empty() {
            return Ok(());
        }

        let txn = self.db.begin_write()?;
        {
            let mut counters = txn.open_table(COUNTERS)?;
            let mut seq = counters
                .get(READING_SEQ_COUNTER)?
                .map(|v| v.value())
                .unwrap_or(0);

            let mut table = txn.open_table(READINGS)?;
            let mut ts_index = txn.open_table(READINGS_BY_TS)?;
            for reading in readings {
                seq += 1;
                let encoded = bincode::serialize(reading)?;
                table.insert(
                    reading_key(reading.register_id, reading.timestamp_ms, seq as u32).as_slice(),
                    encoded.as_slice(),
                )?;
                ts_index.insert(
                    ts_key(reading.timestamp_ms, reading.register_id, seq as u32).as_slice(),
                    (),
                )?;
            }
            counters.insert(READING_SEQ_COUNTER, seq)?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Newest reading of one register.
    pub fn latest(&self, register_id: i64) -> Result<Option<Reading>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(READINGS)?;
        let start = reading_key(register_id, 0, 0);
        let end = reading_key(register_id + 1, 0, 0);
        let mut range = table.range::<&[u8]>(start.as_slice()..end.as_slice())?;
        match range.next_back() {
            Some(item) => {
                let (_, value) = item?;
                Ok(Some(bincode::deserialize(value.value())?))
            }
            None => Ok(None),
        }
    }

    /// Readings of one register in `[from_ms, to_ms)`, oldest first,
    /// capped at `limit`.
    pub fn range(
        &self,
        register_id: i64,
        from_ms: i64,
        to_ms: i64,
        limit: usize,
    ) -> Result<Vec<Reading>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(READINGS)?;
        let start = reading_key(register_id, from_ms, 0);
        let end = reading_key(register_id, to_ms, 0);

        let mut result = Vec::new();
        for item in table.range::<&[u8]>(start.as_slice()..end.as_slice())? {
            if result.len() >= limit {
                break;
            }
            let (_, value) = item?;
            result.push(bincode::deserialize(value.value())?);
        }
        Ok(result)
    }

    /// Per-bucket avg/min/max/count over good-quality readings.
    pub fn aggregate(
        &self,
        register_id: i64,
        from_ms: i64,
        to_ms: i64,
        bucket_minutes: u32,
    ) -> Result<Vec<ReadingBucket>> {
        if bucket_minutes == 0 {
            return Err(Error::InvalidInput("bucket_minutes must be >= 1".into()));
        }
        let bucket_ms = bucket_minutes as i64 * 60_000;
        let rows = self.range(register_id, from_ms, to_ms, usize::MAX)?;

        struct Acc {
            count: u64,
            sum: f64,
            min: f64,
            max: f64,
        }
        let mut buckets: std::collections::BTreeMap<i64, Acc> = Default::default();

        for reading in rows {
            if reading.quality != Quality::Good {
                continue;
            }
            let idx = (reading.timestamp_ms - from_ms) / bucket_ms;
            let acc = buckets.entry(idx).or_insert(Acc {
                count: 0,
                sum: 0.0,
                min: f64::INFINITY,
                max: f64::NEG_INFINITY,
            });
            acc.count += 1;
            acc.sum += reading.scaled_value;
            acc.min = acc.min.min(reading.scaled_value);
            acc.max = acc.max.max(reading.scaled_value);
        }

        Ok(buckets
            .into_iter()
            .map(|(idx, acc)| ReadingBucket {
                bucket_start_ms: from_ms + idx * bucket_ms,
                count: acc.count,
                avg: acc.sum / acc.count as f64,
                min: acc.min,
                max: acc.max,
            })
            .collect())
    }

    /// Delete every reading with `timestamp < before_ms`. Returns the number
    /// of deleted rows.
    pub fn prune_before(&self, before_ms: i64) -> Result<u64> {
        let txn = self.db.begin_write()?;
        let deleted = {
            let mut ts_index = txn.open_table(READINGS_BY_TS)?;

            let end = ts_key(before_ms, 0, 0);
            let mut doomed = Vec::new();
            for item in ts_index.range::<&[u8]>(..end.as_slice())? {
                let (key, _) = item?;
                doomed.push(key.value().to_vec());
            }

            let mut table = txn.open_table(READINGS)?;
            for key in &doomed {
                let (ts, register_id, seq) = split_ts_key(key);
                table.remove(reading_key(register_id, ts, seq).as_slice())?;
                ts_index.remove(key.as_slice())?;
            }
            doomed.len() as u64
        };
        txn.commit()?;
        Ok(deleted)
    }
}
