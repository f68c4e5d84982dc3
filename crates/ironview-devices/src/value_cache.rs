//! In-process cache of the freshest decoded value per register.
//!
//! Keyed by device ip, then register name. Pollers write it on every good
//! read; the API serves "current value" queries from it without touching the
//! reading store.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;

/// One cached sample.
#[derive(Debug, Clone, Serialize)]
pub struct CachedValue {
    pub value: f64,
    pub raw: f64,
    /// Unix millis of the read.
    pub ts_ms: i64,
    pub address: u16,
}

/// Shared value cache.
#[derive(Default)]
pub struct ValueCache {
    inner: RwLock<HashMap<Ipv4Addr, HashMap<String, CachedValue>>>,
}

impl ValueCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn set(&self, ip: Ipv4Addr, name: &str, value: CachedValue) {
        let mut cache = self.inner.write().await;
        cache.entry(ip).or_default().insert(name.to_string(), value);
    }

    pub async fn get(&self, ip: Ipv4Addr, name: &str) -> Option<CachedValue> {
        let cache = self.inner.read().await;
        cache.get(&ip)?.get(name).cloned()
    }

    /// All cached values of one device.
    pub async fn device_snapshot(&self, ip: Ipv4Addr) -> HashMap<String, CachedValue> {
        let cache = self.inner.read().await;
        cache.get(&ip).cloned().unwrap_or_default()
    }

    pub async fn clear_device(&self, ip: Ipv4Addr) {
        let mut cache = self.inner.write().await;
        cache.remove(&ip);
    }

    pub async fn device_count(&self) -> usize {
        self.inner.read().await.len()
    }
}
