//! Adapter registry.
//!
//! Maps a protocol tag to its (shared, stateless-per-device) adapter
//! instance. The registry is built once at process start and never mutated
//! afterwards; resolving an unregistered tag is a configuration error, not a
//! runtime polling failure.

use std::collections::HashMap;
use std::sync::Arc;

use ironview_core::Error;
use ironview_storage::ProtocolKind;

use crate::adapter::ProtocolAdapter;
use crate::modbus::ModbusTcpAdapter;
use crate::opcua::OpcuaAdapter;

pub struct AdapterRegistry {
    adapters: HashMap<ProtocolKind, Arc<dyn ProtocolAdapter>>,
}

impl AdapterRegistry {
    /// Empty registry; callers register adapters before first use.
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// Registry with the built-in adapters (Modbus/TCP, OPC-UA stub).
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ModbusTcpAdapter::new()));
        registry.register(Arc::new(OpcuaAdapter::new()));
        registry
    }

    pub fn register(&mut self, adapter: Arc<dyn ProtocolAdapter>) {
        self.adapters.insert(adapter.protocol(), adapter);
    }

    /// Resolve a protocol tag. Unknown tags are a hard configuration error.
    pub fn get(&self, protocol: ProtocolKind) -> Result<Arc<dyn ProtocolAdapter>, Error> {
        self.adapters
            .get(&protocol)
            .cloned()
            .ok_or_else(|| Error::Config(format!("no adapter registered for {protocol}")))
    }

    pub fn registered(&self) -> Vec<ProtocolKind> {
        self.adapters.keys().copied().collect()
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_resolve_modbus() {
        let registry = AdapterRegistry::with_defaults();
        let adapter = registry.get(ProtocolKind::ModbusTcp).unwrap();
        assert_eq!(adapter.protocol(), ProtocolKind::ModbusTcp);
    }

    #[test]
    fn test_unknown_tag_is_config_error() {
        let registry = AdapterRegistry::with_defaults();
        let err = match registry.get(ProtocolKind::S7Tcp) {
            Err(err) => err,
            Ok(_) => panic!("expected an error"),
        };
        assert!(matches!(err, Error::Config(_)));
    }
}
