//! Shared server state.

use std::sync::Arc;

use ironview_devices::Supervisor;
use ironview_discovery::DiscoveryService;
use ironview_storage::Stores;

/// State handed to every handler.
#[derive(Clone)]
pub struct ServerState {
    pub stores: Arc<Stores>,
    pub supervisor: Supervisor,
    pub discovery: Arc<DiscoveryService>,
    /// Unix seconds the process came up, for uptime reporting.
    pub started_at: i64,
}

impl ServerState {
    pub fn new(
        stores: Arc<Stores>,
        supervisor: Supervisor,
        discovery: Arc<DiscoveryService>,
    ) -> Self {
        Self {
            stores,
            supervisor,
            discovery,
            started_at: chrono::Utc::now().timestamp(),
        }
    }
}
