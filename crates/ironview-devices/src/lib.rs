//! Device polling engine for ironview.
//!
//! The pieces, bottom up:
//! - **ProtocolAdapter** — connect/read/write contract over a wire protocol
//!   (Modbus/TCP implemented, OPC-UA stubbed)
//! - **AdapterRegistry** — protocol tag to adapter, fixed at startup
//! - **Batcher** — turns register configs into minimal contiguous reads
//! - **Poller** — one cancellable worker per device
//! - **Supervisor** — fleet-level start/stop/status orchestration

pub mod adapter;
pub mod batcher;
pub mod decode;
pub mod modbus;
pub mod opcua;
pub mod poller;
pub mod registry;
pub mod sim;
pub mod supervisor;
pub mod value_cache;

pub use adapter::{DeviceTarget, ProtocolAdapter, TargetStats};
pub use batcher::{plan_batches, ReadBatch, MAX_BATCH_REGISTERS};
pub use modbus::ModbusTcpAdapter;
pub use opcua::OpcuaAdapter;
pub use poller::{Poller, PollerSettings, PollerState, PollerStatus};
pub use registry::AdapterRegistry;
pub use sim::SimAdapter;
pub use supervisor::{
    DeviceStatusReport, StartOutcome, StopOutcome, Supervisor, SupervisorSettings,
};
pub use value_cache::{CachedValue, ValueCache};
