// switchyard-core: device proxies, command/status correlation, and the
// state synchronization engine between switchyard-transport and consumers.

pub mod adapter;
pub mod command;
pub mod config;
pub mod correlate;
pub mod engine;
pub mod error;
pub mod heartbeat;
pub mod proxy;
pub mod registry;
pub mod state;

// ── Primary re-exports ──────────────────────────────────────────────
pub use adapter::DeliveryMode;
pub use command::QueuedCommand;
pub use config::EngineConfig;
pub use correlate::{StopCondition, WatchId};
pub use engine::{ComponentDecl, DeviceDecl, Engine, EngineBuilder};
pub use error::CoreError;
pub use heartbeat::{HeartbeatRecord, Liveness};
pub use proxy::{ComponentProxy, DeviceProxy};
pub use registry::{
    CapabilityRegistry, CommandSpec, ComponentType, ComponentTypeBuilder, DataCommand, StatusSpec,
};
pub use state::{SnapshotStream, StateMap, state_path};
