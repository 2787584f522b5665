// switchyard-transport: the seam between the engine and the wire.
//
// Defines the two channel capability shapes the engine depends on
// (push-based pub/sub and pull-based request/response), the topic naming
// scheme, and the wire payload types. Real brokers and device-API clients
// live outside this workspace; `MemoryBus` is the in-process stand-in used
// by tests and examples.

pub mod channel;
pub mod error;
pub mod memory;
pub mod payload;
pub mod topic;

pub use channel::{MessageHandler, PullChannel, PushChannel};
pub use error::TransportError;
pub use memory::MemoryBus;
pub use payload::{CommandPayload, HeartbeatPing, HeartbeatReply, StatusPayload};
pub use topic::{Topic, TopicKind};
