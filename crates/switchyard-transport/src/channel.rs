// ── Channel capability traits ──
//
// The engine depends on exactly two transport shapes: a push-capable
// pub/sub channel and a pull-capable request/response channel. Concrete
// clients (an MQTT broker connection, a native device-API client) live
// outside the workspace and implement one of these.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::error::TransportError;
use crate::topic::Topic;

/// Callback invoked for every message arriving on a subscribed topic.
///
/// Handlers run on the channel's delivery task and must not block;
/// messages for a single topic are delivered one at a time, in order.
pub type MessageHandler = Arc<dyn Fn(&Topic, Value) + Send + Sync>;

/// A push-capable channel: fire-and-forget publish plus topic subscription.
///
/// No delivery or ordering guarantees across topics; per-topic delivery
/// order follows the underlying connection.
#[async_trait]
pub trait PushChannel: Send + Sync {
    /// Publish a JSON payload to a topic.
    async fn publish(&self, topic: &Topic, payload: Value) -> Result<(), TransportError>;

    /// Subscribe a handler to a topic. Multiple handlers per topic are
    /// allowed; each receives every message.
    async fn subscribe(&self, topic: &Topic, handler: MessageHandler)
    -> Result<(), TransportError>;
}

/// A pull-capable channel: named operations invoked on request.
#[async_trait]
pub trait PullChannel: Send + Sync {
    /// Invoke an operation (a command) on the remote component.
    async fn invoke(&self, operation: &str, params: Option<Value>)
    -> Result<Value, TransportError>;

    /// Read the current value of an observable (a status).
    async fn query(&self, operation: &str) -> Result<Value, TransportError>;
}
