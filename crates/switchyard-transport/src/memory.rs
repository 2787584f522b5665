// ── In-process pub/sub bus ──
//
// Exact-topic broker used as the simulated transport in tests and
// examples. Publishing dispatches synchronously to every handler
// registered for the topic, in registration order, so deliveries for a
// single topic are observed in publish order -- the same per-connection
// ordering a real broker gives one subscriber.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tracing::trace;

use crate::channel::{MessageHandler, PushChannel};
use crate::error::TransportError;
use crate::topic::Topic;

/// In-memory [`PushChannel`] connecting publishers and subscribers within
/// one process.
///
/// Cheaply cloneable; all clones share the same subscription table.
#[derive(Clone, Default)]
pub struct MemoryBus {
    handlers: Arc<Mutex<HashMap<Topic, Vec<MessageHandler>>>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of handlers currently registered for a topic.
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.handlers
            .lock()
            .map(|map| map.get(topic).map_or(0, Vec::len))
            .unwrap_or(0)
    }
}

#[async_trait]
impl PushChannel for MemoryBus {
    async fn publish(&self, topic: &Topic, payload: Value) -> Result<(), TransportError> {
        // Snapshot the handler list so callbacks can subscribe without
        // deadlocking against the table lock.
        let handlers: Vec<MessageHandler> = {
            let map = self.handlers.lock().map_err(|_| TransportError::Publish {
                topic: topic.to_string(),
                reason: "subscription table poisoned".into(),
            })?;
            map.get(topic).cloned().unwrap_or_default()
        };

        trace!(topic = %topic, subscribers = handlers.len(), "memory bus publish");

        for handler in handlers {
            handler(topic, payload.clone());
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &Topic,
        handler: MessageHandler,
    ) -> Result<(), TransportError> {
        let mut map = self.handlers.lock().map_err(|_| TransportError::Subscribe {
            topic: topic.to_string(),
            reason: "subscription table poisoned".into(),
        })?;
        map.entry(topic.clone()).or_default().push(handler);
        Ok(())
    }
}
