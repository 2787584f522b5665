// ── Adapter layer ──
//
// Two strategies behind one trait. A PushAdapter subscribes every status
// to the pub/sub channel at bind time -- message arrival is the only way
// its values change. A PollAdapter drives query() on demand and only
// propagates a change, so unchanged polls never fan out.
//
// Selection happens in the engine builder from the component type's
// capability flags; the proxy never knows which strategy it holds.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use strum::Display;
use tracing::{debug, warn};

use switchyard_transport::{CommandPayload, PullChannel, PushChannel, Topic};

use crate::correlate::StatusEvents;
use crate::error::CoreError;

/// How status values reach a component's records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum DeliveryMode {
    /// Transport-delivered events; no polling.
    Push,
    /// Actively queried on a cadence or on demand.
    Poll,
}

/// The surface a component proxy drives, independent of strategy.
#[async_trait]
pub(crate) trait Adapter: Send + Sync {
    fn mode(&self) -> DeliveryMode;

    /// Dispatch a command to the component.
    async fn invoke(&self, command: &str, params: Option<Value>) -> Result<(), CoreError>;

    /// Fresh read of a status: poll components hit the wire (updating the
    /// cache without waking waiters), push components answer from cache.
    async fn query(&self, status: &str) -> Result<Option<Value>, CoreError>;

    /// Poll-and-compare: `Some(value)` only when the value changed, in
    /// which case the change has been recorded and fanned out. Push
    /// components have nothing to do here.
    async fn refresh(&self, status: &str) -> Result<Option<Value>, CoreError>;
}

// ── PushAdapter ──────────────────────────────────────────────────────

/// Event-driven strategy over a [`PushChannel`].
pub(crate) struct PushAdapter {
    namespace: String,
    device: String,
    component: String,
    channel: Arc<dyn PushChannel>,
    events: Arc<StatusEvents>,
}

impl PushAdapter {
    /// Subscribe every declared status and return the bound adapter.
    pub(crate) async fn bind(
        namespace: &str,
        device: &str,
        component: &str,
        channel: Arc<dyn PushChannel>,
        events: Arc<StatusEvents>,
    ) -> Result<Arc<Self>, CoreError> {
        let statuses: Vec<String> = events.names().cloned().collect();

        for status in &statuses {
            let topic = Topic::status(namespace, device, component, status);
            let sink = Arc::clone(&events);
            let status_name = status.clone();

            channel
                .subscribe(
                    &topic,
                    Arc::new(move |_topic, payload| {
                        if let Ok(event) = sink.get(&status_name) {
                            event.record(payload);
                        }
                    }),
                )
                .await?;
        }

        debug!(
            device,
            component,
            statuses = statuses.len(),
            "push adapter bound"
        );

        Ok(Arc::new(Self {
            namespace: namespace.to_owned(),
            device: device.to_owned(),
            component: component.to_owned(),
            channel,
            events,
        }))
    }
}

#[async_trait]
impl Adapter for PushAdapter {
    fn mode(&self) -> DeliveryMode {
        DeliveryMode::Push
    }

    async fn invoke(&self, command: &str, params: Option<Value>) -> Result<(), CoreError> {
        let topic = Topic::command(&self.namespace, &self.device, &self.component, command);
        let body = serde_json::to_value(CommandPayload::new(params))
            .map_err(switchyard_transport::TransportError::from)?;
        self.channel.publish(&topic, body).await?;
        Ok(())
    }

    async fn query(&self, status: &str) -> Result<Option<Value>, CoreError> {
        Ok(self.events.get(status)?.latest().map(|value| (*value).clone()))
    }

    async fn refresh(&self, status: &str) -> Result<Option<Value>, CoreError> {
        // Arrival is the only way push values change.
        self.events.get(status)?;
        Ok(None)
    }
}

// ── PollAdapter ──────────────────────────────────────────────────────

/// Query-driven strategy over a [`PullChannel`].
pub(crate) struct PollAdapter {
    device: String,
    component: String,
    client: Arc<dyn PullChannel>,
    events: Arc<StatusEvents>,
}

impl PollAdapter {
    pub(crate) fn new(
        device: &str,
        component: &str,
        client: Arc<dyn PullChannel>,
        events: Arc<StatusEvents>,
    ) -> Arc<Self> {
        Arc::new(Self {
            device: device.to_owned(),
            component: component.to_owned(),
            client,
            events,
        })
    }
}

#[async_trait]
impl Adapter for PollAdapter {
    fn mode(&self) -> DeliveryMode {
        DeliveryMode::Poll
    }

    async fn invoke(&self, command: &str, params: Option<Value>) -> Result<(), CoreError> {
        self.client.invoke(command, params).await?;
        Ok(())
    }

    async fn query(&self, status: &str) -> Result<Option<Value>, CoreError> {
        let event = self.events.get(status)?;
        let value = self.client.query(status).await?;
        event.store_cached(value.clone());
        Ok(Some(value))
    }

    async fn refresh(&self, status: &str) -> Result<Option<Value>, CoreError> {
        let event = self.events.get(status)?;
        let value = match self.client.query(status).await {
            Ok(value) => value,
            Err(error) => {
                warn!(
                    device = %self.device,
                    component = %self.component,
                    status,
                    %error,
                    "status poll failed"
                );
                return Err(error.into());
            }
        };

        if event.record_if_changed(value.clone()) {
            Ok(Some(value))
        } else {
            Ok(None)
        }
    }
}
