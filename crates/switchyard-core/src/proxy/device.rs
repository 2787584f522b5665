// ── Device proxy ──
//
// Aggregates the component proxies of one named device. Components are
// held in an explicit registry keyed by name -- dotted-path access goes
// through `component()` lookup, not attribute magic.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, select_all};
use indexmap::IndexMap;
use serde_json::Value;
use tracing::debug;

use crate::error::CoreError;
use crate::proxy::ComponentProxy;

/// Async facade for one named device and all of its components.
pub struct DeviceProxy {
    name: String,
    namespace: String,
    components: IndexMap<String, Arc<ComponentProxy>>,
}

impl DeviceProxy {
    pub(crate) fn new(
        name: String,
        namespace: String,
        components: IndexMap<String, Arc<ComponentProxy>>,
    ) -> Self {
        Self {
            name,
            namespace,
            components,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Transport namespace this device shares a connection with.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn component(&self, name: &str) -> Result<&Arc<ComponentProxy>, CoreError> {
        self.components
            .get(name)
            .ok_or_else(|| CoreError::ComponentNotFound {
                device: self.name.clone(),
                name: name.to_owned(),
            })
    }

    pub fn components(&self) -> impl Iterator<Item = &Arc<ComponentProxy>> {
        self.components.values()
    }

    pub fn component_names(&self) -> impl Iterator<Item = &String> {
        self.components.keys()
    }

    /// Race one wait per (component, status) pair of this device and
    /// return the first to resolve as `(component, status, value)`.
    ///
    /// `None` on timeout. The race is run as plain futures, not spawned
    /// tasks, so every losing wait is cancelled the moment this returns --
    /// nothing is left running.
    pub async fn wait_for_any_status(
        &self,
        timeout: Duration,
    ) -> Option<(String, String, Arc<Value>)> {
        let mut races: Vec<BoxFuture<'static, Option<(String, String, Arc<Value>)>>> = Vec::new();

        for (component_name, component) in &self.components {
            let statuses: Vec<String> = component
                .spec()
                .statuses()
                .map(|status| status.name.clone())
                .collect();

            for status in statuses {
                let Ok(ticket) = component.arm(&status) else {
                    continue;
                };
                let component = Arc::clone(component);
                let component_name = component_name.clone();

                races.push(Box::pin(async move {
                    if ticket.resolved().await {
                        match component.latest_status(&status) {
                            Ok(Some(value)) => Some((component_name, status, value)),
                            _ => None,
                        }
                    } else {
                        None
                    }
                }));
            }
        }

        if races.is_empty() {
            return None;
        }

        match tokio::time::timeout(timeout, select_all(races)).await {
            Ok((Some(resolved), _, _)) => Some(resolved),
            Ok((None, _, _)) => None,
            Err(_) => {
                debug!(device = %self.name, ?timeout, "no status resolved before timeout");
                None
            }
        }
    }

    /// Stop every continuous watch on every component of this device.
    pub async fn stop_all_watches(&self) {
        for component in self.components.values() {
            component.stop_all_watches().await;
        }
    }
}
