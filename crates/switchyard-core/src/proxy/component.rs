// ── Component proxy ──
//
// The per-component facade callers interact with. Commands and statuses
// are validated against the capability table; delivery goes through
// whichever adapter strategy the engine selected. Owns the StatusEvent
// records and the continuous-watch bookkeeping for this component.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::adapter::{Adapter, DeliveryMode};
use crate::config::EngineConfig;
use crate::correlate::{StatusEvents, StopCondition, WaitTicket, WatchId, WatchSet};
use crate::error::CoreError;
use crate::registry::ComponentType;

/// Cadence at which an idle continuous watch re-checks its stop condition.
const STOP_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Async facade for one component of one device.
pub struct ComponentProxy {
    device: String,
    name: String,
    spec: Arc<ComponentType>,
    config: Arc<EngineConfig>,
    adapter: Arc<dyn Adapter>,
    events: Arc<StatusEvents>,
    watches: WatchSet,
}

impl ComponentProxy {
    pub(crate) fn new(
        device: String,
        name: String,
        spec: Arc<ComponentType>,
        config: Arc<EngineConfig>,
        adapter: Arc<dyn Adapter>,
        events: Arc<StatusEvents>,
    ) -> Self {
        Self {
            device,
            name,
            spec,
            config,
            adapter,
            events,
            watches: WatchSet::default(),
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn spec(&self) -> &Arc<ComponentType> {
        &self.spec
    }

    pub fn delivery_mode(&self) -> DeliveryMode {
        self.adapter.mode()
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Dispatch a command to the component.
    ///
    /// Unknown command names are a caller error; transport failures
    /// propagate so a direct caller can see them.
    pub async fn invoke(&self, command: &str, params: Option<Value>) -> Result<(), CoreError> {
        self.check_command(command)?;
        self.adapter.invoke(command, params).await
    }

    // ── Status access ────────────────────────────────────────────────

    /// Read a status value: poll components issue a fresh query, push
    /// components answer from the latest delivered value.
    pub async fn query_status(&self, status: &str) -> Result<Option<Value>, CoreError> {
        self.events.get(status)?;
        self.adapter.query(status).await
    }

    /// The latest cached value for a status, if any has been observed.
    pub fn latest_status(&self, status: &str) -> Result<Option<Arc<Value>>, CoreError> {
        Ok(self.events.get(status)?.latest())
    }

    /// Poll-and-compare one status (poll components only). `Some` when the
    /// value changed and was propagated.
    pub(crate) async fn refresh_status(&self, status: &str) -> Result<Option<Value>, CoreError> {
        self.adapter.refresh(status).await
    }

    pub(crate) fn arm(&self, status: &str) -> Result<WaitTicket, CoreError> {
        Ok(self.events.get(status)?.arm())
    }

    // ── Single-shot correlation ──────────────────────────────────────

    /// Wait for the next update of a status. `false` on timeout, never an
    /// error -- only an unknown status name is.
    pub async fn wait_for_status(&self, status: &str, timeout: Duration) -> Result<bool, CoreError> {
        let ticket = self.arm(status)?;
        Ok(ticket.wait(timeout).await)
    }

    /// Issue a command and wait for its correlated status update.
    ///
    /// The wait is armed before the command goes out. Push components then
    /// await delivery; poll components wait out a short settling delay and
    /// query directly. Transport failures during the exchange resolve as
    /// `None`, so a monitoring caller never has to handle a fault.
    pub async fn execute_and_wait_for_status(
        &self,
        command: &str,
        status: &str,
        timeout: Duration,
        params: Option<Value>,
    ) -> Result<Option<Value>, CoreError> {
        self.check_command(command)?;
        let ticket = self.arm(status)?;

        if let Err(error) = self.adapter.invoke(command, params).await {
            warn!(
                device = %self.device,
                component = %self.name,
                command,
                %error,
                "command dispatch failed during correlated wait"
            );
            return Ok(None);
        }

        match self.adapter.mode() {
            DeliveryMode::Poll => {
                drop(ticket);
                tokio::time::sleep(self.config.settle_delay).await;
                match self.adapter.query(status).await {
                    Ok(value) => Ok(value),
                    Err(error) => {
                        warn!(
                            device = %self.device,
                            component = %self.name,
                            status,
                            %error,
                            "status query failed after command"
                        );
                        Ok(None)
                    }
                }
            }
            DeliveryMode::Push => {
                if ticket.wait(timeout).await {
                    Ok(self.events.get(status)?.latest().map(|value| (*value).clone()))
                } else {
                    Ok(None)
                }
            }
        }
    }

    // ── Continuous watches ───────────────────────────────────────────

    /// Start a background watch that invokes `callback` for every distinct
    /// update of a status. Independent watches on the same status each see
    /// every update. Returns immediately with an id for
    /// [`stop_continuous_wait`](Self::stop_continuous_wait).
    pub fn wait_for_continuous<C>(
        &self,
        status: &str,
        callback: C,
        stop_condition: Option<StopCondition>,
    ) -> Result<WatchId, CoreError>
    where
        C: FnMut(Arc<Value>) + Send + 'static,
    {
        self.events.get(status)?;

        let stop = CancellationToken::new();
        let handle = match self.adapter.mode() {
            DeliveryMode::Push => {
                let receiver = self.events.get(status)?.subscribe();
                tokio::spawn(push_watch_loop(
                    receiver,
                    callback,
                    stop_condition,
                    stop.clone(),
                ))
            }
            DeliveryMode::Poll => tokio::spawn(poll_watch_loop(
                Arc::clone(&self.adapter),
                status.to_owned(),
                self.config.poll_interval_for(status),
                callback,
                stop_condition,
                stop.clone(),
            )),
        };

        let id = self.watches.register(stop, handle);
        debug!(
            device = %self.device,
            component = %self.name,
            status,
            watch_id = %id,
            "continuous watch started"
        );
        Ok(id)
    }

    /// Stop a continuous watch. After this returns, its callback will not
    /// be invoked again. Returns `false` for an unknown id.
    pub async fn stop_continuous_wait(&self, id: WatchId) -> bool {
        self.watches.stop(id, self.config.watch_stop_grace).await
    }

    /// Stop every continuous watch on this component.
    pub async fn stop_all_watches(&self) {
        self.watches.stop_all(self.config.watch_stop_grace).await;
    }

    // ── Helpers ──────────────────────────────────────────────────────

    fn check_command(&self, command: &str) -> Result<(), CoreError> {
        if self.spec.command(command).is_some() {
            Ok(())
        } else {
            Err(CoreError::UnknownCommand {
                component: format!("{}.{}", self.device, self.name),
                name: command.to_owned(),
            })
        }
    }
}

// ── Watch loops ──────────────────────────────────────────────────────

async fn push_watch_loop<C>(
    mut receiver: tokio::sync::broadcast::Receiver<Arc<Value>>,
    mut callback: C,
    stop_condition: Option<StopCondition>,
    stop: CancellationToken,
) where
    C: FnMut(Arc<Value>) + Send + 'static,
{
    let mut check = tokio::time::interval(STOP_CHECK_INTERVAL);

    loop {
        tokio::select! {
            biased;
            () = stop.cancelled() => break,
            _ = check.tick() => {
                if should_stop(stop_condition.as_ref()) {
                    break;
                }
            }
            received = receiver.recv() => match received {
                Ok(value) => {
                    callback(value);
                    if should_stop(stop_condition.as_ref()) {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "continuous watch fell behind; oldest updates dropped");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

async fn poll_watch_loop<C>(
    adapter: Arc<dyn Adapter>,
    status: String,
    interval: Duration,
    mut callback: C,
    stop_condition: Option<StopCondition>,
    stop: CancellationToken,
) where
    C: FnMut(Arc<Value>) + Send + 'static,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // the first tick is immediate; poll on cadence

    loop {
        tokio::select! {
            biased;
            () = stop.cancelled() => break,
            _ = ticker.tick() => {
                match adapter.refresh(&status).await {
                    Ok(Some(value)) => callback(Arc::new(value)),
                    Ok(None) => {}
                    Err(error) => {
                        warn!(status = %status, %error, "poll failed in continuous watch");
                    }
                }
                if should_stop(stop_condition.as_ref()) {
                    break;
                }
            }
        }
    }
}

fn should_stop(stop_condition: Option<&StopCondition>) -> bool {
    stop_condition.is_some_and(|stop| stop())
}
