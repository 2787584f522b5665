// ── Engine ──
//
// The composition root. Builds device proxies from declarations against
// the capability registry, selects adapters from transport bindings,
// performs the bootstrap refresh, and runs the steady-state machinery:
// push monitors, poll loops, heartbeat probers, the periodic refresh, and
// the ordered command consumer. Everything is constructed explicitly and
// handed its dependencies -- there are no globals anywhere.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use indexmap::IndexMap;
use serde_json::Value;
use tokio::sync::{Mutex, Notify, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use switchyard_transport::{PullChannel, PushChannel};

use crate::adapter::{Adapter, DeliveryMode, PollAdapter, PushAdapter};
use crate::command::{QueuedCommand, command_params, parse_command_path};
use crate::config::EngineConfig;
use crate::correlate::StatusEvents;
use crate::error::CoreError;
use crate::heartbeat::HeartbeatMonitor;
use crate::proxy::{ComponentProxy, DeviceProxy};
use crate::registry::{CapabilityRegistry, DataCommand};
use crate::state::{SnapshotStream, StateMap, StateStore, state_path};

const COMMAND_CHANNEL_SIZE: usize = 64;

// ── Declarations ─────────────────────────────────────────────────────

/// One component of a declared device.
#[derive(Debug, Clone)]
pub struct ComponentDecl {
    pub name: String,
    /// Component type name resolved against the capability registry.
    pub type_name: String,
}

/// A named device and the transport namespace it lives on.
#[derive(Debug, Clone)]
pub struct DeviceDecl {
    pub name: String,
    pub namespace: String,
    pub components: Vec<ComponentDecl>,
}

impl DeviceDecl {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            components: Vec::new(),
        }
    }

    pub fn component(mut self, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.components.push(ComponentDecl {
            name: name.into(),
            type_name: type_name.into(),
        });
        self
    }
}

// ── Builder ──────────────────────────────────────────────────────────

/// Wires declarations, capability metadata, and transport channels into
/// an [`Engine`].
pub struct EngineBuilder {
    config: EngineConfig,
    registry: CapabilityRegistry,
    push_channels: HashMap<String, Arc<dyn PushChannel>>,
    pull_channels: HashMap<(String, String), Arc<dyn PullChannel>>,
    devices: Vec<DeviceDecl>,
    internal_state: StateMap,
}

impl EngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Bind a push channel to a transport namespace. Every push-capable
    /// component of a device in this namespace uses it, and the namespace
    /// gets a heartbeat monitor.
    pub fn push_channel(mut self, namespace: impl Into<String>, channel: Arc<dyn PushChannel>) -> Self {
        self.push_channels.insert(namespace.into(), channel);
        self
    }

    /// Bind a pull channel to one (device, component) pair.
    pub fn pull_channel(
        mut self,
        device: impl Into<String>,
        component: impl Into<String>,
        channel: Arc<dyn PullChannel>,
    ) -> Self {
        self.pull_channels
            .insert((device.into(), component.into()), channel);
        self
    }

    pub fn device(mut self, decl: DeviceDecl) -> Self {
        self.devices.push(decl);
        self
    }

    /// Seed a local control value before startup.
    pub fn internal_state(mut self, key: impl Into<String>, value: Value) -> Self {
        self.internal_state.insert(key.into(), value);
        self
    }

    /// Build the engine: construct proxies, bind adapters, and subscribe
    /// heartbeat channels. Components with unknown types or missing
    /// transport bindings are skipped with a warning; they never abort
    /// the rest of the fleet.
    pub async fn build(self) -> Result<Engine, CoreError> {
        let config = Arc::new(self.config);
        let mut devices = IndexMap::new();

        for decl in self.devices {
            let mut components = IndexMap::new();

            for component in &decl.components {
                let spec = match self.registry.describe(&component.type_name) {
                    Ok(spec) => spec,
                    Err(error) => {
                        warn!(
                            device = %decl.name,
                            component = %component.name,
                            %error,
                            "skipping component"
                        );
                        continue;
                    }
                };

                let events = Arc::new(StatusEvents::new(
                    &decl.name,
                    &component.name,
                    spec.statuses().map(|status| status.name.clone()),
                    config.status_queue_depth,
                ));

                let adapter: Arc<dyn Adapter> = if spec.supports_push() {
                    let Some(channel) = self.push_channels.get(&decl.namespace) else {
                        warn!(
                            device = %decl.name,
                            component = %component.name,
                            namespace = %decl.namespace,
                            "skipping component: no push channel bound for namespace"
                        );
                        continue;
                    };
                    match PushAdapter::bind(
                        &decl.namespace,
                        &decl.name,
                        &component.name,
                        Arc::clone(channel),
                        Arc::clone(&events),
                    )
                    .await
                    {
                        Ok(adapter) => adapter,
                        Err(error) => {
                            warn!(
                                device = %decl.name,
                                component = %component.name,
                                %error,
                                "skipping component: status subscription failed"
                            );
                            continue;
                        }
                    }
                } else if spec.requires_polling() {
                    let key = (decl.name.clone(), component.name.clone());
                    let Some(client) = self.pull_channels.get(&key) else {
                        warn!(
                            device = %decl.name,
                            component = %component.name,
                            "skipping component: no pull channel bound"
                        );
                        continue;
                    };
                    PollAdapter::new(
                        &decl.name,
                        &component.name,
                        Arc::clone(client),
                        Arc::clone(&events),
                    )
                } else {
                    warn!(
                        device = %decl.name,
                        component = %component.name,
                        "skipping component: no delivery capability declared"
                    );
                    continue;
                };

                components.insert(
                    component.name.clone(),
                    Arc::new(ComponentProxy::new(
                        decl.name.clone(),
                        component.name.clone(),
                        spec,
                        Arc::clone(&config),
                        adapter,
                        events,
                    )),
                );
            }

            debug!(device = %decl.name, components = components.len(), "device proxy built");
            devices.insert(
                decl.name.clone(),
                Arc::new(DeviceProxy::new(decl.name, decl.namespace, components)),
            );
        }

        let mut heartbeats = Vec::new();
        for (namespace, channel) in &self.push_channels {
            match HeartbeatMonitor::bind(namespace, Arc::clone(channel)).await {
                Ok(monitor) => heartbeats.push(monitor),
                Err(error) => {
                    warn!(namespace = %namespace, %error, "heartbeat channel subscription failed");
                }
            }
        }

        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);

        Ok(Engine {
            inner: Arc::new(EngineInner {
                config,
                store: Arc::new(StateStore::with_internal(self.internal_state)),
                devices,
                heartbeats,
                command_tx,
                command_rx: Mutex::new(Some(command_rx)),
                refresh_hints: DashMap::new(),
                cancel: CancellationToken::new(),
                task_handles: Mutex::new(Vec::new()),
            }),
        })
    }
}

// ── Engine ───────────────────────────────────────────────────────────

/// The running state-synchronization engine.
///
/// Cheaply cloneable via `Arc<EngineInner>`. Construct with
/// [`builder`](Self::builder), then [`start`](Self::start) to bootstrap
/// and spawn the steady-state tasks.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: Arc<EngineConfig>,
    store: Arc<StateStore>,
    devices: IndexMap<String, Arc<DeviceProxy>>,
    heartbeats: Vec<Arc<HeartbeatMonitor>>,
    command_tx: mpsc::Sender<QueuedCommand>,
    command_rx: Mutex<Option<mpsc::Receiver<QueuedCommand>>>,
    /// Wakes a specific pull path's poll loop ahead of its cadence.
    refresh_hints: DashMap<String, Arc<Notify>>,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    pub fn builder(registry: CapabilityRegistry) -> EngineBuilder {
        EngineBuilder {
            config: EngineConfig::default(),
            registry,
            push_channels: HashMap::new(),
            pull_channels: HashMap::new(),
            devices: Vec::new(),
            internal_state: StateMap::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    // ── Device access ────────────────────────────────────────────────

    pub fn device(&self, name: &str) -> Result<Arc<DeviceProxy>, CoreError> {
        self.inner
            .devices
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::DeviceNotFound {
                name: name.to_owned(),
            })
    }

    pub fn devices(&self) -> impl Iterator<Item = &Arc<DeviceProxy>> {
        self.inner.devices.values()
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Bootstrap the snapshot, then spawn the steady-state tasks:
    /// push-binding monitors, pull-binding poll loops, heartbeat probers,
    /// the periodic refresh, and the command consumer.
    pub async fn start(&self) {
        self.refresh_all().await;

        let mut handles = self.inner.task_handles.lock().await;

        if let Some(rx) = self.inner.command_rx.lock().await.take() {
            handles.push(tokio::spawn(command_consumer_task(self.clone(), rx)));
        }

        let mut monitored: HashSet<String> = HashSet::new();
        for device in self.inner.devices.values() {
            for component in device.components() {
                for binding in component.spec().data_commands() {
                    let path = state_path(device.name(), component.name(), &binding.status);
                    if !monitored.insert(path.clone()) {
                        continue;
                    }

                    match component.delivery_mode() {
                        DeliveryMode::Push => self.spawn_push_monitor(component, binding, path),
                        DeliveryMode::Poll => {
                            let hint = Arc::new(Notify::new());
                            self.inner.refresh_hints.insert(path.clone(), Arc::clone(&hint));
                            handles.push(tokio::spawn(poll_binding_task(
                                self.clone(),
                                Arc::clone(component),
                                binding.status.clone(),
                                path,
                                hint,
                            )));
                        }
                    }
                }
            }
        }

        for monitor in &self.inner.heartbeats {
            handles.push(tokio::spawn(Arc::clone(monitor).run(
                Arc::clone(&self.inner.store),
                Arc::clone(&self.inner.config),
                self.inner.cancel.clone(),
            )));
        }

        if self.inner.config.refresh_interval > Duration::ZERO {
            handles.push(tokio::spawn(periodic_refresh_task(self.clone())));
        }

        info!(
            devices = self.inner.devices.len(),
            paths = monitored.len(),
            heartbeats = self.inner.heartbeats.len(),
            "engine started"
        );
    }

    /// Stop everything the engine runs: continuous watches, poll loops,
    /// heartbeat monitors, and the command consumer, each within the
    /// configured grace period. Call this *before* tearing down the
    /// transport channels so no task operates on a closed connection.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();

        for device in self.inner.devices.values() {
            device.stop_all_watches().await;
        }

        let grace = self.inner.config.watch_stop_grace;
        let mut handles = self.inner.task_handles.lock().await;
        for mut handle in handles.drain(..) {
            if tokio::time::timeout(grace, &mut handle).await.is_err() {
                handle.abort();
                let _ = handle.await;
            }
        }

        debug!("engine stopped");
    }

    /// Issue every data command once and correlate its status reply into
    /// the snapshot. A binding that times out or fails stores an explicit
    /// `null` rather than leaving its path absent; failures are isolated
    /// per binding so one dead device never blocks the rest.
    pub async fn refresh_all(&self) {
        let timeout = self.inner.config.bootstrap_timeout;
        let mut refreshes = Vec::new();

        for device in self.inner.devices.values() {
            for component in device.components() {
                for binding in component.spec().data_commands() {
                    let component = Arc::clone(component);
                    let store = Arc::clone(&self.inner.store);
                    let device_name = device.name().to_owned();
                    let binding = binding.clone();

                    refreshes.push(async move {
                        let path = state_path(&device_name, component.name(), &binding.status);
                        let value = match component
                            .execute_and_wait_for_status(
                                &binding.command,
                                &binding.status,
                                timeout,
                                None,
                            )
                            .await
                        {
                            Ok(Some(value)) => value,
                            Ok(None) => {
                                debug!(path = %path, "no reply during refresh; storing null");
                                Value::Null
                            }
                            Err(error) => {
                                warn!(path = %path, %error, "refresh failed; storing null");
                                Value::Null
                            }
                        };
                        store.set_external(path, value);
                    });
                }
            }
        }

        let count = refreshes.len();
        futures_util::future::join_all(refreshes).await;
        debug!(bindings = count, "refresh pass complete");
    }

    /// Wake the poll loop for one snapshot path ahead of its cadence.
    /// Returns `false` if the path has no poll loop.
    pub fn trigger_refresh(&self, path: &str) -> bool {
        match self.inner.refresh_hints.get(path) {
            Some(hint) => {
                hint.notify_one();
                true
            }
            None => false,
        }
    }

    // ── Consumer surface ─────────────────────────────────────────────

    /// The current merged snapshot.
    pub fn get_all_states(&self) -> Arc<StateMap> {
        self.inner.store.snapshot()
    }

    /// Read one value: internal state first, then external.
    pub fn get_state(&self, key: &str) -> Option<Value> {
        self.inner.store.get(key)
    }

    /// Set a local control value; notifies snapshot subscribers exactly
    /// like an external update.
    pub fn set_state(&self, key: impl Into<String>, value: Value) {
        self.inner.store.set_internal(key, value);
    }

    /// Subscribe to the change stream of the merged snapshot.
    pub fn get_state_updates(&self) -> SnapshotStream {
        self.inner.store.subscribe()
    }

    /// Queue a command for ordered execution. Commands execute strictly
    /// in submission order, drained by a single consumer task.
    pub async fn add_command(&self, name: impl Into<String>, data: Value) -> Result<(), CoreError> {
        self.inner
            .command_tx
            .send(QueuedCommand {
                name: name.into(),
                data,
            })
            .await
            .map_err(|_| CoreError::EngineShutdown)
    }

    // ── Internals ────────────────────────────────────────────────────

    fn spawn_push_monitor(&self, component: &Arc<ComponentProxy>, binding: &DataCommand, path: String) {
        let store = Arc::clone(&self.inner.store);
        let result = component.wait_for_continuous(
            &binding.status,
            move |value| store.set_external(path.clone(), (*value).clone()),
            None,
        );
        if let Err(error) = result {
            warn!(
                device = component.device(),
                component = component.name(),
                status = %binding.status,
                %error,
                "push monitor failed to start"
            );
        }
    }
}

// ── Background tasks ─────────────────────────────────────────────────

/// Drain the front-end command queue, one command at a time.
async fn command_consumer_task(engine: Engine, mut rx: mpsc::Receiver<QueuedCommand>) {
    let cancel = engine.inner.cancel.clone();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            queued = rx.recv() => {
                let Some(queued) = queued else { break };
                if let Err(error) = dispatch_command(&engine, &queued).await {
                    warn!(command = %queued.name, %error, "queued command failed");
                }
            }
        }
    }
}

async fn dispatch_command(engine: &Engine, queued: &QueuedCommand) -> Result<(), CoreError> {
    let (device, component, command) = parse_command_path(&queued.name)?;
    let device = engine.device(device)?;
    let component = device.component(component)?;
    component.invoke(command, command_params(&queued.data)).await
}

/// Poll one pull binding on its cadence, waking early on refresh hints.
async fn poll_binding_task(
    engine: Engine,
    component: Arc<ComponentProxy>,
    status: String,
    path: String,
    hint: Arc<Notify>,
) {
    let interval = engine.inner.config.poll_interval_for(&status);
    let cancel = engine.inner.cancel.clone();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = hint.notified() => {}
            () = tokio::time::sleep(interval) => {}
        }

        match component.refresh_status(&status).await {
            Ok(Some(value)) => engine.inner.store.set_external(path.clone(), value),
            Ok(None) => {}
            Err(error) => warn!(path = %path, %error, "poll refresh failed"),
        }
    }
}

/// Re-issue push data commands on a fixed cadence so event-driven state
/// cannot silently go stale past one refresh cycle.
async fn periodic_refresh_task(engine: Engine) {
    let cancel = engine.inner.cancel.clone();
    let mut ticker = tokio::time::interval(engine.inner.config.refresh_interval);
    ticker.tick().await; // bootstrap already covered the first pass

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        for device in engine.inner.devices.values() {
            for component in device.components() {
                if component.delivery_mode() != DeliveryMode::Push {
                    continue;
                }
                for binding in component.spec().data_commands() {
                    if let Err(error) = component.invoke(&binding.command, None).await {
                        warn!(
                            device = device.name(),
                            component = component.name(),
                            command = %binding.command,
                            %error,
                            "periodic refresh command failed"
                        );
                    }
                }
            }
        }
    }
}
