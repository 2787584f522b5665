// End-to-end engine tests: bootstrap, steady-state monitoring, heartbeat
// liveness, the consumer surface, and shutdown -- all against the
// in-memory transport with simulated devices.

#![allow(clippy::unwrap_used)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

use switchyard_core::{
    CapabilityRegistry, ComponentType, CoreError, DeviceDecl, Engine, EngineConfig, state_path,
};
use switchyard_transport::{
    HeartbeatPing, HeartbeatReply, MemoryBus, PullChannel, PushChannel, StatusPayload, Topic,
    TransportError,
};

// ── Helpers ─────────────────────────────────────────────────────────

fn registry() -> CapabilityRegistry {
    let mut registry = CapabilityRegistry::new();
    registry.register(
        ComponentType::builder("TemperatureSensor")
            .data_command("read", ["reading_ready"])
            .status_on("reading", ["reading_ready"])
            .build()
            .unwrap(),
    );
    registry.register(
        ComponentType::builder("Relay")
            .command("on")
            .command("off")
            .command("toggle")
            .status_on("power_status", ["power_update"])
            .build()
            .unwrap(),
    );
    registry.register(
        ComponentType::builder("PolledThermostat")
            .delivery(false, true)
            .data_command("read_temp", ["temp_update"])
            .status_on("temp_status", ["temp_update"])
            .build()
            .unwrap(),
    );
    registry
}

fn test_config() -> EngineConfig {
    EngineConfig {
        settle_delay: Duration::from_millis(10),
        bootstrap_timeout: Duration::from_millis(150),
        refresh_interval: Duration::ZERO,
        heartbeat_interval: Duration::from_millis(300),
        heartbeat_timeout: Duration::from_millis(100),
        ..EngineConfig::default()
    }
}

/// Simulated push device: answers `read` with a reading after `delay`.
async fn spawn_sensor_device(bus: &MemoryBus, device: &str, delay: Duration, value: i64) {
    let reply_bus = bus.clone();
    let status_topic = Topic::status("devices", device, "sensorA", "reading");
    bus.subscribe(
        &Topic::command("devices", device, "sensorA", "read"),
        Arc::new(move |_, _| {
            let bus = reply_bus.clone();
            let topic = status_topic.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let payload = StatusPayload::new("reading_ready", json!({"value": value}));
                let _ = bus
                    .publish(&topic, serde_json::to_value(payload).unwrap())
                    .await;
            });
        }),
    )
    .await
    .unwrap();
}

/// Simulated heartbeat responder for a namespace. Answers while `alive`.
async fn spawn_heartbeat_responder(bus: &MemoryBus, namespace: &str) -> Arc<AtomicBool> {
    let alive = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&alive);
    let reply_bus = bus.clone();
    let response_topic = Topic::heartbeat_response(namespace);

    bus.subscribe(
        &Topic::heartbeat_request(namespace),
        Arc::new(move |_, ping| {
            if !flag.load(Ordering::SeqCst) {
                return;
            }
            let bus = reply_bus.clone();
            let topic = response_topic.clone();
            let reply = HeartbeatReply {
                status: "alive".into(),
                request_id: serde_json::from_value::<HeartbeatPing>(ping)
                    .ok()
                    .map(|request| request.request_id),
                timestamp: Some(chrono::Utc::now()),
                extra: json!({}),
            };
            tokio::spawn(async move {
                let _ = bus
                    .publish(&topic, serde_json::to_value(reply).unwrap())
                    .await;
            });
        }),
    )
    .await
    .unwrap();

    alive
}

async fn wait_for_state<F>(engine: &Engine, key: &str, predicate: F) -> Value
where
    F: Fn(&Value) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(value) = engine.get_state(key) {
                if predicate(&value) {
                    return value;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("state at {key} did not converge"))
}

struct FakeThermostat {
    temperature: Mutex<Value>,
}

impl FakeThermostat {
    fn new(initial: Value) -> Arc<Self> {
        Arc::new(Self {
            temperature: Mutex::new(initial),
        })
    }

    fn set(&self, value: Value) {
        *self.temperature.lock().unwrap() = value;
    }
}

#[async_trait]
impl PullChannel for FakeThermostat {
    async fn invoke(&self, _operation: &str, _params: Option<Value>) -> Result<Value, TransportError> {
        Ok(Value::Null)
    }

    async fn query(&self, _operation: &str) -> Result<Value, TransportError> {
        Ok(self.temperature.lock().unwrap().clone())
    }
}

// ── Bootstrap & steady state ────────────────────────────────────────

#[tokio::test]
async fn bootstrap_correlates_declared_bindings() {
    let bus = MemoryBus::new();
    spawn_sensor_device(&bus, "bench", Duration::from_millis(30), 42).await;

    let engine = Engine::builder(registry())
        .config(test_config())
        .push_channel("devices", Arc::new(bus.clone()))
        .device(DeviceDecl::new("bench", "devices").component("sensorA", "TemperatureSensor"))
        .build()
        .await
        .unwrap();

    engine.start().await;

    let path = state_path("bench", "sensorA", "reading");
    let value = wait_for_state(&engine, &path, |value| value["value"] == json!(42)).await;
    assert_eq!(value["event"], json!("reading_ready"));

    engine.shutdown().await;
}

#[tokio::test]
async fn silent_binding_bootstraps_to_null_then_recovers() {
    let bus = MemoryBus::new();
    // No responder: bootstrap times out and stores an explicit null.
    let engine = Engine::builder(registry())
        .config(test_config())
        .push_channel("devices", Arc::new(bus.clone()))
        .device(DeviceDecl::new("bench", "devices").component("sensorA", "TemperatureSensor"))
        .build()
        .await
        .unwrap();

    engine.start().await;

    let path = state_path("bench", "sensorA", "reading");
    assert_eq!(engine.get_state(&path), Some(Value::Null));

    // The device comes back: a pushed update flows straight into the
    // snapshot without any command being issued.
    bus.publish(
        &Topic::status("devices", "bench", "sensorA", "reading"),
        json!({"event": "reading_ready", "value": 7}),
    )
    .await
    .unwrap();

    let value = wait_for_state(&engine, &path, |value| value["value"] == json!(7)).await;
    assert_eq!(value["event"], json!("reading_ready"));

    engine.shutdown().await;
}

#[tokio::test]
async fn one_dead_device_does_not_block_others() {
    let bus = MemoryBus::new();
    spawn_sensor_device(&bus, "healthy", Duration::from_millis(20), 1).await;
    // "silent" never answers.

    let engine = Engine::builder(registry())
        .config(test_config())
        .push_channel("devices", Arc::new(bus.clone()))
        .device(DeviceDecl::new("healthy", "devices").component("sensorA", "TemperatureSensor"))
        .device(DeviceDecl::new("silent", "devices").component("sensorA", "TemperatureSensor"))
        .build()
        .await
        .unwrap();

    engine.start().await;

    let healthy = wait_for_state(
        &engine,
        &state_path("healthy", "sensorA", "reading"),
        |value| value["value"] == json!(1),
    )
    .await;
    assert_eq!(healthy["event"], json!("reading_ready"));
    assert_eq!(
        engine.get_state(&state_path("silent", "sensorA", "reading")),
        Some(Value::Null)
    );

    engine.shutdown().await;
}

#[tokio::test]
async fn pull_binding_bootstraps_and_honors_refresh_hint() {
    let thermostat = FakeThermostat::new(json!(20.0));
    let mut config = test_config();
    // Cadence far beyond the test horizon: only the hint can wake the poll.
    config.poll_interval = Duration::from_secs(600);

    let engine = Engine::builder(registry())
        .config(config)
        .pull_channel("thermo", "ac", Arc::clone(&thermostat) as Arc<dyn PullChannel>)
        .device(DeviceDecl::new("thermo", "climate").component("ac", "PolledThermostat"))
        .build()
        .await
        .unwrap();

    engine.start().await;

    let path = state_path("thermo", "ac", "temp_status");
    assert_eq!(engine.get_state(&path), Some(json!(20.0)));

    thermostat.set(json!(23.5));
    assert!(engine.trigger_refresh(&path));
    wait_for_state(&engine, &path, |value| *value == json!(23.5)).await;

    assert!(!engine.trigger_refresh("no.such.path"));

    engine.shutdown().await;
}

// ── Heartbeat liveness ──────────────────────────────────────────────

#[tokio::test]
async fn heartbeat_transitions_offline_and_back() {
    let bus = MemoryBus::new();
    let alive = spawn_heartbeat_responder(&bus, "devices").await;
    alive.store(false, Ordering::SeqCst);

    let engine = Engine::builder(registry())
        .config(test_config())
        .push_channel("devices", Arc::new(bus.clone()))
        .device(DeviceDecl::new("bench", "devices").component("sensorA", "TemperatureSensor"))
        .build()
        .await
        .unwrap();

    engine.start().await;

    // Nobody answers: the namespace goes offline within one cycle.
    let record = wait_for_state(&engine, "devices.heartbeat_status", |value| {
        value["state"] == json!("offline")
    })
    .await;
    assert!(record.get("timestamp").is_some());

    // The devices come back: the next reply flips the record online.
    alive.store(true, Ordering::SeqCst);
    let record = wait_for_state(&engine, "devices.heartbeat_status", |value| {
        value["state"] == json!("online")
    })
    .await;
    assert_eq!(record["detail"]["status"], json!("alive"));

    engine.shutdown().await;
}

// ── Consumer surface ────────────────────────────────────────────────

#[tokio::test]
async fn set_state_is_read_your_writes_and_notifies() {
    let bus = MemoryBus::new();
    let engine = Engine::builder(registry())
        .config(test_config())
        .push_channel("devices", Arc::new(bus))
        .device(DeviceDecl::new("bench", "devices").component("switch", "Relay"))
        .internal_state("control", json!("AUTO"))
        .build()
        .await
        .unwrap();

    assert_eq!(engine.get_state("control"), Some(json!("AUTO")));

    let mut updates = engine.get_state_updates();
    engine.set_state("target_temperature", json!(22.5));

    // The getter reflects the write immediately...
    assert_eq!(engine.get_state("target_temperature"), Some(json!(22.5)));

    // ...and the next snapshot on the change stream includes it.
    let snapshot = tokio::time::timeout(Duration::from_secs(1), updates.changed())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot["target_temperature"], json!(22.5));
    assert_eq!(snapshot["control"], json!("AUTO"));

    // The pull accessor always equals the latest known values.
    assert_eq!(engine.get_all_states().as_ref(), snapshot.as_ref());
}

#[tokio::test]
async fn queued_commands_run_in_submission_order() {
    let bus = MemoryBus::new();

    let order: Arc<Mutex<Vec<String>>> = Arc::default();
    for command in ["on", "off", "toggle"] {
        let log = Arc::clone(&order);
        bus.subscribe(
            &Topic::command("devices", "bench", "switch", command),
            Arc::new(move |topic, _| {
                if let Ok(switchyard_transport::TopicKind::Command { command, .. }) = topic.parse()
                {
                    log.lock().unwrap().push(command.to_owned());
                }
            }),
        )
        .await
        .unwrap();
    }

    let engine = Engine::builder(registry())
        .config(test_config())
        .push_channel("devices", Arc::new(bus))
        .device(DeviceDecl::new("bench", "devices").component("switch", "Relay"))
        .build()
        .await
        .unwrap();
    engine.start().await;

    let submitted = ["on", "off", "on", "toggle", "off", "toggle", "on", "off", "on"];
    for command in submitted {
        engine
            .add_command(format!("bench.switch.{command}"), Value::Null)
            .await
            .unwrap();
    }

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if order.lock().unwrap().len() == submitted.len() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(order.lock().unwrap().clone(), submitted.to_vec());

    // Bad paths are logged, not fatal: the consumer keeps draining.
    engine.add_command("not-a-path", Value::Null).await.unwrap();
    engine
        .add_command("bench.switch.on", json!({"params": {"hold": true}}))
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if order.lock().unwrap().len() == submitted.len() + 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    engine.shutdown().await;
}

// ── Construction resilience ─────────────────────────────────────────

#[tokio::test]
async fn unknown_component_type_is_skipped_not_fatal() {
    let bus = MemoryBus::new();
    let engine = Engine::builder(registry())
        .config(test_config())
        .push_channel("devices", Arc::new(bus.clone()))
        .device(
            DeviceDecl::new("bench", "devices")
                .component("sensorA", "TemperatureSensor")
                .component("mystery", "UnregisteredType"),
        )
        .build()
        .await
        .unwrap();

    let device = engine.device("bench").unwrap();
    assert!(device.component("sensorA").is_ok());
    assert!(matches!(
        device.component("mystery"),
        Err(CoreError::ComponentNotFound { .. })
    ));
}

#[tokio::test]
async fn component_without_transport_binding_is_skipped() {
    // Poll component declared, but no pull channel bound for it.
    let engine = Engine::builder(registry())
        .device(DeviceDecl::new("thermo", "climate").component("ac", "PolledThermostat"))
        .build()
        .await
        .unwrap();

    let device = engine.device("thermo").unwrap();
    assert!(matches!(
        device.component("ac"),
        Err(CoreError::ComponentNotFound { .. })
    ));
}

// ── Shutdown ────────────────────────────────────────────────────────

#[tokio::test]
async fn shutdown_stops_monitoring_and_command_intake_keeps_state_readable() {
    let bus = MemoryBus::new();
    spawn_sensor_device(&bus, "bench", Duration::from_millis(10), 5).await;

    let engine = Engine::builder(registry())
        .config(test_config())
        .push_channel("devices", Arc::new(bus.clone()))
        .device(DeviceDecl::new("bench", "devices").component("sensorA", "TemperatureSensor"))
        .build()
        .await
        .unwrap();

    engine.start().await;
    let path = state_path("bench", "sensorA", "reading");
    wait_for_state(&engine, &path, |value| value["value"] == json!(5)).await;

    engine.shutdown().await;

    // Monitors are gone: a late push no longer reaches the snapshot.
    bus.publish(
        &Topic::status("devices", "bench", "sensorA", "reading"),
        json!({"event": "reading_ready", "value": 99}),
    )
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(engine.get_state(&path).unwrap()["value"], json!(5));

    // The snapshot stays readable after shutdown.
    assert!(engine.get_all_states().contains_key(&path));
}
