// ── Capability registry ──
//
// Static description of what each component type can do: its commands,
// its observable statuses, and the command↔status bindings derived from
// their event tags. Built once at registration time from declarative
// metadata; immutable afterwards. No runtime introspection anywhere.

use std::sync::Arc;

use indexmap::IndexMap;
use tracing::debug;

use crate::error::CoreError;

// ── Descriptors ──────────────────────────────────────────────────────

/// A remote-invocable operation declared by a component type.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub name: String,
    /// Whether the on-device handler runs asynchronously.
    pub is_async: bool,
    /// Events this command produces status data on, e.g. a `read_temp`
    /// command tagged with `temp_update`.
    pub produces_on: Vec<String>,
}

/// A read-only observable declared by a component type.
#[derive(Debug, Clone)]
pub struct StatusSpec {
    pub name: String,
    /// Events that cause the device to publish this status unprompted.
    pub publishes_on: Vec<String>,
}

/// A (command, status, events) binding: invoking the command is expected
/// to produce an update of the status, announced by one of the events.
#[derive(Debug, Clone)]
pub struct DataCommand {
    pub command: String,
    pub status: String,
    pub events: Vec<String>,
}

// ── ComponentType ────────────────────────────────────────────────────

/// Immutable capability table for one component type.
#[derive(Debug, Clone)]
pub struct ComponentType {
    name: String,
    supports_push: bool,
    requires_polling: bool,
    commands: IndexMap<String, CommandSpec>,
    statuses: IndexMap<String, StatusSpec>,
    data_commands: Vec<DataCommand>,
}

impl ComponentType {
    /// Start declaring a component type. Defaults to push-capable.
    pub fn builder(name: impl Into<String>) -> ComponentTypeBuilder {
        ComponentTypeBuilder {
            name: name.into(),
            supports_push: true,
            requires_polling: false,
            commands: IndexMap::new(),
            statuses: IndexMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn supports_push(&self) -> bool {
        self.supports_push
    }

    pub fn requires_polling(&self) -> bool {
        self.requires_polling
    }

    pub fn commands(&self) -> impl Iterator<Item = &CommandSpec> {
        self.commands.values()
    }

    pub fn statuses(&self) -> impl Iterator<Item = &StatusSpec> {
        self.statuses.values()
    }

    pub fn command(&self, name: &str) -> Option<&CommandSpec> {
        self.commands.get(name)
    }

    pub fn status(&self, name: &str) -> Option<&StatusSpec> {
        self.statuses.get(name)
    }

    /// The derived command↔status bindings, in declaration order.
    pub fn data_commands(&self) -> &[DataCommand] {
        &self.data_commands
    }
}

/// Builder for a [`ComponentType`] capability table.
pub struct ComponentTypeBuilder {
    name: String,
    supports_push: bool,
    requires_polling: bool,
    commands: IndexMap<String, CommandSpec>,
    statuses: IndexMap<String, StatusSpec>,
}

impl ComponentTypeBuilder {
    /// Declare the delivery capabilities of this component type.
    pub fn delivery(mut self, supports_push: bool, requires_polling: bool) -> Self {
        self.supports_push = supports_push;
        self.requires_polling = requires_polling;
        self
    }

    /// Declare a command with no correlated status data.
    pub fn command(self, name: impl Into<String>) -> Self {
        self.command_with_events(name, Vec::new())
    }

    /// Declare a command that produces status data on the given events.
    pub fn data_command<I, S>(self, name: impl Into<String>, events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command_with_events(name, events.into_iter().map(Into::into).collect())
    }

    fn command_with_events(mut self, name: impl Into<String>, produces_on: Vec<String>) -> Self {
        let name = name.into();
        self.commands.insert(
            name.clone(),
            CommandSpec {
                name,
                is_async: true,
                produces_on,
            },
        );
        self
    }

    /// Mark the most recently declared command as synchronous on-device.
    pub fn blocking(mut self) -> Self {
        if let Some((_, spec)) = self.commands.last_mut() {
            spec.is_async = false;
        }
        self
    }

    /// Declare a status with no auto-publish events.
    pub fn status(self, name: impl Into<String>) -> Self {
        self.status_on(name, Vec::<String>::new())
    }

    /// Declare a status that auto-publishes on the given events.
    pub fn status_on<I, S>(mut self, name: impl Into<String>, events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        self.statuses.insert(
            name.clone(),
            StatusSpec {
                name,
                publishes_on: events.into_iter().map(Into::into).collect(),
            },
        );
        self
    }

    /// Validate the table and derive command↔status bindings.
    ///
    /// A command tagged with produce-events binds to every status whose
    /// publish-events intersect them. A command may bind to zero, one, or
    /// many statuses. Tagged commands whose events match no status at all
    /// are rejected -- that is a broken capability table, not a binding
    /// with zero statuses.
    pub fn build(self) -> Result<ComponentType, CoreError> {
        let mut data_commands = Vec::new();

        for command in self.commands.values() {
            if command.produces_on.is_empty() {
                continue;
            }

            let mut bound = false;
            for status in self.statuses.values() {
                let shared: Vec<String> = command
                    .produces_on
                    .iter()
                    .filter(|event| status.publishes_on.contains(*event))
                    .cloned()
                    .collect();

                if !shared.is_empty() {
                    data_commands.push(DataCommand {
                        command: command.name.clone(),
                        status: status.name.clone(),
                        events: shared,
                    });
                    bound = true;
                }
            }

            if !bound {
                return Err(CoreError::InvalidCapability {
                    type_name: self.name.clone(),
                    reason: format!(
                        "command {} produces events {:?} but no status publishes on them",
                        command.name, command.produces_on
                    ),
                });
            }
        }

        debug!(
            component_type = %self.name,
            commands = self.commands.len(),
            statuses = self.statuses.len(),
            bindings = data_commands.len(),
            "capability table built"
        );

        Ok(ComponentType {
            name: self.name,
            supports_push: self.supports_push,
            requires_polling: self.requires_polling,
            commands: self.commands,
            statuses: self.statuses,
            data_commands,
        })
    }
}

// ── CapabilityRegistry ───────────────────────────────────────────────

/// Lookup table of every known component type.
///
/// Pure and side-effect free after construction: `describe` is a map
/// lookup, nothing more.
#[derive(Debug, Default)]
pub struct CapabilityRegistry {
    types: IndexMap<String, Arc<ComponentType>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component type. Later registrations of the same name
    /// replace earlier ones.
    pub fn register(&mut self, component_type: ComponentType) {
        self.types
            .insert(component_type.name().to_owned(), Arc::new(component_type));
    }

    /// Look up the capability table for a component type.
    ///
    /// Unknown types are a configuration error; callers skip the component
    /// and keep going rather than aborting startup.
    pub fn describe(&self, type_name: &str) -> Result<Arc<ComponentType>, CoreError> {
        self.types
            .get(type_name)
            .cloned()
            .ok_or_else(|| CoreError::UnknownComponentType {
                type_name: type_name.to_owned(),
            })
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sensor_type() -> ComponentType {
        ComponentType::builder("TemperatureSensor")
            .data_command("read_temp", ["temp_update"])
            .command("reset")
            .status_on("temp_status", ["temp_update"])
            .status("last_error")
            .build()
            .unwrap()
    }

    #[test]
    fn bindings_derive_from_event_tags() {
        let sensor = sensor_type();
        let bindings = sensor.data_commands();

        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].command, "read_temp");
        assert_eq!(bindings[0].status, "temp_status");
        assert_eq!(bindings[0].events, vec!["temp_update".to_owned()]);
    }

    #[test]
    fn command_may_bind_to_many_statuses() {
        let built = ComponentType::builder("MultiSensor")
            .data_command("read_all", ["temp_update", "baro_update"])
            .status_on("temp_status", ["temp_update"])
            .status_on("baro_status", ["baro_update"])
            .build()
            .unwrap();

        assert_eq!(built.data_commands().len(), 2);
    }

    #[test]
    fn untagged_command_binds_nothing() {
        let sensor = sensor_type();
        assert!(sensor.command("reset").unwrap().produces_on.is_empty());
        assert!(
            !sensor
                .data_commands()
                .iter()
                .any(|binding| binding.command == "reset")
        );
    }

    #[test]
    fn dangling_event_tag_is_rejected() {
        let result = ComponentType::builder("Broken")
            .data_command("read", ["nonexistent_event"])
            .status_on("reading", ["reading_ready"])
            .build();

        assert!(matches!(result, Err(CoreError::InvalidCapability { .. })));
    }

    #[test]
    fn registry_describe_unknown_type() {
        let mut registry = CapabilityRegistry::new();
        registry.register(sensor_type());

        assert!(registry.describe("TemperatureSensor").is_ok());
        assert!(matches!(
            registry.describe("Nope"),
            Err(CoreError::UnknownComponentType { .. })
        ));
    }

    #[test]
    fn blocking_marks_last_command() {
        let built = ComponentType::builder("Relay")
            .command("on")
            .blocking()
            .command("off")
            .build()
            .unwrap();

        assert!(!built.command("on").unwrap().is_async);
        assert!(built.command("off").unwrap().is_async);
    }
}
