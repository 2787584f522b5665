// ── Front-end command queue types ──
//
// Commands from the consumer-facing surface are queued and drained by
// exactly one task, so they execute strictly in submission order. A
// command addresses its target by dotted path (`device.component.command`)
// resolved against the explicit device registry -- no string-eval, no
// attribute walking.

use serde_json::Value;

use crate::error::CoreError;

/// A command queued for ordered execution.
#[derive(Debug, Clone)]
pub struct QueuedCommand {
    /// Dotted target path: `device.component.command`.
    pub name: String,
    /// Command arguments; see [`command_params`] for accepted shapes.
    pub data: Value,
}

/// Split a dotted command path into (device, component, command).
pub(crate) fn parse_command_path(path: &str) -> Result<(&str, &str, &str), CoreError> {
    let mut parts = path.split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(device), Some(component), Some(command), None)
            if !device.is_empty() && !component.is_empty() && !command.is_empty() =>
        {
            Ok((device, component, command))
        }
        _ => Err(CoreError::InvalidCommandPath {
            path: path.to_owned(),
        }),
    }
}

/// Extract command parameters from queued data.
///
/// Accepts the wire shape (`{"params": {...}}`), a bare object (treated
/// as the params themselves), or null for no-arg commands.
pub(crate) fn command_params(data: &Value) -> Option<Value> {
    match data {
        Value::Null => None,
        Value::Object(map) => match map.get("params") {
            Some(params) => Some(params.clone()),
            None if map.is_empty() => None,
            None => Some(data.clone()),
        },
        other => Some(other.clone()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn well_formed_path_splits() {
        let (device, component, command) = parse_command_path("hvac.ac.set_temp").unwrap();
        assert_eq!((device, component, command), ("hvac", "ac", "set_temp"));
    }

    #[test]
    fn malformed_paths_are_rejected() {
        for path in ["", "hvac", "hvac.ac", "hvac.ac.set_temp.extra", "hvac..x"] {
            assert!(
                matches!(
                    parse_command_path(path),
                    Err(CoreError::InvalidCommandPath { .. })
                ),
                "{path} should be rejected"
            );
        }
    }

    #[test]
    fn params_shapes() {
        assert_eq!(command_params(&json!(null)), None);
        assert_eq!(command_params(&json!({})), None);
        assert_eq!(
            command_params(&json!({"params": {"t": 21}})),
            Some(json!({"t": 21}))
        );
        assert_eq!(
            command_params(&json!({"t": 21})),
            Some(json!({"t": 21}))
        );
        assert_eq!(command_params(&json!(5)), Some(json!(5)));
    }
}
