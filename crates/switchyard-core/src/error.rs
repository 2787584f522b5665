// ── Core error types ──
//
// Caller-facing errors from switchyard-core. Correlation timeouts and
// liveness timeouts are NOT errors -- they surface as `None` results and
// offline records respectively. Errors here are reserved for genuinely
// invalid requests (unknown names), bad capability metadata, and transport
// faults that a direct caller should see.

use thiserror::Error;

use switchyard_transport::TransportError;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Configuration errors ─────────────────────────────────────────
    #[error("unknown component type: {type_name}")]
    UnknownComponentType { type_name: String },

    #[error("invalid capability metadata for {type_name}: {reason}")]
    InvalidCapability { type_name: String, reason: String },

    #[error("no transport bound for {device}.{component} ({required})")]
    TransportNotBound {
        device: String,
        component: String,
        required: String,
    },

    // ── Lookup errors ────────────────────────────────────────────────
    #[error("device not found: {name}")]
    DeviceNotFound { name: String },

    #[error("component not found: {device}.{name}")]
    ComponentNotFound { device: String, name: String },

    #[error("component {component} has no command {name}")]
    UnknownCommand { component: String, name: String },

    #[error("component {component} has no status {name}")]
    UnknownStatus { component: String, name: String },

    #[error("invalid command path: {path} (expected device.component.command)")]
    InvalidCommandPath { path: String },

    // ── Lifecycle errors ─────────────────────────────────────────────
    #[error("engine is shut down")]
    EngineShutdown,

    // ── Transport errors (wrapped) ───────────────────────────────────
    #[error(transparent)]
    Transport(#[from] TransportError),
}
