use thiserror::Error;

/// Top-level error type for the `switchyard-transport` crate.
///
/// Covers every failure mode of both channel shapes. `switchyard-core`
/// maps these into engine-facing diagnostics; a transport failure never
/// carries broker- or client-specific types across the seam.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The underlying connection is gone (broker dropped us, client closed).
    #[error("transport disconnected")]
    Disconnected,

    /// Publishing to a topic failed.
    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },

    /// Subscribing to a topic failed.
    #[error("subscribe to {topic} failed: {reason}")]
    Subscribe { topic: String, reason: String },

    /// A pull-channel operation invocation failed.
    #[error("invoke of {operation} failed: {reason}")]
    Invoke { operation: String, reason: String },

    /// A pull-channel value query failed.
    #[error("query of {operation} failed: {reason}")]
    Query { operation: String, reason: String },

    /// A payload could not be encoded or decoded.
    #[error("payload codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// A topic string did not match the naming scheme.
    #[error("malformed topic: {topic}")]
    MalformedTopic { topic: String },
}
