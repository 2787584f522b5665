// ── Topic naming scheme ──
//
// Every wire operation addresses a slash-separated topic:
//
//   {namespace}/{device}/{component}/{command}            command dispatch
//   {namespace}/{device}/{component}/status/{status}      status delivery
//   {namespace}/heartbeat/request                         liveness probe
//   {namespace}/heartbeat/response                        liveness reply
//
// The namespace groups devices sharing one physical connection; one
// heartbeat channel serves the whole namespace.

use std::fmt;

use crate::error::TransportError;

/// A fully-qualified transport topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic(String);

impl Topic {
    /// Topic for dispatching a command to a component.
    pub fn command(namespace: &str, device: &str, component: &str, command: &str) -> Self {
        Self(format!("{namespace}/{device}/{component}/{command}"))
    }

    /// Topic a component publishes a status value on.
    pub fn status(namespace: &str, device: &str, component: &str, status: &str) -> Self {
        Self(format!("{namespace}/{device}/{component}/status/{status}"))
    }

    /// Liveness probe topic for a namespace.
    pub fn heartbeat_request(namespace: &str) -> Self {
        Self(format!("{namespace}/heartbeat/request"))
    }

    /// Liveness reply topic for a namespace.
    pub fn heartbeat_response(namespace: &str) -> Self {
        Self(format!("{namespace}/heartbeat/response"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decompose a topic back into its addressing parts.
    ///
    /// Status topics are the interesting case: an incoming message on
    /// `ns/dev/comp/status/name` must be routed to the right status record,
    /// so the parser recovers `(device, component, status)` from the path.
    pub fn parse(&self) -> Result<TopicKind<'_>, TransportError> {
        let parts: Vec<&str> = self.0.split('/').collect();

        match parts.as_slice() {
            [ns, "heartbeat", "request"] => Ok(TopicKind::HeartbeatRequest { namespace: ns }),
            [ns, "heartbeat", "response"] => Ok(TopicKind::HeartbeatResponse { namespace: ns }),
            [ns, device, component, "status", status] => Ok(TopicKind::Status {
                namespace: ns,
                device,
                component,
                status,
            }),
            [ns, device, component, command] => Ok(TopicKind::Command {
                namespace: ns,
                device,
                component,
                command,
            }),
            _ => Err(TransportError::MalformedTopic {
                topic: self.0.clone(),
            }),
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Topic {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl From<&str> for Topic {
    fn from(raw: &str) -> Self {
        Self(raw.to_owned())
    }
}

/// The addressing parts of a parsed [`Topic`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicKind<'a> {
    Command {
        namespace: &'a str,
        device: &'a str,
        component: &'a str,
        command: &'a str,
    },
    Status {
        namespace: &'a str,
        device: &'a str,
        component: &'a str,
        status: &'a str,
    },
    HeartbeatRequest {
        namespace: &'a str,
    },
    HeartbeatResponse {
        namespace: &'a str,
    },
}
