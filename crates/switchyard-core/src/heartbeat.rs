// ── Heartbeat monitor ──
//
// One liveness prober per transport namespace, not per device: every
// device behind a connection answers on the shared response channel.
// A probe is a ping on `{ns}/heartbeat/request`; *any* reply observed on
// `{ns}/heartbeat/response` within the timeout counts as liveness (no
// request-id matching -- devices echo the id, but the shared channel means
// a reply cannot be pinned to one probe anyway). Cadence is independent
// of, and normally longer than, the snapshot refresh interval.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::Display;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use switchyard_transport::{HeartbeatPing, PushChannel, Topic};

use crate::config::EngineConfig;
use crate::error::CoreError;
use crate::state::StateStore;

/// Liveness of a transport namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Liveness {
    Online,
    Offline,
    /// The probe itself could not be sent.
    Error,
}

/// Snapshot record for one namespace's liveness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRecord {
    pub state: Liveness,
    pub timestamp: DateTime<Utc>,
    /// Last reply payload (online) or failure diagnostic (error).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

impl HeartbeatRecord {
    fn now(state: Liveness, detail: Option<Value>) -> Self {
        Self {
            state,
            timestamp: Utc::now(),
            detail,
        }
    }
}

/// Liveness prober for one transport namespace.
pub(crate) struct HeartbeatMonitor {
    namespace: String,
    channel: Arc<dyn PushChannel>,
    reply_seen: watch::Sender<u64>,
    last_reply: ArcSwapOption<Value>,
}

impl HeartbeatMonitor {
    /// Subscribe the namespace's response channel and return the monitor.
    pub(crate) async fn bind(
        namespace: &str,
        channel: Arc<dyn PushChannel>,
    ) -> Result<Arc<Self>, CoreError> {
        let (reply_seen, _) = watch::channel(0_u64);
        let monitor = Arc::new(Self {
            namespace: namespace.to_owned(),
            channel,
            reply_seen,
            last_reply: ArcSwapOption::empty(),
        });

        let sink = Arc::clone(&monitor);
        monitor
            .channel
            .subscribe(
                &Topic::heartbeat_response(namespace),
                Arc::new(move |_topic, payload| {
                    sink.last_reply.store(Some(Arc::new(payload)));
                    sink.reply_seen.send_modify(|seen| *seen += 1);
                }),
            )
            .await?;

        Ok(monitor)
    }

    /// Snapshot path this monitor writes its records under.
    pub(crate) fn status_path(&self) -> String {
        format!("{}.heartbeat_status", self.namespace)
    }

    /// Probe on the configured cadence until cancelled, writing a record
    /// into the snapshot after every cycle. The first probe fires
    /// immediately.
    pub(crate) async fn run(
        self: Arc<Self>,
        store: Arc<StateStore>,
        config: Arc<EngineConfig>,
        cancel: CancellationToken,
    ) {
        let path = self.status_path();
        let mut ticker = tokio::time::interval(config.heartbeat_interval);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let record = self.probe(config.heartbeat_timeout).await;
            debug!(namespace = %self.namespace, state = %record.state, "heartbeat cycle");

            match serde_json::to_value(&record) {
                Ok(value) => store.set_external(path.clone(), value),
                Err(error) => warn!(namespace = %self.namespace, %error, "heartbeat record serialization failed"),
            }
        }
    }

    async fn probe(&self, timeout: std::time::Duration) -> HeartbeatRecord {
        // Arm before publishing so a fast reply is not missed.
        let mut armed = self.reply_seen.subscribe();

        let ping = HeartbeatPing::new();
        let body = match serde_json::to_value(&ping) {
            Ok(body) => body,
            Err(error) => {
                return HeartbeatRecord::now(
                    Liveness::Error,
                    Some(Value::String(error.to_string())),
                );
            }
        };

        if let Err(error) = self
            .channel
            .publish(&Topic::heartbeat_request(&self.namespace), body)
            .await
        {
            warn!(namespace = %self.namespace, %error, "liveness probe publish failed");
            return HeartbeatRecord::now(Liveness::Error, Some(Value::String(error.to_string())));
        }

        match tokio::time::timeout(timeout, armed.changed()).await {
            Ok(Ok(())) => {
                let detail = self.last_reply.load_full().map(|reply| (*reply).clone());
                HeartbeatRecord::now(Liveness::Online, detail)
            }
            _ => {
                debug!(namespace = %self.namespace, ?timeout, "no heartbeat reply within timeout");
                HeartbeatRecord::now(Liveness::Offline, None)
            }
        }
    }
}
