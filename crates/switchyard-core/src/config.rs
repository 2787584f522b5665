// ── Runtime engine configuration ──
//
// These types describe *how* the engine runs: timeouts, cadences, queue
// depths. They never touch disk -- the application loads its own config
// format and hands an `EngineConfig` in.

use std::collections::HashMap;
use std::time::Duration;

/// Tuning knobs for the engine and everything it spawns.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Default deadline for a correlated command/status exchange.
    pub command_timeout: Duration,

    /// Deadline used for each binding during the bootstrap refresh.
    pub bootstrap_timeout: Duration,

    /// Delay between issuing a command to a poll-driven component and
    /// querying the resulting status.
    pub settle_delay: Duration,

    /// Default poll cadence for poll-driven statuses.
    pub poll_interval: Duration,

    /// Per-status overrides of the poll cadence, keyed by status name.
    pub poll_intervals: HashMap<String, Duration>,

    /// How often push-driven data commands are re-issued so event-driven
    /// state cannot silently go stale. Zero disables the periodic refresh.
    pub refresh_interval: Duration,

    /// Liveness probe cadence per transport namespace.
    pub heartbeat_interval: Duration,

    /// How long a probe waits for any reply before the namespace is
    /// recorded offline.
    pub heartbeat_timeout: Duration,

    /// Grace period a continuous watch gets to exit after its stop signal
    /// before it is force-cancelled.
    pub watch_stop_grace: Duration,

    /// Depth of each status's recent-value queue. Oldest entries drop
    /// first when a slow watcher falls behind.
    pub status_queue_depth: usize,
}

impl EngineConfig {
    /// Poll cadence for a given status, honoring per-status overrides.
    pub fn poll_interval_for(&self, status: &str) -> Duration {
        self.poll_intervals
            .get(status)
            .copied()
            .unwrap_or(self.poll_interval)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(10),
            bootstrap_timeout: Duration::from_secs(2),
            settle_delay: Duration::from_millis(500),
            poll_interval: Duration::from_secs(10),
            poll_intervals: HashMap::new(),
            refresh_interval: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(5),
            watch_stop_grace: Duration::from_secs(2),
            status_queue_depth: 100,
        }
    }
}
