// ── State store ──
//
// Sole owner and sole writer of the merged snapshot. Adapter callbacks,
// poll loops, heartbeat monitors, and `set_state` calls all mutate
// through one lock around the rebuild-compare-swap of the whole map, so
// concurrent writers cannot lose updates. Publication is value-gated: a
// mutation that leaves the merged snapshot equal publishes nothing.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::watch;
use tracing::trace;

use super::{SnapshotStream, StateMap};

#[derive(Default)]
struct Partitions {
    /// Device-sourced values keyed by `device.component.status` (plus
    /// namespace heartbeat paths).
    external: StateMap,
    /// Local control values. Win over external values on key collision.
    internal: StateMap,
}

impl Partitions {
    fn merged(&self) -> StateMap {
        let mut merged = self.external.clone();
        merged.extend(
            self.internal
                .iter()
                .map(|(key, value)| (key.clone(), value.clone())),
        );
        merged
    }
}

/// Thread-safe snapshot store with value-gated change notification.
pub struct StateStore {
    partitions: Mutex<Partitions>,
    snapshot: watch::Sender<Arc<StateMap>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::with_internal(StateMap::new())
    }

    /// Seed the internal partition (e.g. control defaults) before any
    /// external value arrives.
    pub fn with_internal(internal: StateMap) -> Self {
        let initial = Arc::new(internal.clone());
        let (snapshot, _) = watch::channel(initial);
        Self {
            partitions: Mutex::new(Partitions {
                external: StateMap::new(),
                internal,
            }),
            snapshot,
        }
    }

    /// Record a device-sourced value.
    pub fn set_external(&self, path: impl Into<String>, value: Value) {
        let path = path.into();
        trace!(path = %path, "external state update");
        self.apply(|partitions| {
            partitions.external.insert(path, value);
        });
    }

    /// Record a local control value.
    pub fn set_internal(&self, key: impl Into<String>, value: Value) {
        let key = key.into();
        trace!(key = %key, "internal state update");
        self.apply(|partitions| {
            partitions.internal.insert(key, value);
        });
    }

    /// Read one value: internal state first, then external.
    pub fn get(&self, key: &str) -> Option<Value> {
        let partitions = self.lock();
        partitions
            .internal
            .get(key)
            .or_else(|| partitions.external.get(key))
            .cloned()
    }

    /// The current merged snapshot (cheap `Arc` clone).
    pub fn snapshot(&self) -> Arc<StateMap> {
        self.snapshot.borrow().clone()
    }

    /// Subscribe to snapshot changes.
    pub fn subscribe(&self) -> SnapshotStream {
        SnapshotStream::new(self.snapshot.subscribe())
    }

    /// Mutate under the lock, rebuild the merged map, and publish it only
    /// if its value actually changed. The lock spans the compare-and-swap
    /// so interleaved writers cannot publish stale snapshots.
    fn apply(&self, mutate: impl FnOnce(&mut Partitions)) -> bool {
        let mut partitions = self.lock();
        mutate(&mut partitions);
        let merged = partitions.merged();

        self.snapshot.send_if_modified(|current| {
            if **current == merged {
                false
            } else {
                *current = Arc::new(merged);
                true
            }
        })
    }

    fn lock(&self) -> MutexGuard<'_, Partitions> {
        self.partitions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}
