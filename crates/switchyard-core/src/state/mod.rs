// ── Merged state snapshot ──
//
// The snapshot maps dotted paths (`device.component.status`, or a local
// key) to their last-known values. External (device-sourced) and internal
// (local control) partitions merge into one map; change notification
// pushes the full merged snapshot through a watch channel.

mod store;

use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use serde_json::Value;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

pub use store::StateStore;

/// The merged snapshot: dotted path -> last-known value.
pub type StateMap = BTreeMap<String, Value>;

/// Snapshot path for a component status: `device.component.status`.
pub fn state_path(device: &str, component: &str, status: &str) -> String {
    format!("{device}.{component}.{status}")
}

/// A subscription to snapshot changes.
///
/// Provides both point-in-time access and reactive change notification
/// via `changed()` or by converting to a `Stream`. A slow consumer skips
/// intermediate snapshots but always observes the latest one.
pub struct SnapshotStream {
    current: Arc<StateMap>,
    receiver: watch::Receiver<Arc<StateMap>>,
}

impl SnapshotStream {
    pub(crate) fn new(receiver: watch::Receiver<Arc<StateMap>>) -> Self {
        let current = receiver.borrow().clone();
        Self { current, receiver }
    }

    /// The snapshot captured at subscription time.
    pub fn current(&self) -> &Arc<StateMap> {
        &self.current
    }

    /// The latest snapshot (may have changed since subscription).
    pub fn latest(&self) -> Arc<StateMap> {
        self.receiver.borrow().clone()
    }

    /// Wait for the next change, returning the new snapshot.
    /// Returns `None` once the store has been dropped.
    pub async fn changed(&mut self) -> Option<Arc<StateMap>> {
        self.receiver.changed().await.ok()?;
        let snapshot = self.receiver.borrow_and_update().clone();
        self.current = snapshot.clone();
        Some(snapshot)
    }

    /// Convert into a `Stream` for use with `StreamExt` combinators.
    pub fn into_stream(self) -> SnapshotWatchStream {
        SnapshotWatchStream {
            inner: WatchStream::new(self.receiver),
        }
    }
}

/// `Stream` adapter backed by the snapshot watch channel.
pub struct SnapshotWatchStream {
    inner: WatchStream<Arc<StateMap>>,
}

impl Stream for SnapshotWatchStream {
    type Item = Arc<StateMap>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
