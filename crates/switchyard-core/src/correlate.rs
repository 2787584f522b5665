// ── Correlation primitives ──
//
// One StatusEvent per (component, status): a readiness generation for
// single-shot waits, a bounded fan-out queue of recent values for
// continuous watches, and the latest-value cache. Shared by every proxy
// and by the state engine.
//
// A single-shot wait is an armed WaitTicket: created armed, consumed
// exactly once by resolution (value seen, deadline passed, or dropped).
// Arming snapshots the current generation *before* the command goes out,
// which narrows -- but cannot fully close -- the window where a reply
// lands before the wait is armed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::error::CoreError;

/// Predicate a continuous watch consults between deliveries; the watch
/// loop exits once it returns true.
pub type StopCondition = Box<dyn Fn() -> bool + Send + Sync + 'static>;

// ── StatusEvent ──────────────────────────────────────────────────────

/// Correlation state for one observable status of one component.
pub(crate) struct StatusEvent {
    status: String,
    /// Bumped on every recorded update; single-shot waits arm against it.
    generation: watch::Sender<u64>,
    /// Latest observed value. Updated before the generation bump so a
    /// woken waiter always sees the value that woke it (or a newer one).
    cache: ArcSwapOption<Value>,
    /// Bounded fan-out queue; every subscriber sees every update, oldest
    /// entries drop first for subscribers that fall behind.
    updates: broadcast::Sender<Arc<Value>>,
}

impl StatusEvent {
    fn new(status: String, queue_depth: usize) -> Self {
        let (generation, _) = watch::channel(0_u64);
        let (updates, _) = broadcast::channel(queue_depth.max(1));
        Self {
            status,
            generation,
            cache: ArcSwapOption::empty(),
            updates,
        }
    }

    /// Record an observed update: cache it, fan it out, wake waiters.
    pub(crate) fn record(&self, value: Value) {
        let value = Arc::new(value);
        self.cache.store(Some(Arc::clone(&value)));
        // No receivers just means nobody is watching right now.
        let _ = self.updates.send(value);
        self.generation.send_modify(|generation| *generation += 1);
        trace!(status = %self.status, "status update recorded");
    }

    /// Record only if the value differs from the cache. Returns whether a
    /// change was propagated -- unchanged polls stay silent.
    pub(crate) fn record_if_changed(&self, value: Value) -> bool {
        let changed = self.latest().is_none_or(|cached| *cached != value);
        if changed {
            self.record(value);
        }
        changed
    }

    /// Update the cache without waking anyone. Used by direct queries,
    /// which observe state but are not correlation events.
    pub(crate) fn store_cached(&self, value: Value) {
        self.cache.store(Some(Arc::new(value)));
    }

    pub(crate) fn latest(&self) -> Option<Arc<Value>> {
        self.cache.load_full()
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<Arc<Value>> {
        self.updates.subscribe()
    }

    /// Arm a single-shot wait against the next update.
    pub(crate) fn arm(&self) -> WaitTicket {
        // A fresh receiver has the current value marked seen, so only a
        // subsequent record() resolves the ticket.
        let receiver = self.generation.subscribe();
        let ticket = WaitTicket {
            id: Uuid::new_v4(),
            status: self.status.clone(),
            receiver,
        };
        trace!(wait_id = %ticket.id, status = %self.status, "wait armed");
        ticket
    }
}

// ── WaitTicket ───────────────────────────────────────────────────────

/// An armed single-shot wait. Consumed exactly once: by a value arriving,
/// by its deadline passing, or by being dropped (cancellation).
pub(crate) struct WaitTicket {
    id: Uuid,
    status: String,
    receiver: watch::Receiver<u64>,
}

impl WaitTicket {
    /// Await the next update with a deadline. `false` on timeout or if the
    /// owning proxy is being torn down -- never an error.
    pub(crate) async fn wait(self, timeout: Duration) -> bool {
        let id = self.id;
        let status = self.status.clone();
        match tokio::time::timeout(timeout, self.resolved()).await {
            Ok(resolved) => resolved,
            Err(_) => {
                debug!(wait_id = %id, status = %status, ?timeout, "wait timed out");
                false
            }
        }
    }

    /// Await the next update with no deadline of its own; callers racing
    /// several tickets apply one shared deadline outside.
    pub(crate) async fn resolved(mut self) -> bool {
        match self.receiver.changed().await {
            Ok(()) => {
                debug!(wait_id = %self.id, status = %self.status, "wait resolved");
                true
            }
            Err(_) => false,
        }
    }
}

// ── StatusEvents ─────────────────────────────────────────────────────

/// All StatusEvent records owned by one component proxy. Fixed at proxy
/// construction from the capability table.
pub(crate) struct StatusEvents {
    owner: String,
    inner: HashMap<String, StatusEvent>,
}

impl StatusEvents {
    pub(crate) fn new<I>(device: &str, component: &str, statuses: I, queue_depth: usize) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let inner = statuses
            .into_iter()
            .map(|status| {
                let event = StatusEvent::new(status.clone(), queue_depth);
                (status, event)
            })
            .collect();
        Self {
            owner: format!("{device}.{component}"),
            inner,
        }
    }

    pub(crate) fn get(&self, status: &str) -> Result<&StatusEvent, CoreError> {
        self.inner
            .get(status)
            .ok_or_else(|| CoreError::UnknownStatus {
                component: self.owner.clone(),
                name: status.to_owned(),
            })
    }

    pub(crate) fn names(&self) -> impl Iterator<Item = &String> {
        self.inner.keys()
    }
}

// ── Continuous watches ───────────────────────────────────────────────

/// Opaque handle to a continuous watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(Uuid);

impl std::fmt::Display for WatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct ActiveWatch {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

/// Bookkeeping for the continuous watches of one proxy.
#[derive(Default)]
pub(crate) struct WatchSet {
    inner: Mutex<HashMap<WatchId, ActiveWatch>>,
}

impl WatchSet {
    pub(crate) fn register(&self, stop: CancellationToken, handle: JoinHandle<()>) -> WatchId {
        let id = WatchId(Uuid::new_v4());
        self.lock().insert(id, ActiveWatch { stop, handle });
        id
    }

    /// Stop one watch: signal, join within the grace period, force-cancel
    /// past it. Once this returns, the watch's callback can no longer run.
    pub(crate) async fn stop(&self, id: WatchId, grace: Duration) -> bool {
        let Some(watch) = self.lock().remove(&id) else {
            debug!(watch_id = %id, "no such continuous watch");
            return false;
        };
        Self::wind_down(id, watch, grace).await;
        true
    }

    /// Stop every watch. Used on proxy shutdown.
    pub(crate) async fn stop_all(&self, grace: Duration) {
        let drained: Vec<(WatchId, ActiveWatch)> = self.lock().drain().collect();
        for (id, watch) in drained {
            Self::wind_down(id, watch, grace).await;
        }
    }

    async fn wind_down(id: WatchId, watch: ActiveWatch, grace: Duration) {
        watch.stop.cancel();
        let mut handle = watch.handle;
        if tokio::time::timeout(grace, &mut handle).await.is_err() {
            debug!(watch_id = %id, "watch did not stop within grace period; aborting");
            handle.abort();
            let _ = handle.await;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<WatchId, ActiveWatch>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
