//! Per-object debouncing of file change events.
//!
//! Every object path gets at most one pending timer. Events arriving while
//! a timer is pending only replace the slot's latest change; when the timer
//! fires, the latest change is handed to the sink exactly once. Handling of
//! the same object is serialized by a per-object lock, and a slot is
//! dropped once it fired without a newer change arriving.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// What happened to a watched file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Write,
    Remove,
}

/// One classified raw event, already resolved to its object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub kind: ChangeKind,
    /// Raw file path reported by the OS.
    pub path: PathBuf,
    /// Debounce key.
    pub object: PathBuf,
}

impl Change {
    pub fn new(kind: ChangeKind, path: PathBuf, object: PathBuf) -> Self {
        Self { kind, path, object }
    }
}

pub type SinkFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Receives debounced changes.
pub type Sink = Arc<dyn Fn(Change) -> SinkFuture + Send + Sync>;

#[derive(Default)]
struct Slot {
    latest: Option<Change>,
    pending: bool,
    lock: Arc<tokio::sync::Mutex<()>>,
}

tokio::task_local! {
    /// Object whose handling the current task is running.
    static HANDLING: PathBuf;
}

/// Debounces changes per object path.
pub struct Debouncer {
    delay: Duration,
    slots: parking_lot::Mutex<HashMap<PathBuf, Slot>>,
    sink: Sink,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for Debouncer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debouncer")
            .field("delay", &self.delay)
            .field("slots", &self.slots.lock().len())
            .finish()
    }
}

impl Debouncer {
    pub fn new(delay: Duration, sink: Sink) -> Arc<Self> {
        Arc::new(Self {
            delay,
            slots: parking_lot::Mutex::new(HashMap::new()),
            sink,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Record a change, starting a timer for its object if none is pending.
    ///
    /// Must be called from within a tokio runtime.
    pub fn record(self: &Arc<Self>, change: Change) {
        if self.shutdown.is_cancelled() {
            return;
        }

        let object = change.object.clone();
        let start_timer = {
            let mut slots = self.slots.lock();
            let slot = slots.entry(object.clone()).or_default();
            slot.latest = Some(change);
            !std::mem::replace(&mut slot.pending, true)
        };

        if !start_timer {
            tracing::trace!("[debouncer] coalesced {}", object.display());
            return;
        }

        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(this.delay) => this.fire(&object).await,
                _ = this.shutdown.cancelled() => {}
            }
        });
    }

    /// Handle `change` right away, still serialized with timers of the
    /// same object. Any pending change for the object is superseded.
    pub async fn run_now(&self, change: Change) {
        let object = change.object.clone();
        let lock = {
            let mut slots = self.slots.lock();
            let slot = slots.entry(object.clone()).or_default();
            Arc::clone(&slot.lock)
        };

        let _guard = lock.lock().await;
        // The pending timer, if any, finds nothing left to fire
        if let Some(slot) = self.slots.lock().get_mut(&object) {
            slot.latest = None;
            slot.pending = false;
        }
        HANDLING.scope(object.clone(), (self.sink)(change)).await;
        self.release(&object);
    }

    async fn fire(&self, object: &Path) {
        let Some(lock) = self.slots.lock().get(object).map(|s| Arc::clone(&s.lock)) else {
            return;
        };

        let _guard = lock.lock().await;
        let change = match self.slots.lock().get_mut(object) {
            Some(slot) => {
                slot.pending = false;
                slot.latest.take()
            }
            // Dropped by `forget_under` while we waited
            None => return,
        };

        if let Some(change) = change {
            HANDLING.scope(object.to_path_buf(), (self.sink)(change)).await;
        }
        self.release(object);
    }

    /// Drop the slot unless a newer change is waiting.
    fn release(&self, object: &Path) {
        let mut slots = self.slots.lock();
        if slots
            .get(object)
            .is_some_and(|s| !s.pending && s.latest.is_none())
        {
            slots.remove(object);
        }
    }

    /// Discard pending changes for objects under `root` and wait for
    /// in-flight handling of those objects to finish.
    ///
    /// Safe to call from inside the sink: the caller's own object is not
    /// waited on.
    pub async fn forget_under(&self, root: &Path) {
        let locks: Vec<(PathBuf, Arc<tokio::sync::Mutex<()>>)> = {
            let mut slots = self.slots.lock();
            let keys: Vec<PathBuf> = slots
                .keys()
                .filter(|object| object.starts_with(root))
                .cloned()
                .collect();
            keys.into_iter()
                .filter_map(|key| slots.remove(&key).map(|slot| (key, slot.lock)))
                .collect()
        };

        let current = HANDLING.try_with(|object| object.clone()).ok();
        for (object, lock) in locks {
            if current.as_ref() == Some(&object) {
                continue;
            }
            drop(lock.lock().await);
        }
    }

    /// Stop all timers without firing them. Irreversible.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.slots.lock().clear();
    }

    /// Objects with a pending or running slot.
    pub fn pending(&self) -> usize {
        self.slots.lock().len()
    }
}
