//! Name-keyed publish/subscribe bus.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use super::args::Args;
use super::error::{DispatchError, DispatchResult};
use super::listener::{Flow, IntoListener, InvokeError, Listener, Signature};

/// One subscribed listener.
struct Registration {
    id: u64,
    listener: Listener,
    /// Triggers left before self-removal; `None` means unlimited.
    remaining: Option<AtomicUsize>,
    token: CancellationToken,
}

impl Registration {
    fn is_live(&self) -> bool {
        !self.token.is_cancelled()
            && self
                .remaining
                .as_ref()
                .is_none_or(|r| r.load(Ordering::Acquire) > 0)
    }

    /// Claim one trigger. Fails once the budget is spent.
    fn try_reserve(&self) -> bool {
        match &self.remaining {
            None => true,
            Some(remaining) => remaining
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
                .is_ok(),
        }
    }

    /// Give back a trigger claimed for a failed invocation.
    fn release(&self) {
        if let Some(remaining) = &self.remaining {
            remaining.fetch_add(1, Ordering::AcqRel);
        }
    }

    fn is_exhausted(&self) -> bool {
        self.remaining
            .as_ref()
            .is_some_and(|r| r.load(Ordering::Acquire) == 0)
    }

    fn info(&self) -> ListenerInfo {
        ListenerInfo {
            id: self.id,
            signature: self.listener.signature().clone(),
            remaining_triggers: self.remaining.as_ref().map(|r| r.load(Ordering::Acquire)),
        }
    }
}

/// Read-only view of a registered listener, for introspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerInfo {
    pub id: u64,
    pub signature: Signature,
    pub remaining_triggers: Option<usize>,
}

#[derive(Default)]
struct Inner {
    events: RwLock<HashMap<String, Vec<Arc<Registration>>>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl Inner {
    fn unsubscribe(&self, name: &str, id: u64) {
        let mut events = self.events.write();
        let Some(listeners) = events.get_mut(name) else {
            crate::debug_event!("dispatcher", "unsubscribe", "no listeners left for '{name}'");
            return;
        };

        let before = listeners.len();
        listeners.retain(|r| r.id != id);
        if listeners.len() != before {
            crate::debug_event!("dispatcher", "unsubscribed", "'{name}' listener {id}");
        }
        if listeners.is_empty() {
            events.remove(name);
        }
    }

    fn prune(&self, name: &str) {
        let mut events = self.events.write();
        if let Some(listeners) = events.get_mut(name) {
            listeners.retain(|r| r.is_live());
            if listeners.is_empty() {
                events.remove(name);
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        // Releases the cleanup tasks waiting on listener tokens.
        for listeners in self.events.get_mut().values() {
            for registration in listeners {
                registration.token.cancel();
            }
        }
    }
}

/// Handle returned by [`Dispatcher::subscribe`].
///
/// Cancelling it (or the scope it was subscribed under) deregisters the
/// listener. Cancelling is idempotent. Dropping the handle does not
/// cancel anything.
#[derive(Clone)]
pub struct Subscription {
    id: u64,
    name: String,
    token: CancellationToken,
    inner: Weak<Inner>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn event(&self) -> &str {
        &self.name
    }

    /// Deregister the listener.
    pub fn cancel(&self) {
        self.token.cancel();
        if let Some(inner) = self.inner.upgrade() {
            inner.unsubscribe(&self.name, self.id);
        }
    }

    /// True once the listener was cancelled, either explicitly, through
    /// its scope, or by spending its trigger budget.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("event", &self.name)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Generic, name-keyed event dispatcher.
///
/// Cheap to clone; clones share the listener table.
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for events named `name`.
    ///
    /// `max_triggers == 0` means unlimited; otherwise the listener removes
    /// itself after that many successful invocations. The first listener
    /// of a name fixes its [`Signature`]; later ones must match it.
    pub fn subscribe<M>(
        &self,
        scope: &CancellationToken,
        name: &str,
        handler: impl IntoListener<M>,
        max_triggers: usize,
    ) -> DispatchResult<Subscription> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(DispatchError::Closed);
        }
        if scope.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }

        let listener = handler.into_listener();
        let token = scope.child_token();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        {
            let mut events = self.inner.events.write();

            if let Some(existing) = events.get_mut(name) {
                existing.retain(|r| r.is_live());
                if let Some(first) = existing.first() {
                    if first.listener.signature() != listener.signature() {
                        return Err(DispatchError::SignatureMismatch {
                            event: name.to_string(),
                            expected: first.listener.signature().to_string(),
                            found: listener.signature().to_string(),
                        });
                    }
                }
            }

            let registration = Arc::new(Registration {
                id,
                listener,
                remaining: (max_triggers > 0).then(|| AtomicUsize::new(max_triggers)),
                token: token.clone(),
            });
            events
                .entry(name.to_string())
                .or_default()
                .push(registration);
        }

        self.spawn_cleanup(name, id, &token);
        crate::debug_event!("dispatcher", "subscribed", "'{name}' listener {id}");

        Ok(Subscription {
            id,
            name: name.to_string(),
            token,
            inner: Arc::downgrade(&self.inner),
        })
    }

    /// Remove the listener as soon as its token fires, when a runtime is
    /// available. Without one, cancelled listeners are skipped by reads and
    /// pruned on the next write.
    fn spawn_cleanup(&self, name: &str, id: u64, token: &CancellationToken) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let inner = Arc::downgrade(&self.inner);
        let token = token.clone();
        let name = name.to_string();
        handle.spawn(async move {
            token.cancelled().await;
            if let Some(inner) = inner.upgrade() {
                inner.unsubscribe(&name, id);
            }
        });
    }

    /// Invoke every listener of `name`, most recently registered first.
    ///
    /// Stops early without error when a typed event stops propagation,
    /// and stops with the error when a listener fails.
    pub fn emit(
        &self,
        scope: &CancellationToken,
        name: &str,
        args: &mut Args,
    ) -> DispatchResult<()> {
        if scope.is_cancelled() {
            crate::debug_event!("dispatcher", "cancelled", "'{name}'");
            return Err(DispatchError::Cancelled);
        }

        tracing::trace!("[dispatcher] emit '{name}' with {args:?}");

        // Snapshot so (un)subscribes during dispatch don't affect this emission.
        let snapshot: Vec<Arc<Registration>> = {
            let events = self.inner.events.read();
            events
                .get(name)
                .map(|listeners| listeners.iter().rev().filter(|r| r.is_live()).cloned().collect())
                .unwrap_or_default()
        };

        let mut result = Ok(());
        let mut spent = false;

        for registration in &snapshot {
            if scope.is_cancelled() {
                crate::debug_event!("dispatcher", "cancelled", "'{name}'");
                result = Err(DispatchError::Cancelled);
                break;
            }
            if !registration.try_reserve() {
                continue;
            }

            match registration.listener.invoke(args) {
                Ok(flow) => {
                    if registration.is_exhausted() {
                        registration.token.cancel();
                        spent = true;
                    }
                    if flow == Flow::Stop {
                        tracing::trace!("[dispatcher] propagation stopped for '{name}'");
                        break;
                    }
                }
                Err(e) => {
                    registration.release();
                    let err = match e {
                        InvokeError::Parameters(reason) => DispatchError::ParameterMismatch {
                            event: name.to_string(),
                            reason,
                        },
                        InvokeError::Handler(source) => DispatchError::ListenerFailed {
                            event: name.to_string(),
                            source,
                        },
                    };
                    tracing::error!("[dispatcher] error handling '{name}': {err}");
                    result = Err(err);
                    break;
                }
            }
        }

        if spent {
            self.inner.prune(name);
        }

        result
    }

    /// Emit `args` under every registered event name, in no particular
    /// order. Returns the first error.
    pub fn broadcast(&self, scope: &CancellationToken, args: &mut Args) -> DispatchResult<()> {
        for name in self.list_events() {
            self.emit(scope, &name, args)?;
        }
        Ok(())
    }

    /// Whether any live listener is registered for `name`.
    pub fn event_exists(&self, name: &str) -> bool {
        self.inner
            .events
            .read()
            .get(name)
            .is_some_and(|listeners| listeners.iter().any(|r| r.is_live()))
    }

    /// Names with at least one live listener.
    pub fn list_events(&self) -> Vec<String> {
        self.inner
            .events
            .read()
            .iter()
            .filter(|(_, listeners)| listeners.iter().any(|r| r.is_live()))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Names for which `filter` returns true.
    pub fn filter_events<F>(&self, filter: F) -> Vec<String>
    where
        F: Fn(&str, &[ListenerInfo]) -> bool,
    {
        let events = self.inner.events.read();
        events
            .iter()
            .filter_map(|(name, listeners)| {
                let infos: Vec<ListenerInfo> = listeners
                    .iter()
                    .filter(|r| r.is_live())
                    .map(|r| r.info())
                    .collect();
                (!infos.is_empty() && filter(name, &infos)).then(|| name.clone())
            })
            .collect()
    }

    /// Live listeners registered for `name`.
    pub fn count_listeners(&self, name: &str) -> usize {
        self.inner
            .events
            .read()
            .get(name)
            .map_or(0, |listeners| listeners.iter().filter(|r| r.is_live()).count())
    }

    /// Live listeners across all names.
    pub fn total_listeners(&self) -> usize {
        self.inner
            .events
            .read()
            .values()
            .map(|listeners| listeners.iter().filter(|r| r.is_live()).count())
            .sum()
    }

    /// Deregister every listener. Later subscribes fail with
    /// [`DispatchError::Closed`]; closing twice is a no-op.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let drained: Vec<Arc<Registration>> = {
            let mut events = self.inner.events.write();
            events.drain().flat_map(|(_, listeners)| listeners).collect()
        };
        for registration in &drained {
            registration.token.cancel();
        }

        crate::debug_event!("dispatcher", "closed", "{} listeners released", drained.len());
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("events", &self.list_events())
            .field("listeners", &self.total_listeners())
            .finish()
    }
}
