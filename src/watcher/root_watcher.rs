//! Recursive per-root watcher feeding the per-object debouncer.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecursiveMode, Watcher as _};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use super::debouncer::{Change, ChangeKind, Debouncer, Sink, SinkFuture};
use super::error::{WatchError, WatchResult};
use super::handler::ObjectHandler;
use super::root_registry::{RootRegistry, RootState};
use crate::config::WatcherSettings;

/// Watcher tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherConfig {
    /// Quiet period per object before its latest change is handled.
    pub debounce: Duration,
    /// Raw OS events buffered per root.
    pub event_buffer: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            event_buffer: 100,
        }
    }
}

impl From<&WatcherSettings> for WatcherConfig {
    fn from(settings: &WatcherSettings) -> Self {
        Self {
            debounce: settings.debounce(),
            ..Self::default()
        }
    }
}

struct Inner {
    handler: Arc<dyn ObjectHandler>,
    config: WatcherConfig,
    roots: Mutex<RootRegistry>,
    debouncer: Arc<Debouncer>,
    closed: AtomicBool,
    /// Parent of every root's monitor token.
    shutdown: CancellationToken,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.debouncer.shutdown();
    }
}

impl Inner {
    /// Route one raw OS event to the debouncer.
    fn on_event(&self, event: Event) {
        for (kind, path) in classify(&event) {
            // Files may land in a new directory before its watch is installed
            if matches!(event.kind, EventKind::Create(_)) && path.is_dir() {
                self.scan_new_directory(path);
            }

            if !self.handler.is_watchable(path) {
                tracing::trace!("[watcher] ignored {:?} {}", event.kind, path.display());
                continue;
            }
            let object = self.handler.resolve_object_path(path);
            self.debouncer
                .record(Change::new(kind, path.to_path_buf(), object));
        }
    }

    fn scan_new_directory(&self, dir: &Path) {
        let handler = Arc::clone(&self.handler);
        let debouncer = Arc::clone(&self.debouncer);
        let dir = dir.to_path_buf();
        tokio::task::spawn_blocking(move || match collect_objects(&dir, handler.as_ref()) {
            Ok(changes) => changes.into_iter().for_each(|change| debouncer.record(change)),
            Err(e) => tracing::warn!("[watcher] {e}"),
        });
    }

    /// Run the handler for one debounced change.
    async fn handle(&self, change: Change) {
        if !self.roots.lock().covers(&change.object) {
            crate::debug_event!(
                "watcher",
                "dropped",
                "{} is no longer watched",
                change.object.display()
            );
            return;
        }

        // Editors that save through a rename leave a write for a vanished path
        let kind = match change.kind {
            ChangeKind::Write if !change.path.exists() => ChangeKind::Remove,
            kind => kind,
        };

        let name = self.handler.name();
        let object = change.object.as_path();
        let result = match kind {
            ChangeKind::Write => self.handler.update_object(object).await,
            ChangeKind::Remove => self.handler.remove_object(object).await,
        };

        match (kind, result) {
            (ChangeKind::Write, Ok(())) => {
                crate::log_event!(name, "updated", "{}", object.display())
            }
            (ChangeKind::Remove, Ok(())) => {
                crate::log_event!(name, "removed", "{}", object.display())
            }
            (kind, Err(e)) => {
                tracing::error!("[{name}] {kind:?} failed for {}: {e:#}", object.display())
            }
        }
    }
}

/// Split a notify event into per-path changes.
fn classify(event: &Event) -> Vec<(ChangeKind, &Path)> {
    let all = |kind: ChangeKind| {
        event
            .paths
            .iter()
            .map(|p| (kind, p.as_path()))
            .collect::<Vec<_>>()
    };

    match event.kind {
        EventKind::Create(_) => all(ChangeKind::Write),
        EventKind::Remove(_) => all(ChangeKind::Remove),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => all(ChangeKind::Remove),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => all(ChangeKind::Write),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => event
            .paths
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let kind = if i == 0 {
                    ChangeKind::Remove
                } else {
                    ChangeKind::Write
                };
                (kind, p.as_path())
            })
            .collect(),
        // Includes ambiguous renames; handled as writes and re-checked on fire
        EventKind::Modify(_) => all(ChangeKind::Write),
        _ => Vec::new(),
    }
}

/// Absolute, symlink-free form of a root path when it exists.
fn normalize_root(path: &Path) -> PathBuf {
    std::fs::canonicalize(path)
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

/// One write per distinct object below `root`.
fn collect_objects(root: &Path, handler: &dyn ObjectHandler) -> WatchResult<Vec<Change>> {
    let mut seen = HashSet::new();
    let mut changes = Vec::new();

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => {
                return Err(WatchError::WalkFailed {
                    path: root.to_path_buf(),
                    reason: e.to_string(),
                });
            }
            Err(e) => {
                tracing::warn!("[watcher] skipping unreadable entry: {e}");
                continue;
            }
        };

        if !entry.file_type().is_file() || !handler.is_watchable(entry.path()) {
            continue;
        }

        let object = handler.resolve_object_path(entry.path());
        if seen.insert(object.clone()) {
            changes.push(Change::new(
                ChangeKind::Write,
                entry.path().to_path_buf(),
                object,
            ));
        }
    }

    Ok(changes)
}

async fn monitor(
    inner: Weak<Inner>,
    root: PathBuf,
    mut events: mpsc::Receiver<notify::Result<Event>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = events.recv() => match received {
                Some(Ok(event)) => {
                    let Some(inner) = inner.upgrade() else { break };
                    inner.on_event(event);
                }
                Some(Err(e)) => {
                    tracing::error!("[watcher] file watch error under {}: {e}", root.display());
                }
                None => break,
            }
        }
    }
    crate::debug_event!("watcher", "monitor stopped", "{}", root.display());
}

/// Debounced recursive file watcher over a set of non-overlapping roots.
///
/// Raw events are filtered and resolved to object paths by the injected
/// [`ObjectHandler`], coalesced per object, and turned into one
/// `update_object` or `remove_object` call with the latest state.
///
/// Cheap to clone; clones share the roots.
#[derive(Clone)]
pub struct Watcher {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("handler", &self.inner.handler.name())
            .field("roots", &self.inner.roots.lock().paths())
            .field("config", &self.inner.config)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Watcher {
    /// Create a watcher with no roots.
    pub fn new(handler: Arc<dyn ObjectHandler>, config: WatcherConfig) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let weak = weak.clone();
            let sink: Sink = Arc::new(move |change: Change| -> SinkFuture {
                let weak = weak.clone();
                Box::pin(async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.handle(change).await;
                    }
                })
            });

            Inner {
                debouncer: Debouncer::new(config.debounce, sink),
                handler,
                config,
                roots: Mutex::new(RootRegistry::new()),
                closed: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
            }
        });

        Self { inner }
    }

    pub fn builder(handler: Arc<dyn ObjectHandler>) -> WatcherBuilder {
        WatcherBuilder::new(handler)
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.inner.config
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> WatchResult<()> {
        if self.is_closed() {
            Err(WatchError::Closed)
        } else {
            Ok(())
        }
    }

    /// Make the watched roots exactly `paths`.
    ///
    /// Roots that are no longer wanted are unregistered first (removing
    /// their objects), then new roots are registered. Every root is
    /// attempted; the first failure is returned.
    pub async fn set_paths<I, P>(&self, paths: I) -> WatchResult<()>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        self.ensure_open()?;

        let mut desired: Vec<PathBuf> = Vec::new();
        for path in paths {
            let root = normalize_root(path.as_ref());
            if !desired.contains(&root) {
                desired.push(root);
            }
        }

        let current = self.inner.roots.lock().paths();
        let mut first_error = None;

        for root in current.iter().filter(|root| !desired.contains(root)) {
            if let Err(e) = self.unregister_root(root).await {
                tracing::warn!("[watcher] {e}");
                first_error.get_or_insert(e);
            }
        }

        for root in desired.into_iter().filter(|root| !current.contains(root)) {
            if let Err(e) = self.register_root(root).await {
                tracing::warn!("[watcher] {e}");
                first_error.get_or_insert(e);
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Start watching additional roots.
    pub async fn register_paths<I, P>(&self, paths: I) -> WatchResult<()>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut first_error = None;
        for path in paths {
            if let Err(e) = self.register_root(normalize_root(path.as_ref())).await {
                tracing::warn!("[watcher] {e}");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Stop watching roots and remove their objects.
    pub async fn unregister_paths<I, P>(&self, paths: I) -> WatchResult<()>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut first_error = None;
        for path in paths {
            if let Err(e) = self.unregister_root(&normalize_root(path.as_ref())).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Fully registered roots.
    pub fn registered_paths(&self) -> Vec<PathBuf> {
        let roots = self.inner.roots.lock();
        roots
            .paths()
            .into_iter()
            .filter(|root| roots.state(root) == Some(RootState::Registered))
            .collect()
    }

    async fn register_root(&self, root: PathBuf) -> WatchResult<()> {
        self.ensure_open()?;
        if !root.is_dir() {
            return Err(WatchError::PathWatchFailed {
                path: root,
                reason: "not a directory".to_string(),
            });
        }

        let cancel = self.inner.shutdown.child_token();
        self.inner.roots.lock().reserve(&root, cancel.clone())?;

        // Lost a race with close()
        if self.is_closed() {
            if let Some(entry) = self.inner.roots.lock().remove(&root) {
                entry.teardown();
            }
            return Err(WatchError::Closed);
        }

        crate::debug_event!("watcher", "registering", "{}", root.display());

        match self.start_root(&root, &cancel).await {
            Ok(objects) => {
                crate::log_event!(
                    "watcher",
                    "registered",
                    "{} ({objects} objects)",
                    root.display()
                );
                Ok(())
            }
            Err(e) => {
                // A cancelled token means someone else already tore the root down
                if !cancel.is_cancelled() {
                    if let Some(entry) = self.inner.roots.lock().remove(&root) {
                        entry.teardown();
                    }
                }
                Err(e)
            }
        }
    }

    /// Install the OS watch, start monitoring, then seed every object.
    async fn start_root(&self, root: &Path, cancel: &CancellationToken) -> WatchResult<usize> {
        let aborted = || WatchError::RegistrationAborted {
            path: root.to_path_buf(),
        };

        let (tx, rx) = mpsc::channel(self.inner.config.event_buffer);
        let mut os_watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = tx.blocking_send(res);
        })?;
        os_watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| WatchError::PathWatchFailed {
                path: root.to_path_buf(),
                reason: e.to_string(),
            })?;

        if self.inner.roots.lock().attach(root, os_watcher).is_err() {
            return Err(aborted());
        }

        tokio::spawn(monitor(
            Arc::downgrade(&self.inner),
            root.to_path_buf(),
            rx,
            cancel.clone(),
        ));

        let handler = Arc::clone(&self.inner.handler);
        let walk_root = root.to_path_buf();
        let objects =
            tokio::task::spawn_blocking(move || collect_objects(&walk_root, handler.as_ref()))
                .await
            .map_err(|e| WatchError::WalkFailed {
                path: root.to_path_buf(),
                reason: e.to_string(),
            })??;

        let count = objects.len();
        for change in objects {
            if cancel.is_cancelled() {
                return Err(aborted());
            }
            self.inner.debouncer.run_now(change).await;
        }

        if !self.inner.roots.lock().activate(root) {
            return Err(aborted());
        }
        Ok(count)
    }

    async fn unregister_root(&self, root: &Path) -> WatchResult<()> {
        let entry = self
            .inner
            .roots
            .lock()
            .remove(root)
            .ok_or_else(|| WatchError::NotRegistered {
                path: root.to_path_buf(),
            })?;

        // Stop observing before touching indexed state
        entry.teardown();
        self.inner.debouncer.forget_under(root).await;

        if let Err(e) = self.inner.handler.remove_object(root).await {
            tracing::error!(
                "[{}] failed to remove objects under {}: {e:#}",
                self.inner.handler.name(),
                root.display()
            );
        }

        crate::log_event!("watcher", "unregistered", "{}", root.display());
        Ok(())
    }

    /// Unregister every root and stop all timers. A second call is a
    /// no-op; safe to call from inside a handler callback.
    pub async fn close(&self) -> WatchResult<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let roots = self.inner.roots.lock().paths();
        for root in roots {
            if let Err(e) = self.unregister_root(&root).await {
                crate::debug_event!("watcher", "close", "{e}");
            }
        }

        self.inner.debouncer.shutdown();
        self.inner.shutdown.cancel();
        crate::log_event!("watcher", "closed");
        Ok(())
    }
}

/// Builder for a [`Watcher`] with initial roots.
pub struct WatcherBuilder {
    handler: Arc<dyn ObjectHandler>,
    config: WatcherConfig,
    paths: Vec<PathBuf>,
}

impl WatcherBuilder {
    pub fn new(handler: Arc<dyn ObjectHandler>) -> Self {
        Self {
            handler,
            config: WatcherConfig::default(),
            paths: Vec::new(),
        }
    }

    pub fn config(mut self, config: WatcherConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the debounce duration in milliseconds.
    pub fn debounce_ms(mut self, ms: u64) -> Self {
        self.config.debounce = Duration::from_millis(ms);
        self
    }

    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.paths.push(path.into());
        self
    }

    pub fn paths<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.paths.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Create the watcher and register the initial roots. Nothing stays
    /// registered if any root fails.
    pub async fn build(self) -> WatchResult<Watcher> {
        let watcher = Watcher::new(self.handler, self.config);
        if let Err(e) = watcher.register_paths(&self.paths).await {
            watcher.close().await?;
            return Err(e);
        }
        Ok(watcher)
    }
}
