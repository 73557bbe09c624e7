//! Registered root directories and their lifecycle state.
//!
//! Roots never overlap: no root is an ancestor or descendant of another,
//! whatever state either is in.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

use super::error::{WatchError, WatchResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootState {
    /// Watch installed or being installed, initial walk in progress.
    Registering,
    Registered,
}

/// Resources owned by one root.
pub(crate) struct RootEntry {
    pub state: RootState,
    /// Stops the root's monitoring task.
    pub cancel: CancellationToken,
    /// OS watch; dropping it stops the watch.
    pub watcher: Option<notify::RecommendedWatcher>,
}

impl std::fmt::Debug for RootEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootEntry")
            .field("state", &self.state)
            .field("watching", &self.watcher.is_some())
            .finish()
    }
}

impl RootEntry {
    /// Stop monitoring and release the OS watch.
    pub fn teardown(mut self) {
        self.cancel.cancel();
        self.watcher.take();
    }
}

#[derive(Debug, Default)]
pub(crate) struct RootRegistry {
    roots: BTreeMap<PathBuf, RootEntry>,
}

impl RootRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// First live root that is `path`, an ancestor of it, or below it.
    pub fn overlapping(&self, path: &Path) -> Option<&Path> {
        self.roots
            .keys()
            .find(|root| path.starts_with(root) || root.starts_with(path))
            .map(PathBuf::as_path)
    }

    /// Claim `path` in [`RootState::Registering`].
    pub fn reserve(&mut self, path: &Path, cancel: CancellationToken) -> WatchResult<()> {
        if let Some(existing) = self.overlapping(path) {
            return Err(WatchError::Overlap {
                path: path.to_path_buf(),
                existing: existing.to_path_buf(),
            });
        }

        self.roots.insert(
            path.to_path_buf(),
            RootEntry {
                state: RootState::Registering,
                cancel,
                watcher: None,
            },
        );
        Ok(())
    }

    /// Hand the OS watch to a reserved root. Gives it back if the root was
    /// unregistered meanwhile.
    pub fn attach(
        &mut self,
        path: &Path,
        watcher: notify::RecommendedWatcher,
    ) -> Result<(), notify::RecommendedWatcher> {
        match self.roots.get_mut(path) {
            Some(entry) => {
                entry.watcher = Some(watcher);
                Ok(())
            }
            None => Err(watcher),
        }
    }

    /// Mark a reserved root as fully registered.
    pub fn activate(&mut self, path: &Path) -> bool {
        match self.roots.get_mut(path) {
            Some(entry) => {
                entry.state = RootState::Registered;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, path: &Path) -> Option<RootEntry> {
        self.roots.remove(path)
    }

    pub fn state(&self, path: &Path) -> Option<RootState> {
        self.roots.get(path).map(|entry| entry.state)
    }

    /// Whether `path` lies under some root, in any state.
    pub fn covers(&self, path: &Path) -> bool {
        self.roots.keys().any(|root| path.starts_with(root))
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.roots.keys().cloned().collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}
