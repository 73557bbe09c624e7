//! Callbacks the watcher drives for each logical object.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

/// Collaborator injected into a [`Watcher`](super::Watcher).
///
/// The watcher filters raw paths with [`is_watchable`](Self::is_watchable),
/// maps them to object paths with
/// [`resolve_object_path`](Self::resolve_object_path), debounces per object
/// path and then calls exactly one of the update/remove callbacks. Calls
/// for the same object path never overlap.
#[async_trait]
pub trait ObjectHandler: Send + Sync {
    /// Handler name for logging.
    fn name(&self) -> &str {
        "watcher"
    }

    /// Whether events for this raw file path matter at all.
    fn is_watchable(&self, path: &Path) -> bool;

    /// Logical object a raw path belongs to. Identity by default.
    fn resolve_object_path(&self, path: &Path) -> PathBuf {
        path.to_path_buf()
    }

    /// The object was created or changed on disk: reload it.
    async fn update_object(&self, object_path: &Path) -> anyhow::Result<()>;

    /// The object, or everything below `object_path`, is gone.
    async fn remove_object(&self, object_path: &Path) -> anyhow::Result<()>;
}
