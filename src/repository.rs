//! Watcher handlers that keep the store in sync with files on disk.
//!
//! An [`IndexRepository`] connects a [`Watcher`](crate::watcher::Watcher)
//! to a [`Store`]: every debounced update reloads the object through a
//! [`DocumentLoader`] and upserts it, every removal drops all documents
//! referenced at or below the object path.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::store::{IndexDocument, IndexType, Store};
use crate::watcher::{ObjectHandler, ObjectResolver, WatchFilter};

/// Image extensions published as a project's resources.
const RESOURCE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp"];

/// Builds the document for one object path.
#[async_trait]
pub trait DocumentLoader: Send + Sync {
    async fn load(&self, object_path: &Path) -> anyhow::Result<IndexDocument>;
}

/// Stable document id for an object path.
pub fn object_id(object_path: &Path) -> Uuid {
    Uuid::new_v5(
        &Uuid::NAMESPACE_URL,
        object_path.to_string_lossy().as_bytes(),
    )
}

/// [`ObjectHandler`] that mirrors objects into a [`Store`].
pub struct IndexRepository<L> {
    name: String,
    store: Arc<Store>,
    loader: L,
    filter: WatchFilter,
    resolver: ObjectResolver,
    scope: CancellationToken,
}

impl<L: DocumentLoader> IndexRepository<L> {
    pub fn new(
        store: Arc<Store>,
        loader: L,
        filter: WatchFilter,
        resolver: ObjectResolver,
    ) -> Self {
        Self {
            name: "repository".to_string(),
            store,
            loader,
            filter,
            resolver,
            scope: CancellationToken::new(),
        }
    }

    /// Name used in log lines.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Token passed to every store call; cancelling it makes all further
    /// updates fail.
    pub fn with_scope(mut self, scope: CancellationToken) -> Self {
        self.scope = scope;
        self
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }
}

impl IndexRepository<ManifestLoader> {
    /// Repository for directories marked by `file_name`.
    pub fn projects(store: Arc<Store>, file_name: impl Into<String>) -> Self {
        let file_name = file_name.into();
        Self::new(
            store,
            ManifestLoader::new(file_name.clone()),
            WatchFilter::FileName(file_name),
            ObjectResolver::Parent,
        )
        .with_name("projects")
    }
}

#[async_trait]
impl<L: DocumentLoader> ObjectHandler for IndexRepository<L> {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_watchable(&self, path: &Path) -> bool {
        self.filter.matches(path)
    }

    fn resolve_object_path(&self, path: &Path) -> PathBuf {
        self.resolver.resolve(path)
    }

    async fn update_object(&self, object_path: &Path) -> anyhow::Result<()> {
        let doc = self
            .loader
            .load(object_path)
            .await
            .with_context(|| format!("failed to load {}", object_path.display()))?;
        self.store.insert(&self.scope, doc)?;
        Ok(())
    }

    async fn remove_object(&self, object_path: &Path) -> anyhow::Result<()> {
        match self
            .store
            .remove_by_reference(&self.scope, &object_path.to_string_lossy())
        {
            Ok(removed) => {
                crate::debug_event!(
                    self.name,
                    "dropped",
                    "{removed} under {}",
                    object_path.display()
                );
                Ok(())
            }
            // Nothing indexed there, e.g. a directory without a manifest
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Loads a directory described by a manifest file.
///
/// The document's `data` is the raw manifest text; its resources are the
/// image files next to the manifest.
#[derive(Debug, Clone)]
pub struct ManifestLoader {
    file_name: String,
    kind: IndexType,
}

impl ManifestLoader {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            kind: IndexType::Project,
        }
    }

    pub fn with_kind(mut self, kind: IndexType) -> Self {
        self.kind = kind;
        self
    }

    async fn resources(dir: &Path) -> anyhow::Result<Vec<String>> {
        let mut resources = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_image = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| RESOURCE_EXTENSIONS.iter().any(|e| e.eq_ignore_ascii_case(ext)));
            if is_image && entry.file_type().await?.is_file() {
                resources.push(path.to_string_lossy().into_owned());
            }
        }
        resources.sort();
        Ok(resources)
    }
}

#[async_trait]
impl DocumentLoader for ManifestLoader {
    async fn load(&self, object_path: &Path) -> anyhow::Result<IndexDocument> {
        let manifest = object_path.join(&self.file_name);
        let data = tokio::fs::read_to_string(&manifest)
            .await
            .with_context(|| format!("cannot read {}", manifest.display()))?;

        let modified: Option<DateTime<Utc>> = tokio::fs::metadata(&manifest)
            .await
            .and_then(|meta| meta.modified())
            .ok()
            .map(DateTime::from);

        let name = object_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut doc = IndexDocument::new(object_id(object_path), self.kind)
            .with_reference(object_path.to_string_lossy())
            .with_name(name)
            .with_resources(Self::resources(object_path).await?)
            .with_data(data);
        if let Some(modified) = modified {
            doc = doc.with_date(modified);
        }
        Ok(doc)
    }
}
