use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rocketdesk::config::StoreConfig;
use rocketdesk::repository::{DocumentLoader, ManifestLoader};
use rocketdesk::watcher::{ObjectResolver, WatchError, WatchFilter};
use rocketdesk::{
    Dispatcher, IndexDocument, IndexRepository, IndexType, ListOptions, MetricService,
    ObjectHandler, Store, Watcher, WatcherConfig,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const MANIFEST: &str = "rocketfile.yaml";

fn new_store() -> Arc<Store> {
    Arc::new(Store::new(Dispatcher::new(), StoreConfig::default()).unwrap())
}

fn fast() -> WatcherConfig {
    WatcherConfig {
        debounce: Duration::from_millis(100),
        ..WatcherConfig::default()
    }
}

/// Canonical temp root, so paths match what the OS reports.
fn temp_root() -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let root = dir.path().canonicalize().unwrap();
    (dir, root)
}

fn write_project(root: &Path, name: &str, body: &str) -> PathBuf {
    let project = root.join(name);
    std::fs::create_dir_all(&project).unwrap();
    std::fs::write(project.join(MANIFEST), body).unwrap();
    project
}

async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    condition()
}

fn references(store: &Store) -> Vec<String> {
    let scope = CancellationToken::new();
    let mut refs: Vec<String> = store
        .list(&scope, &ListOptions::new())
        .unwrap()
        .into_iter()
        .map(|doc| doc.reference)
        .collect();
    refs.sort();
    refs
}

#[tokio::test]
async fn test_project_lifecycle_follows_disk() {
    let (_dir, root) = temp_root();
    let proj1 = write_project(&root, "proj1", "title: one\n");
    let store = new_store();

    let repository = IndexRepository::projects(store.clone(), MANIFEST);
    let watcher = Watcher::builder(Arc::new(repository))
        .config(fast())
        .path(&root)
        .build()
        .await
        .unwrap();

    // Seeded synchronously by registration
    assert_eq!(references(&store), vec![proj1.to_string_lossy().into_owned()]);

    let proj2 = write_project(&root, "proj2", "title: two\n");
    assert!(wait_until(|| references(&store).len() == 2).await);

    std::fs::remove_file(proj1.join(MANIFEST)).unwrap();
    assert!(wait_until(|| references(&store) == vec![proj2.to_string_lossy().into_owned()]).await);

    watcher.close().await.unwrap();
    watcher.close().await.unwrap();
    assert!(references(&store).is_empty());
}

#[tokio::test]
async fn test_unregister_removes_and_stops_indexing() {
    let (_dir, root) = temp_root();
    let a = root.join("a");
    let b = root.join("b");
    write_project(&a, "proj1", "x");
    write_project(&b, "proj2", "y");
    let store = new_store();

    let watcher = Watcher::new(
        Arc::new(IndexRepository::projects(store.clone(), MANIFEST)),
        fast(),
    );
    watcher.set_paths([&a, &b]).await.unwrap();
    assert_eq!(references(&store).len(), 2);

    watcher.set_paths([&b]).await.unwrap();
    assert_eq!(references(&store), vec![b.join("proj2").to_string_lossy().into_owned()]);

    // Changes under a dropped root never come back
    write_project(&a, "proj3", "z");
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(references(&store).len(), 1);

    watcher.close().await.unwrap();
}

#[tokio::test]
async fn test_nested_root_rejected() {
    let (_dir, root) = temp_root();
    let project = write_project(&root, "proj1", "x");
    let store = new_store();
    let watcher = Watcher::new(
        Arc::new(IndexRepository::projects(store.clone(), MANIFEST)),
        fast(),
    );
    watcher.register_paths([&root]).await.unwrap();
    let before = references(&store);

    let err = watcher.register_paths([&project]).await.unwrap_err();
    assert!(matches!(err, WatchError::Overlap { .. }));
    assert_eq!(watcher.registered_paths(), vec![root.clone()]);
    assert_eq!(references(&store), before);

    watcher.close().await.unwrap();
}

/// Counts loads and records the manifest text each load saw.
struct CountingLoader {
    inner: ManifestLoader,
    loads: Arc<AtomicUsize>,
}

#[async_trait]
impl DocumentLoader for CountingLoader {
    async fn load(&self, object_path: &Path) -> anyhow::Result<IndexDocument> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.inner.load(object_path).await
    }
}

#[tokio::test]
async fn test_burst_of_writes_reloads_once_with_latest_content() {
    let (_dir, root) = temp_root();
    let project = write_project(&root, "proj1", "version: 0\n");
    let store = new_store();
    let loads = Arc::new(AtomicUsize::new(0));

    let repository = IndexRepository::new(
        store.clone(),
        CountingLoader {
            inner: ManifestLoader::new(MANIFEST),
            loads: loads.clone(),
        },
        WatchFilter::FileName(MANIFEST.to_string()),
        ObjectResolver::Parent,
    );
    let watcher = Watcher::new(
        Arc::new(repository),
        WatcherConfig {
            debounce: Duration::from_millis(400),
            ..WatcherConfig::default()
        },
    );
    watcher.register_paths([&root]).await.unwrap();
    assert_eq!(loads.load(Ordering::SeqCst), 1);

    for version in 1..=5 {
        std::fs::write(project.join(MANIFEST), format!("version: {version}\n")).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let scope = CancellationToken::new();
    assert!(
        wait_until(|| {
            store
                .list(&scope, &ListOptions::new())
                .unwrap()
                .first()
                .is_some_and(|doc| doc.data == "version: 5\n")
        })
        .await
    );
    // Let any straggling timer fire before counting
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(loads.load(Ordering::SeqCst), 2);

    watcher.close().await.unwrap();
}

#[tokio::test]
async fn test_type_filter_isolates_metrics() {
    let store = new_store();
    let scope = CancellationToken::new();
    let metric = MetricService::new(store.clone())
        .add("render", "frame_ms", 5.0)
        .unwrap();
    store
        .insert(
            &scope,
            IndexDocument::new(Uuid::new_v4(), IndexType::Project).with_reference("/p/proj1"),
        )
        .unwrap();

    let metrics = store
        .list(&scope, &ListOptions::new().kind(IndexType::Metric))
        .unwrap();
    assert_eq!(metrics.len(), 1);
    assert_eq!(metrics[0].id, metric.id);
}

/// Handler that never indexes anything, to check watchability filtering.
struct Nothing;

#[async_trait]
impl ObjectHandler for Nothing {
    fn is_watchable(&self, _: &Path) -> bool {
        false
    }

    async fn update_object(&self, _: &Path) -> anyhow::Result<()> {
        anyhow::bail!("should not be called")
    }

    async fn remove_object(&self, _: &Path) -> anyhow::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_unwatchable_files_are_ignored() {
    let (_dir, root) = temp_root();
    write_project(&root, "proj1", "x");
    let watcher = Watcher::new(Arc::new(Nothing), fast());
    watcher.register_paths([&root]).await.unwrap();
    assert_eq!(watcher.registered_paths(), vec![root]);
    watcher.close().await.unwrap();
}
