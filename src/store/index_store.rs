//! In-memory document index that publishes its mutations.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tantivy::collector::{Count, DocSetCollector, TopDocs};
use tantivy::query::{Query, TermQuery};
use tantivy::schema::IndexRecordOption;
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::document::{IndexDocument, IndexType};
use super::error::{StoreError, StoreResult};
use super::query::{ListOptions, QueryBuilder};
use super::schema::{StoreSchema, normalize_reference};
use crate::config::StoreConfig;
use crate::dispatcher::Dispatcher;
use crate::events::{STORE_INSERT_CHANNEL, STORE_REMOVE_CHANNEL, StoreEvent};

/// Typed, queryable document index held in RAM.
///
/// Writes are serialized through the writer and committed one operation
/// at a time; reads use point-in-time searchers and never block writes.
/// Safe to share behind an `Arc`.
pub struct Store {
    index: Index,
    reader: IndexReader,
    fields: StoreSchema,
    /// `None` once closed.
    writer: Mutex<Option<IndexWriter<TantivyDocument>>>,
    closed: AtomicBool,
    dispatcher: Dispatcher,
    config: StoreConfig,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("documents", &self.reader.searcher().num_docs())
            .field("closed", &self.closed.load(Ordering::Acquire))
            .field("config", &self.config)
            .finish()
    }
}

impl Store {
    /// Create an empty store publishing on `dispatcher`.
    pub fn new(dispatcher: Dispatcher, config: StoreConfig) -> StoreResult<Self> {
        let (schema, fields) = StoreSchema::build();
        let index = Index::create_in_ram(schema);

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        let writer = index.writer_with_num_threads(1, config.writer_memory_bytes)?;

        Ok(Self {
            index,
            reader,
            fields,
            writer: Mutex::new(Some(writer)),
            closed: AtomicBool::new(false),
            dispatcher,
            config,
        })
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    fn check(&self, scope: &CancellationToken) -> StoreResult<()> {
        if scope.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    fn id_term(&self, id: &Uuid) -> Term {
        Term::from_field_text(self.fields.id, &id.to_string())
    }

    fn find(&self, id: &Uuid) -> StoreResult<Option<IndexDocument>> {
        let searcher = self.reader.searcher();
        let query = TermQuery::new(self.id_term(id), IndexRecordOption::Basic);
        let hits = searcher.search(&query, &TopDocs::with_limit(1))?;

        match hits.first() {
            Some((_, address)) => {
                let doc: TantivyDocument = searcher.doc(*address)?;
                Ok(Some(self.fields.from_document(&doc)?))
            }
            None => Ok(None),
        }
    }

    /// Commit pending writes and make them visible to searchers.
    fn commit(&self, writer: &mut IndexWriter<TantivyDocument>) -> StoreResult<()> {
        writer.commit()?;
        self.reader.reload()?;
        Ok(())
    }

    fn notify(&self, scope: &CancellationToken, channel: &str, id: Uuid, kind: IndexType) {
        let mut args = crate::args![StoreEvent::new(id, kind)];
        if let Err(e) = self.dispatcher.emit(scope, channel, &mut args) {
            // The write already succeeded; delivery is best-effort
            tracing::warn!("[store] failed to publish {channel} for {id}: {e}");
        }
    }

    /// Upsert `doc` by id.
    ///
    /// Publishes on [`STORE_INSERT_CHANNEL`] when a document with the same
    /// id existed before, or on every insert when `notify_on_create` is set.
    pub fn insert(&self, scope: &CancellationToken, doc: IndexDocument) -> StoreResult<()> {
        self.check(scope)?;

        let existed = {
            let mut guard = self.writer.lock();
            let writer = guard.as_mut().ok_or(StoreError::Closed)?;

            let existed = self.find(&doc.id)?.is_some();
            writer.delete_term(self.id_term(&doc.id));
            writer.add_document(self.fields.to_document(&doc))?;
            self.commit(writer)?;
            existed
        };

        crate::debug_event!(
            "store",
            if existed { "updated" } else { "created" },
            "{} {} '{}'",
            doc.kind,
            doc.id,
            doc.reference
        );

        if existed || self.config.notify_on_create {
            self.notify(scope, STORE_INSERT_CHANNEL, doc.id, doc.kind);
        }
        Ok(())
    }

    /// Delete one document and publish on [`STORE_REMOVE_CHANNEL`].
    pub fn remove(&self, scope: &CancellationToken, id: Uuid) -> StoreResult<()> {
        self.check(scope)?;

        let kind = {
            let mut guard = self.writer.lock();
            let writer = guard.as_mut().ok_or(StoreError::Closed)?;

            let doc = self.find(&id)?.ok_or(StoreError::NotFound(id))?;
            writer.delete_term(self.id_term(&id));
            self.commit(writer)?;
            doc.kind
        };

        crate::debug_event!("store", "removed", "{kind} {id}");
        self.notify(scope, STORE_REMOVE_CHANNEL, id, kind);
        Ok(())
    }

    /// Delete every document whose reference is `reference` or lies below
    /// it. Each deletion is published individually.
    ///
    /// Returns the number of documents removed.
    pub fn remove_by_reference(
        &self,
        scope: &CancellationToken,
        reference: &str,
    ) -> StoreResult<usize> {
        self.check(scope)?;

        let normalized = normalize_reference(reference);
        let removed = {
            let mut guard = self.writer.lock();
            let writer = guard.as_mut().ok_or(StoreError::Closed)?;

            let searcher = self.reader.searcher();
            let query = TermQuery::new(
                Term::from_field_text(self.fields.reference_path, &normalized),
                IndexRecordOption::Basic,
            );
            let addresses = searcher.search(&query, &DocSetCollector)?;
            if addresses.is_empty() {
                return Err(StoreError::ReferenceNotFound(reference.to_string()));
            }

            let mut removed = Vec::with_capacity(addresses.len());
            for address in addresses {
                let doc: TantivyDocument = searcher.doc(address)?;
                let doc = self.fields.from_document(&doc)?;
                writer.delete_term(self.id_term(&doc.id));
                removed.push((doc.id, doc.kind));
            }
            self.commit(writer)?;
            removed
        };

        crate::debug_event!("store", "removed", "{} under '{normalized}'", removed.len());
        for (id, kind) in &removed {
            self.notify(scope, STORE_REMOVE_CHANNEL, *id, *kind);
        }
        Ok(removed.len())
    }

    /// Fetch one document by id.
    pub fn get(&self, scope: &CancellationToken, id: Uuid) -> StoreResult<IndexDocument> {
        self.check(scope)?;
        self.find(&id)?.ok_or(StoreError::NotFound(id))
    }

    /// Documents matching `options`, in relevance order.
    pub fn list(
        &self,
        scope: &CancellationToken,
        options: &ListOptions,
    ) -> StoreResult<Vec<IndexDocument>> {
        self.check(scope)?;

        let size = options.size.unwrap_or(self.config.default_page_size);
        if size == 0 {
            return Ok(Vec::new());
        }

        let query = self.build_query(options)?;
        let searcher = self.reader.searcher();

        // Collector buffers are sized from the limit, so clamp it to the index
        let num_docs = usize::try_from(searcher.num_docs()).unwrap_or(usize::MAX);
        if options.from >= num_docs {
            return Ok(Vec::new());
        }
        let limit = size.min(num_docs - options.from);
        let hits = searcher.search(&query, &TopDocs::with_limit(limit).and_offset(options.from))?;

        hits.into_iter()
            .map(|(_, address)| {
                let doc: TantivyDocument = searcher.doc(address)?;
                self.fields.from_document(&doc)
            })
            .collect()
    }

    /// Number of documents matching `options`, ignoring pagination.
    pub fn count(&self, scope: &CancellationToken, options: &ListOptions) -> StoreResult<usize> {
        self.check(scope)?;
        let query = self.build_query(options)?;
        Ok(self.reader.searcher().search(&query, &Count)?)
    }

    /// Whether `path` is a resource of some indexed document.
    pub fn is_resource_indexed(&self, scope: &CancellationToken, path: &str) -> StoreResult<bool> {
        if path.is_empty() {
            return Ok(false);
        }
        Ok(self.count(scope, &ListOptions::new().resource(path))? > 0)
    }

    fn build_query(&self, options: &ListOptions) -> StoreResult<Box<dyn Query>> {
        QueryBuilder::new(&self.index, &self.fields, self.config.fuzziness).build(options)
    }

    /// Release the writer. Later operations fail with [`StoreError::Closed`];
    /// closing twice is a no-op.
    pub fn close(&self) -> StoreResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let writer = self.writer.lock().take();
        if let Some(writer) = writer {
            writer.wait_merging_threads()?;
        }
        crate::log_event!("store", "closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::Event;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    fn store() -> Store {
        Store::new(Dispatcher::new(), StoreConfig::default()).unwrap()
    }

    fn project(reference: &str) -> IndexDocument {
        IndexDocument::new(Uuid::new_v4(), IndexType::Project)
            .with_reference(reference)
            .with_name(reference.rsplit('/').next().unwrap_or_default())
    }

    fn counter(store: &Store, scope: &CancellationToken, channel: &str) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        store
            .dispatcher()
            .subscribe(
                scope,
                channel,
                move |_: &mut StoreEvent| -> anyhow::Result<()> {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
                0,
            )
            .unwrap();
        count
    }

    #[test]
    fn test_insert_is_upsert() {
        let store = store();
        let scope = CancellationToken::new();
        let doc = project("/p/one").with_state("draft");
        let id = doc.id;

        store.insert(&scope, doc.clone()).unwrap();
        store.insert(&scope, doc.with_state("ready")).unwrap();

        assert_eq!(store.count(&scope, &ListOptions::new()).unwrap(), 1);
        assert_eq!(store.get(&scope, id).unwrap().state, "ready");
    }

    #[test]
    fn test_insert_event_only_on_update() {
        let store = store();
        let scope = CancellationToken::new();
        let inserts = counter(&store, &scope, STORE_INSERT_CHANNEL);

        let doc = project("/p/one");
        store.insert(&scope, doc.clone()).unwrap();
        assert_eq!(inserts.load(Ordering::SeqCst), 0);

        store.insert(&scope, doc).unwrap();
        assert_eq!(inserts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_notify_on_create() {
        let config = StoreConfig {
            notify_on_create: true,
            ..StoreConfig::default()
        };
        let store = Store::new(Dispatcher::new(), config).unwrap();
        let scope = CancellationToken::new();
        let inserts = counter(&store, &scope, STORE_INSERT_CHANNEL);

        store.insert(&scope, project("/p/one")).unwrap();
        assert_eq!(inserts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remove_publishes_kind() {
        let store = store();
        let scope = CancellationToken::new();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let sink = seen.clone();
        store
            .dispatcher()
            .subscribe(
                &scope,
                STORE_REMOVE_CHANNEL,
                move |event: &mut StoreEvent| -> anyhow::Result<()> {
                    sink.lock().push((event.id, event.kind));
                    Ok(())
                },
                0,
            )
            .unwrap();

        let doc = IndexDocument::new(Uuid::new_v4(), IndexType::Package);
        let id = doc.id;
        store.insert(&scope, doc).unwrap();
        store.remove(&scope, id).unwrap();

        assert_eq!(*seen.lock(), vec![(id, IndexType::Package)]);
        assert!(matches!(store.get(&scope, id), Err(StoreError::NotFound(_))));
        assert!(store.remove(&scope, id).unwrap_err().is_not_found());
    }

    #[test]
    fn test_remove_by_reference_covers_descendants() {
        let store = store();
        let scope = CancellationToken::new();
        let removes = counter(&store, &scope, STORE_REMOVE_CHANNEL);

        store.insert(&scope, project("/root/a")).unwrap();
        store.insert(&scope, project("/root/a/nested")).unwrap();
        store.insert(&scope, project("/root/ab")).unwrap();
        store.insert(&scope, project("/other")).unwrap();

        assert_eq!(store.remove_by_reference(&scope, "/root/a/").unwrap(), 2);
        assert_eq!(removes.load(Ordering::SeqCst), 2);

        let left = store.list(&scope, &ListOptions::new()).unwrap();
        let mut refs: Vec<_> = left.iter().map(|d| d.reference.as_str()).collect();
        refs.sort();
        assert_eq!(refs, vec!["/other", "/root/ab"]);

        assert!(matches!(
            store.remove_by_reference(&scope, "/root/a"),
            Err(StoreError::ReferenceNotFound(_))
        ));
    }

    #[test]
    fn test_list_filters_by_type() {
        let store = store();
        let scope = CancellationToken::new();

        let metric = IndexDocument::new(Uuid::new_v4(), IndexType::Metric)
            .with_reference("render")
            .with_name("fps")
            .with_data(r#"{"value":5}"#);
        let metric_id = metric.id;
        store.insert(&scope, metric).unwrap();
        store.insert(&scope, project("/p/one")).unwrap();

        let metrics = store
            .list(&scope, &ListOptions::new().kind(IndexType::Metric))
            .unwrap();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].id, metric_id);
        assert_eq!(metrics[0].data, r#"{"value":5}"#);
    }

    #[test]
    fn test_list_phrase_and_exact_filters() {
        let store = store();
        let scope = CancellationToken::new();

        let mut lights = IndexDocument::new(Uuid::new_v4(), IndexType::Package)
            .with_name("Studio Lights Pro")
            .with_category("lighting")
            .with_state("installed")
            .with_resources(["/pkg/lights/thumb.png"]);
        lights.add_operation("op-42");
        let props = IndexDocument::new(Uuid::new_v4(), IndexType::Package)
            .with_name("Lights Studio")
            .with_category("props")
            .with_state("available");
        store.insert(&scope, lights.clone()).unwrap();
        store.insert(&scope, props).unwrap();

        let ids = |options: ListOptions| -> Vec<Uuid> {
            store
                .list(&scope, &options)
                .unwrap()
                .into_iter()
                .map(|d| d.id)
                .collect()
        };

        assert_eq!(ids(ListOptions::new().name("studio lights")), vec![lights.id]);
        assert_eq!(ids(ListOptions::new().category("lighting")), vec![lights.id]);
        assert_eq!(ids(ListOptions::new().state("installed")), vec![lights.id]);
        assert_eq!(ids(ListOptions::new().operation("op-42")), vec![lights.id]);
        assert_eq!(ids(ListOptions::new().resource("/pkg/lights/thumb.png")), vec![lights.id]);
        assert!(ids(ListOptions::new().resource("/pkg/lights")).is_empty());
        assert_eq!(ids(ListOptions::new().name("lights")).len(), 2);
        assert!(ids(ListOptions::new().name("lights").state("missing")).is_empty());
    }

    #[test]
    fn test_list_free_text_fuzzy_and_substring() {
        let store = store();
        let scope = CancellationToken::new();

        let car = IndexDocument::new(Uuid::new_v4(), IndexType::Project).with_name("spaceship");
        let tree = IndexDocument::new(Uuid::new_v4(), IndexType::Project).with_name("oaktree");
        store.insert(&scope, car.clone()).unwrap();
        store.insert(&scope, tree).unwrap();

        // Substring
        let hits = store.list(&scope, &ListOptions::new().query("aceshi")).unwrap();
        assert_eq!(hits.iter().map(|d| d.id).collect::<Vec<_>>(), vec![car.id]);

        // Typo within edit distance
        let hits = store.list(&scope, &ListOptions::new().query("spaseship")).unwrap();
        assert_eq!(hits.iter().map(|d| d.id).collect::<Vec<_>>(), vec![car.id]);

        // No free text means everything
        assert_eq!(store.list(&scope, &ListOptions::new()).unwrap().len(), 2);
    }

    #[test]
    fn test_list_date_range_inclusive() {
        let store = store();
        let scope = CancellationToken::new();
        let base = chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap();

        for hours in 0..5 {
            let doc = IndexDocument::new(Uuid::new_v4(), IndexType::Metric)
                .with_date(base + chrono::Duration::hours(hours));
            store.insert(&scope, doc).unwrap();
        }

        let options = ListOptions::new().date_range(
            base + chrono::Duration::hours(1),
            base + chrono::Duration::hours(3),
        );
        assert_eq!(store.count(&scope, &options).unwrap(), 3);
    }

    #[test]
    fn test_list_pagination() {
        let store = store();
        let scope = CancellationToken::new();
        for i in 0..7 {
            store.insert(&scope, project(&format!("/p/{i}"))).unwrap();
        }

        let first = store.list(&scope, &ListOptions::new().size(5)).unwrap();
        let rest = store.list(&scope, &ListOptions::new().size(5).offset(5)).unwrap();
        assert_eq!(first.len(), 5);
        assert_eq!(rest.len(), 2);
        assert!(store.list(&scope, &ListOptions::new().size(0)).unwrap().is_empty());

        let mut all: Vec<Uuid> = first.iter().chain(&rest).map(|d| d.id).collect();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 7);
    }

    #[test]
    fn test_list_huge_page_values() {
        let store = store();
        let scope = CancellationToken::new();
        let doc = project("/p/only");
        store.insert(&scope, doc.clone()).unwrap();

        let all = store.list(&scope, &ListOptions::new().size(usize::MAX)).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, doc.id);

        let big = store.list(&scope, &ListOptions::new().size(1_000_000_000)).unwrap();
        assert_eq!(big.len(), 1);

        let past_end = ListOptions::new().size(10).offset(usize::MAX);
        assert!(store.list(&scope, &past_end).unwrap().is_empty());
        let both = ListOptions::new().size(usize::MAX).offset(usize::MAX);
        assert!(store.list(&scope, &both).unwrap().is_empty());
        assert!(store.list(&scope, &ListOptions::new().offset(1)).unwrap().is_empty());
    }

    #[test]
    fn test_resource_check() {
        let store = store();
        let scope = CancellationToken::new();
        store
            .insert(
                &scope,
                project("/p/one").with_resources(["/p/one/cover.jpg"]),
            )
            .unwrap();

        assert!(store.is_resource_indexed(&scope, "/p/one/cover.jpg").unwrap());
        assert!(!store.is_resource_indexed(&scope, "/p/one/secret.txt").unwrap());
        assert!(!store.is_resource_indexed(&scope, "").unwrap());
    }

    #[test]
    fn test_cancelled_scope_writes_nothing() {
        let store = store();
        let scope = CancellationToken::new();
        let dead = CancellationToken::new();
        dead.cancel();

        assert!(store.insert(&dead, project("/p/one")).unwrap_err().is_cancelled());
        assert_eq!(store.count(&scope, &ListOptions::new()).unwrap(), 0);
    }

    #[test]
    fn test_listener_failure_does_not_undo_write() {
        let store = store();
        let scope = CancellationToken::new();
        store
            .dispatcher()
            .subscribe(
                &scope,
                STORE_INSERT_CHANNEL,
                |event: &mut StoreEvent| -> anyhow::Result<()> {
                    event.stop_propagation();
                    anyhow::bail!("consumer offline")
                },
                0,
            )
            .unwrap();

        let doc = project("/p/one");
        store.insert(&scope, doc.clone()).unwrap();
        store.insert(&scope, doc.clone().with_state("changed")).unwrap();
        assert_eq!(store.get(&scope, doc.id).unwrap().state, "changed");
    }

    #[test]
    fn test_close_is_final_and_idempotent() {
        let store = store();
        let scope = CancellationToken::new();
        let doc = project("/p/one");
        store.insert(&scope, doc.clone()).unwrap();

        store.close().unwrap();
        store.close().unwrap();

        assert!(matches!(store.get(&scope, doc.id), Err(StoreError::Closed)));
        assert!(matches!(store.insert(&scope, doc), Err(StoreError::Closed)));
        assert!(matches!(
            store.list(&scope, &ListOptions::new()),
            Err(StoreError::Closed)
        ));
    }

    #[test]
    fn test_listener_may_read_store() {
        let store = Arc::new(store());
        let scope = CancellationToken::new();
        let names = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let reader = Arc::downgrade(&store);
        let sink = names.clone();
        let inner_scope = scope.clone();
        store
            .dispatcher()
            .subscribe(
                &scope,
                STORE_INSERT_CHANNEL,
                move |event: &mut StoreEvent| -> anyhow::Result<()> {
                    if let Some(store) = reader.upgrade() {
                        let doc = store.get(&inner_scope, event.id)?;
                        sink.lock().push(doc.name);
                    }
                    Ok(())
                },
                0,
            )
            .unwrap();

        let doc = project("/p/alpha");
        store.insert(&scope, doc.clone()).unwrap();
        store.insert(&scope, doc.with_name("beta")).unwrap();
        assert_eq!(*names.lock(), vec!["beta"]);
    }
}
