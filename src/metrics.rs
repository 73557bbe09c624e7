//! Numeric samples stored as `metric` documents.
//!
//! A sample is keyed by `(domain, name)`: the domain becomes the
//! document's reference and the sample itself travels as JSON in `data`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::store::{IndexDocument, IndexType, ListOptions, Store, StoreError};

#[derive(Error, Debug)]
pub enum MetricError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Metric values must be finite, got {0}")]
    InvalidValue(f64),

    #[error("Document {0} is not a metric")]
    NotAMetric(Uuid),

    #[error("Malformed metric payload: {0}")]
    Payload(#[from] serde_json::Error),
}

pub type MetricResult<T> = Result<T, MetricError>;

/// One recorded sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub id: Uuid,
    pub domain: String,
    pub name: String,
    pub value: f64,
    pub recorded_at: DateTime<Utc>,
}

impl Metric {
    fn to_document(&self) -> MetricResult<IndexDocument> {
        Ok(IndexDocument::new(self.id, IndexType::Metric)
            .with_reference(self.domain.as_str())
            .with_name(self.name.as_str())
            .with_date(self.recorded_at)
            .with_data(serde_json::to_string(self)?))
    }

    fn from_document(doc: &IndexDocument) -> MetricResult<Self> {
        if doc.kind != IndexType::Metric {
            return Err(MetricError::NotAMetric(doc.id));
        }
        Ok(serde_json::from_str(&doc.data)?)
    }
}

/// Summary of the samples in one series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Aggregate {
    pub count: usize,
    pub sum: f64,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
}

impl Aggregate {
    fn of(values: &[f64]) -> Option<Self> {
        let (first, rest) = values.split_first()?;
        let (sum, min, max) = rest
            .iter()
            .fold((*first, *first, *first), |(sum, min, max), v| {
                (sum + v, min.min(*v), max.max(*v))
            });
        Some(Self {
            count: values.len(),
            sum,
            avg: sum / values.len() as f64,
            min,
            max,
        })
    }
}

/// Records and queries metric samples in a [`Store`].
pub struct MetricService {
    store: Arc<Store>,
    scope: CancellationToken,
}

impl MetricService {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            scope: CancellationToken::new(),
        }
    }

    pub fn with_scope(mut self, scope: CancellationToken) -> Self {
        self.scope = scope;
        self
    }

    /// Record a sample taken now.
    pub fn add(&self, domain: &str, name: &str, value: f64) -> MetricResult<Metric> {
        self.add_at(domain, name, value, Utc::now())
    }

    /// Record a sample taken at `recorded_at`.
    pub fn add_at(
        &self,
        domain: &str,
        name: &str,
        value: f64,
        recorded_at: DateTime<Utc>,
    ) -> MetricResult<Metric> {
        if !value.is_finite() {
            return Err(MetricError::InvalidValue(value));
        }

        let doc = IndexDocument::new(Uuid::new_v4(), IndexType::Metric).with_date(recorded_at);
        let metric = Metric {
            id: doc.id,
            domain: domain.to_string(),
            name: name.to_string(),
            value,
            recorded_at: doc.date,
        };
        self.store.insert(&self.scope, metric.to_document()?)?;
        Ok(metric)
    }

    pub fn get(&self, id: Uuid) -> MetricResult<Metric> {
        Metric::from_document(&self.store.get(&self.scope, id)?)
    }

    pub fn remove(&self, id: Uuid) -> MetricResult<()> {
        // Refuse to delete non-metric documents through this service
        self.get(id)?;
        self.store.remove(&self.scope, id)?;
        Ok(())
    }

    /// Samples of one series, oldest first, optionally within an
    /// inclusive time range.
    pub fn list(
        &self,
        domain: &str,
        name: &str,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> MetricResult<Vec<Metric>> {
        let mut options = ListOptions::new()
            .kind(IndexType::Metric)
            .reference(domain)
            .name(name);
        if let Some((start, end)) = range {
            options = options.date_range(start, end);
        }

        let total = self.store.count(&self.scope, &options)?;
        let docs = self.store.list(&self.scope, &options.size(total))?;

        // Reference and name filters also match descendants and phrases
        let mut metrics = docs
            .iter()
            .filter(|doc| doc.reference == domain && doc.name == name)
            .map(Metric::from_document)
            .collect::<MetricResult<Vec<_>>>()?;
        metrics.sort_by_key(|m| m.recorded_at);
        Ok(metrics)
    }

    /// Aggregate a series. `None` when fewer than `min_count` samples
    /// (and at least one) fall in the range.
    pub fn aggregate(
        &self,
        domain: &str,
        name: &str,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
        min_count: usize,
    ) -> MetricResult<Option<Aggregate>> {
        let values: Vec<f64> = self
            .list(domain, name, range)?
            .into_iter()
            .map(|m| m.value)
            .collect();

        if values.len() < min_count {
            return Ok(None);
        }
        Ok(Aggregate::of(&values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::dispatcher::Dispatcher;
    use chrono::Duration;

    fn service() -> (MetricService, Arc<Store>) {
        let store = Arc::new(Store::new(Dispatcher::new(), StoreConfig::default()).unwrap());
        (MetricService::new(store.clone()), store)
    }

    #[test]
    fn test_add_get_remove() {
        let (metrics, _) = service();
        let metric = metrics.add("render", "frame_ms", 16.5).unwrap();

        assert_eq!(metrics.get(metric.id).unwrap(), metric);
        metrics.remove(metric.id).unwrap();
        assert!(matches!(
            metrics.get(metric.id),
            Err(MetricError::Store(StoreError::NotFound(_)))
        ));
        assert!(matches!(
            metrics.add("render", "frame_ms", f64::NAN),
            Err(MetricError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_list_isolates_series() {
        let (metrics, _) = service();
        metrics.add("render", "frame_ms", 1.0).unwrap();
        metrics.add("render", "frame_ms", 2.0).unwrap();
        metrics.add("render", "frame", 3.0).unwrap();
        metrics.add("render/gpu", "frame_ms", 4.0).unwrap();
        metrics.add("upload", "frame_ms", 5.0).unwrap();

        let values: Vec<f64> = metrics
            .list("render", "frame_ms", None)
            .unwrap()
            .iter()
            .map(|m| m.value)
            .collect();
        assert_eq!(values, vec![1.0, 2.0]);
    }

    #[test]
    fn test_aggregate() {
        let (metrics, _) = service();
        let t0 = Utc::now() - Duration::hours(1);
        for (i, value) in [4.0, 1.0, 7.0].into_iter().enumerate() {
            metrics
                .add_at("render", "frame_ms", value, t0 + Duration::minutes(i as i64))
                .unwrap();
        }

        let all = metrics.aggregate("render", "frame_ms", None, 1).unwrap().unwrap();
        assert_eq!(all.count, 3);
        assert_eq!(all.sum, 12.0);
        assert_eq!(all.avg, 4.0);
        assert_eq!(all.min, 1.0);
        assert_eq!(all.max, 7.0);

        let early = metrics
            .aggregate("render", "frame_ms", Some((t0, t0 + Duration::minutes(1))), 1)
            .unwrap()
            .unwrap();
        assert_eq!(early.count, 2);
        assert_eq!(early.max, 4.0);

        assert!(metrics.aggregate("render", "frame_ms", None, 4).unwrap().is_none());
        assert!(metrics.aggregate("render", "missing", None, 0).unwrap().is_none());
    }

    #[test]
    fn test_remove_refuses_other_documents() {
        let (metrics, store) = service();
        let doc = IndexDocument::new(Uuid::new_v4(), IndexType::Project).with_reference("/p");
        store.insert(&CancellationToken::new(), doc.clone()).unwrap();

        assert!(matches!(metrics.remove(doc.id), Err(MetricError::NotAMetric(_))));
        assert!(store.get(&CancellationToken::new(), doc.id).is_ok());
    }
}
