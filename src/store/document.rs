//! The unit of storage: a typed, filterable document with an opaque payload.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::StoreError;

/// Logical collection a document belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexType {
    #[default]
    Unknown,
    Project,
    Package,
    Operation,
    Metric,
}

impl IndexType {
    pub const ALL: [IndexType; 5] = [
        IndexType::Unknown,
        IndexType::Project,
        IndexType::Package,
        IndexType::Operation,
        IndexType::Metric,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IndexType::Unknown => "unknown",
            IndexType::Project => "project",
            IndexType::Package => "package",
            IndexType::Operation => "operation",
            IndexType::Metric => "metric",
        }
    }
}

impl fmt::Display for IndexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndexType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IndexType::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| StoreError::UnknownType(s.to_string()))
    }
}

/// A document held by the [`Store`](super::Store).
///
/// `data` is carried verbatim; the store never interprets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDocument {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: IndexType,
    /// Canonical path-like key used for lookups and bulk removal.
    pub reference: String,
    pub name: String,
    pub category: String,
    pub state: String,
    /// Auxiliary files served on behalf of this document (thumbnails etc.).
    pub resources: Vec<String>,
    /// Ids of long-running operations attached to this document.
    pub operations: Vec<String>,
    /// Indexed with millisecond precision.
    pub date: DateTime<Utc>,
    pub data: String,
}

impl IndexDocument {
    pub fn new(id: Uuid, kind: IndexType) -> Self {
        Self {
            id,
            kind,
            reference: String::new(),
            name: String::new(),
            category: String::new(),
            state: String::new(),
            resources: Vec::new(),
            operations: Vec::new(),
            date: Utc::now().trunc_subsecs(3),
            data: String::new(),
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = reference.into();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = state.into();
        self
    }

    pub fn with_resources<I, S>(mut self, resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resources = resources.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_date(mut self, date: DateTime<Utc>) -> Self {
        self.date = date.trunc_subsecs(3);
        self
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = data.into();
        self
    }

    /// Attach an operation id. Returns false if it was already attached.
    pub fn add_operation(&mut self, operation: impl Into<String>) -> bool {
        let operation = operation.into();
        if self.operations.contains(&operation) {
            return false;
        }
        self.operations.push(operation);
        true
    }

    /// Detach an operation id. Returns false if it was not attached.
    pub fn remove_operation(&mut self, operation: &str) -> bool {
        let before = self.operations.len();
        self.operations.retain(|op| op != operation);
        self.operations.len() != before
    }
}
