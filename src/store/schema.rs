//! Tantivy schema for the document store and conversion to and from it.

use std::path::{Component, Path, PathBuf};

use chrono::DateTime;
use tantivy::TantivyDocument;
use tantivy::schema::{
    Field, NumericOptions, STORED, STRING, Schema, SchemaBuilder, TEXT, Value,
};
use uuid::Uuid;

use super::document::IndexDocument;
use super::error::{StoreError, StoreResult};

/// Schema fields for the document index.
#[derive(Debug, Clone)]
pub struct StoreSchema {
    /// Primary key, exact.
    pub id: Field,

    /// `IndexType` discriminator, exact.
    pub kind: Field,

    /// Reference as given, exact.
    pub reference: Field,

    /// The reference plus each of its ancestors, for descendant matching.
    pub reference_path: Field,

    /// Low-cardinality scalars, tokenized with positions for phrase filters.
    pub name: Field,
    pub category: Field,
    pub state: Field,

    /// Multi-valued exact fields.
    pub resources: Field,
    pub operations: Field,

    /// Milliseconds since the epoch.
    pub date: Field,

    /// Opaque payload, stored only.
    pub data: Field,

    /// Catch-all for free-text search, not stored.
    pub search: Field,
}

impl StoreSchema {
    pub fn build() -> (Schema, Self) {
        let mut builder = SchemaBuilder::default();

        let id = builder.add_text_field("id", STRING | STORED);
        let kind = builder.add_text_field("type", STRING | STORED);
        let reference = builder.add_text_field("reference", STRING | STORED);
        let reference_path = builder.add_text_field("reference_path", STRING);

        let name = builder.add_text_field("name", TEXT | STORED);
        let category = builder.add_text_field("category", TEXT | STORED);
        let state = builder.add_text_field("state", TEXT | STORED);

        let resources = builder.add_text_field("resources", STRING | STORED);
        let operations = builder.add_text_field("operations", STRING | STORED);

        let date_options = NumericOptions::default()
            .set_indexed()
            .set_stored()
            .set_fast();
        let date = builder.add_i64_field("date", date_options);

        let data = builder.add_text_field("data", STORED);
        let search = builder.add_text_field("search", TEXT);

        let schema = builder.build();
        let fields = Self {
            id,
            kind,
            reference,
            reference_path,
            name,
            category,
            state,
            resources,
            operations,
            date,
            data,
            search,
        };

        (schema, fields)
    }

    pub fn to_document(&self, doc: &IndexDocument) -> TantivyDocument {
        let mut out = TantivyDocument::default();

        out.add_text(self.id, doc.id.to_string());
        out.add_text(self.kind, doc.kind.as_str());
        out.add_text(self.reference, &doc.reference);
        if !doc.reference.is_empty() {
            for ancestor in reference_ancestors(&doc.reference) {
                out.add_text(self.reference_path, ancestor);
            }
        }

        out.add_text(self.name, &doc.name);
        out.add_text(self.category, &doc.category);
        out.add_text(self.state, &doc.state);
        for resource in &doc.resources {
            out.add_text(self.resources, resource);
        }
        for operation in &doc.operations {
            out.add_text(self.operations, operation);
        }

        out.add_i64(self.date, doc.date.timestamp_millis());
        out.add_text(self.data, &doc.data);

        for text in [&doc.name, &doc.category, &doc.state, &doc.reference]
            .into_iter()
            .chain(&doc.resources)
        {
            if !text.is_empty() {
                out.add_text(self.search, text);
            }
        }

        out
    }

    pub fn from_document(&self, doc: &TantivyDocument) -> StoreResult<IndexDocument> {
        let text = |field: Field| -> String {
            doc.get_first(field)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };
        let texts = |field: Field| -> Vec<String> {
            doc.get_all(field)
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        };

        let raw_id = text(self.id);
        let id = Uuid::parse_str(&raw_id)
            .map_err(|e| StoreError::Corrupt(format!("id '{raw_id}': {e}")))?;
        let kind = text(self.kind).parse()?;

        let millis = doc
            .get_first(self.date)
            .and_then(|v| v.as_i64())
            .ok_or_else(|| StoreError::Corrupt(format!("document {id} has no date")))?;
        let date = DateTime::from_timestamp_millis(millis).ok_or_else(|| {
            StoreError::Corrupt(format!("document {id} date {millis} out of range"))
        })?;

        Ok(IndexDocument {
            id,
            kind,
            reference: text(self.reference),
            name: text(self.name),
            category: text(self.category),
            state: text(self.state),
            resources: texts(self.resources),
            operations: texts(self.operations),
            date,
            data: text(self.data),
        })
    }
}

/// Canonical form of a reference: redundant separators and `.` segments
/// removed, no trailing separator.
pub fn normalize_reference(reference: &str) -> String {
    let normalized: PathBuf = Path::new(reference)
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();
    normalized.to_string_lossy().into_owned()
}

/// The normalized reference followed by each of its ancestors.
pub fn reference_ancestors(reference: &str) -> Vec<String> {
    let normalized = normalize_reference(reference);
    Path::new(&normalized)
        .ancestors()
        .map(|p| p.to_string_lossy().into_owned())
        .filter(|p| !p.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::IndexType;

    #[test]
    fn test_schema_build() {
        let (schema, _fields) = StoreSchema::build();

        for name in [
            "id",
            "type",
            "reference",
            "reference_path",
            "name",
            "category",
            "state",
            "resources",
            "operations",
            "date",
            "data",
            "search",
        ] {
            assert!(schema.get_field(name).is_ok(), "missing field {name}");
        }
    }

    #[test]
    fn test_reference_ancestors() {
        assert_eq!(
            reference_ancestors("/srv/projects/proj1/"),
            vec!["/srv/projects/proj1", "/srv/projects", "/srv", "/"]
        );
        assert_eq!(reference_ancestors("domain/fps"), vec!["domain/fps", "domain"]);
        assert_eq!(normalize_reference("/a//b/./c"), "/a/b/c");
    }

    #[test]
    fn test_document_conversion_keeps_fields() {
        let (_, fields) = StoreSchema::build();
        let mut original = IndexDocument::new(Uuid::new_v4(), IndexType::Package)
            .with_reference("/packages/lights")
            .with_name("Studio Lights")
            .with_category("lighting")
            .with_state("installed")
            .with_resources(["/packages/lights/thumb.png"])
            .with_data(r#"{"version":"1.2"}"#);
        original.add_operation("op-7");

        let tantivy_doc = fields.to_document(&original);
        let restored = fields.from_document(&tantivy_doc).unwrap();
        assert_eq!(restored, original);
    }
}
