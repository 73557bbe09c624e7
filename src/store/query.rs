//! List options and their translation into a tantivy query.

use std::ops::Bound;

use chrono::{DateTime, Utc};
use tantivy::query::{
    AllQuery, BooleanQuery, EmptyQuery, FuzzyTermQuery, Occur, PhraseQuery, Query, RangeQuery,
    RegexQuery, TermQuery,
};
use tantivy::schema::{Field, IndexRecordOption};
use tantivy::tokenizer::TokenStream;
use tantivy::{Index, Term};

use super::document::IndexType;
use super::error::{StoreError, StoreResult};
use super::schema::{StoreSchema, normalize_reference};

/// Filters and pagination for [`Store::list`](super::Store::list).
///
/// Every filter that is set must match (AND). `references` match if any
/// of them does. Empty strings count as unset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListOptions {
    /// Free text, matched fuzzily or as a substring against the searchable fields.
    pub query: Option<String>,
    pub kind: Option<IndexType>,
    /// Each entry matches that reference or any descendant of it.
    pub references: Vec<String>,
    /// Phrase filters.
    pub name: Option<String>,
    pub category: Option<String>,
    pub state: Option<String>,
    /// Exact resource path.
    pub resource: Option<String>,
    /// Exact operation id.
    pub operation: Option<String>,
    /// Inclusive on both ends.
    pub date_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    /// Page size; the store's default when `None`.
    pub size: Option<usize>,
    pub from: usize,
}

impl ListOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(mut self, text: impl Into<String>) -> Self {
        self.query = Some(text.into());
        self
    }

    pub fn kind(mut self, kind: IndexType) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn reference(mut self, reference: impl Into<String>) -> Self {
        self.references.push(reference.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    pub fn date_range(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.date_range = Some((start, end));
        self
    }

    pub fn size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    /// Skip the first `from` hits.
    pub fn offset(mut self, from: usize) -> Self {
        self.from = from;
        self
    }
}

fn set(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Builds tantivy queries against one index.
pub(crate) struct QueryBuilder<'a> {
    index: &'a Index,
    fields: &'a StoreSchema,
    fuzziness: u8,
}

impl<'a> QueryBuilder<'a> {
    pub fn new(index: &'a Index, fields: &'a StoreSchema, fuzziness: u8) -> Self {
        // Levenshtein automata are only built up to distance 2
        Self {
            index,
            fields,
            fuzziness: fuzziness.min(2),
        }
    }

    pub fn build(&self, options: &ListOptions) -> StoreResult<Box<dyn Query>> {
        let f = self.fields;
        let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();

        if let Some(kind) = options.kind {
            clauses.push((Occur::Must, exact(f.kind, kind.as_str())));
        }

        let references: Vec<Box<dyn Query>> = options
            .references
            .iter()
            .filter(|r| !r.is_empty())
            .map(|r| exact(f.reference_path, &normalize_reference(r)))
            .collect();
        if !references.is_empty() {
            clauses.push((Occur::Must, any_of(references)));
        }

        for (field, value) in [
            (f.name, set(&options.name)),
            (f.category, set(&options.category)),
            (f.state, set(&options.state)),
        ] {
            if let Some(value) = value {
                clauses.push((Occur::Must, self.phrase(field, value)?));
            }
        }

        if let Some(resource) = set(&options.resource) {
            clauses.push((Occur::Must, exact(f.resources, resource)));
        }
        if let Some(operation) = set(&options.operation) {
            clauses.push((Occur::Must, exact(f.operations, operation)));
        }

        if let Some((start, end)) = options.date_range {
            if start > end {
                return Err(StoreError::Query(format!(
                    "date range starts after it ends ({start} > {end})"
                )));
            }
            clauses.push((
                Occur::Must,
                Box::new(RangeQuery::new(
                    Bound::Included(Term::from_field_i64(f.date, start.timestamp_millis())),
                    Bound::Included(Term::from_field_i64(f.date, end.timestamp_millis())),
                )),
            ));
        }

        if let Some(text) = set(&options.query) {
            if let Some(free_text) = self.free_text(text)? {
                clauses.push((Occur::Must, free_text));
            }
        }

        if clauses.is_empty() {
            return Ok(Box::new(AllQuery));
        }
        Ok(Box::new(BooleanQuery::new(clauses)))
    }

    fn tokens(&self, field: Field, text: &str) -> StoreResult<Vec<String>> {
        let mut analyzer = self.index.tokenizer_for_field(field)?;
        let mut stream = analyzer.token_stream(text);
        let mut tokens = Vec::new();
        while stream.advance() {
            tokens.push(stream.token().text.clone());
        }
        Ok(tokens)
    }

    /// Match `text` as a phrase in a tokenized field.
    fn phrase(&self, field: Field, text: &str) -> StoreResult<Box<dyn Query>> {
        let mut terms: Vec<Term> = self
            .tokens(field, text)?
            .iter()
            .map(|token| Term::from_field_text(field, token))
            .collect();

        Ok(match terms.len() {
            // Nothing indexable (punctuation only), so nothing can match
            0 => Box::new(EmptyQuery),
            1 => Box::new(TermQuery::new(
                terms.remove(0),
                IndexRecordOption::WithFreqs,
            )),
            _ => Box::new(PhraseQuery::new(terms)),
        })
    }

    /// Every token matches fuzzily or as a substring; any token may hit.
    fn free_text(&self, text: &str) -> StoreResult<Option<Box<dyn Query>>> {
        let search = self.fields.search;
        let mut alternatives: Vec<Box<dyn Query>> = Vec::new();

        for token in self.tokens(search, text)? {
            let term = Term::from_field_text(search, &token);
            alternatives.push(Box::new(FuzzyTermQuery::new(term, self.fuzziness, true)));

            let pattern = format!(".*{}.*", regex::escape(&token));
            alternatives.push(Box::new(RegexQuery::from_pattern(&pattern, search)?));
        }

        if alternatives.is_empty() {
            return Ok(None);
        }
        Ok(Some(any_of(alternatives)))
    }
}

fn exact(field: Field, value: &str) -> Box<dyn Query> {
    Box::new(TermQuery::new(
        Term::from_field_text(field, value),
        IndexRecordOption::Basic,
    ))
}

fn any_of(mut queries: Vec<Box<dyn Query>>) -> Box<dyn Query> {
    if queries.len() == 1 {
        return queries.remove(0);
    }
    Box::new(BooleanQuery::new(
        queries.into_iter().map(|q| (Occur::Should, q)).collect(),
    ))
}
