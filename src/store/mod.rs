//! Typed, queryable in-memory document index.
//!
//! Backed by a RAM-only tantivy index; rebuilt from disk by the watchers
//! on every start. Mutations are published through the
//! [`Dispatcher`](crate::dispatcher::Dispatcher) on the channels in
//! [`events`](crate::events).

mod document;
mod error;
mod index_store;
mod query;
mod schema;

pub use document::{IndexDocument, IndexType};
pub use error::{StoreError, StoreResult};
pub use index_store::Store;
pub use query::ListOptions;
pub use schema::{StoreSchema, normalize_reference, reference_ancestors};
