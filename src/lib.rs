//! Local data-plane for project folders: a typed event dispatcher, a
//! debounced recursive file watcher and an in-memory searchable index
//! that publishes its mutations.

pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod events;
pub mod logging;
pub mod metrics;
pub mod repository;
pub mod store;
pub mod watcher;

pub use config::Settings;
pub use dispatcher::{Args, DispatchError, Dispatcher, Subscription};
pub use events::{STORE_INSERT_CHANNEL, STORE_REMOVE_CHANNEL, StoreEvent};
pub use metrics::{Aggregate, Metric, MetricService};
pub use repository::{DocumentLoader, IndexRepository, ManifestLoader};
pub use store::{IndexDocument, IndexType, ListOptions, Store, StoreError};
pub use watcher::{ObjectHandler, WatchError, Watcher, WatcherConfig};
