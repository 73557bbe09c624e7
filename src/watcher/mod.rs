//! Debounced recursive file watcher.
//!
//! The watcher owns a set of non-overlapping root directories and turns
//! raw OS events below them into per-object update/remove callbacks on an
//! injected [`ObjectHandler`].
//!
//! # Architecture
//!
//! ```text
//! Watcher
//!   - RootRegistry (one notify watcher + monitor task per root)
//!   - Debouncer (one timer and lock per object path)
//!         |
//!   ObjectHandler
//!     is_watchable -> resolve_object_path -> update_object / remove_object
//! ```

mod debouncer;
mod error;
mod filter;
mod handler;
mod root_registry;
mod root_watcher;

pub use debouncer::{Change, ChangeKind, Debouncer, Sink, SinkFuture};
pub use error::{WatchError, WatchResult};
pub use filter::{ObjectResolver, WatchFilter};
pub use handler::ObjectHandler;
pub use root_registry::RootState;
pub use root_watcher::{Watcher, WatcherBuilder, WatcherConfig};
