//! In-process publish/subscribe.
//!
//! Listeners subscribe to an event name under a cancellation scope and are
//! invoked on [`Dispatcher::emit`] with a type-erased [`Args`] pack. Each
//! name has a fixed [`Signature`] set by its first listener.

mod args;
mod bus;
mod error;
mod event;
mod listener;

pub use args::Args;
pub use bus::{Dispatcher, ListenerInfo, Subscription};
pub use error::{DispatchError, DispatchResult};
pub use event::{Event, EventState};
pub use listener::{EventMarker, Flow, IntoListener, Listener, ParamType, Signature};
