//! Named channels and payloads published by the store.
//!
//! Subscribe with a typed-event listener:
//!
//! ```ignore
//! dispatcher.subscribe(&scope, STORE_INSERT_CHANNEL, |event: &mut StoreEvent| -> anyhow::Result<()> {
//!     println!("{} {} updated", event.kind, event.id);
//!     Ok(())
//! }, 0)?;
//! ```

use uuid::Uuid;

pub use crate::dispatcher::{Event, EventState};
use crate::store::IndexType;

/// Emitted after an existing document was overwritten.
pub const STORE_INSERT_CHANNEL: &str = "store.insert";

/// Emitted after a document was removed.
pub const STORE_REMOVE_CHANNEL: &str = "store.remove";

/// Payload of the store channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreEvent {
    pub id: Uuid,
    pub kind: IndexType,
    state: EventState,
}

impl StoreEvent {
    pub fn new(id: Uuid, kind: IndexType) -> Self {
        Self {
            id,
            kind,
            state: EventState::new(),
        }
    }
}

impl Event for StoreEvent {
    fn stop_propagation(&mut self) {
        self.state.stop_propagation();
    }

    fn is_propagation_stopped(&self) -> bool {
        self.state.is_propagation_stopped()
    }
}
