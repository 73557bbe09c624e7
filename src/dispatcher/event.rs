//! Typed events that can halt propagation.

use std::any::Any;

/// An event object passed to typed listeners.
///
/// A listener that calls [`Event::stop_propagation`] prevents every
/// listener after it (in dispatch order) from seeing the same emission.
pub trait Event: Any + Send {
    /// Stop the event from reaching further listeners.
    fn stop_propagation(&mut self);

    /// Whether a listener has stopped propagation.
    fn is_propagation_stopped(&self) -> bool;
}

/// Reusable propagation flag for event payloads.
///
/// Embed it in a payload struct and delegate the [`Event`] methods to it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventState {
    stopped: bool,
}

impl EventState {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Event for EventState {
    fn stop_propagation(&mut self) {
        self.stopped = true;
    }

    fn is_propagation_stopped(&self) -> bool {
        self.stopped
    }
}
