//! Named event dispatch.
//!
//! Items, connections, and boards all notify observers the same way: a
//! listener is registered either for one event name or for every event
//! (wildcard), and `emit` calls them synchronously after the state change
//! has been applied.

use std::fmt;

/// An event that can be dispatched by name.
pub trait NamedEvent {
    /// Wire-style name of the event (e.g. `"move"`, `"connUpdate"`).
    fn name(&self) -> &'static str;
}

type Listener<E> = Box<dyn FnMut(&E)>;

/// Per-event dispatch table.
///
/// Named listeners run first, then wildcard listeners; each group runs in
/// registration order.
pub struct Emitter<E> {
    named: Vec<(&'static str, Listener<E>)>,
    wildcard: Vec<Listener<E>>,
}

impl<E: NamedEvent> Emitter<E> {
    /// Create an emitter with no listeners.
    pub fn new() -> Self {
        Self {
            named: Vec::new(),
            wildcard: Vec::new(),
        }
    }

    /// Register a listener for a single event name.
    pub fn on(&mut self, name: &'static str, listener: impl FnMut(&E) + 'static) {
        self.named.push((name, Box::new(listener)));
    }

    /// Register a listener for every event.
    pub fn on_any(&mut self, listener: impl FnMut(&E) + 'static) {
        self.wildcard.push(Box::new(listener));
    }

    /// Dispatch an event to local listeners.
    pub fn emit(&mut self, event: &E) {
        let name = event.name();
        for (_, listener) in self.named.iter_mut().filter(|(n, _)| *n == name) {
            listener(event);
        }
        for listener in &mut self.wildcard {
            listener(event);
        }
    }

    /// Number of registered listeners (named and wildcard).
    pub fn listener_count(&self) -> usize {
        self.named.len() + self.wildcard.len()
    }

    /// Drop every listener.
    pub fn clear(&mut self) {
        self.named.clear();
        self.wildcard.clear();
    }
}

impl<E: NamedEvent> Default for Emitter<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for Emitter<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("named", &self.named.iter().map(|(n, _)| *n).collect::<Vec<_>>())
            .field("wildcard", &self.wildcard.len())
            .finish()
    }
}
