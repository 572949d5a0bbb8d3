//! Named-event observer registry.
//!
//! Callers attach observers to the events a download emits; delivery is
//! synchronous on the coordinator's task, so handlers block the coordinator
//! and must be quick. Connect and disconnect are meant to happen before the
//! download starts, which is why no locking is involved.

use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Debug { message: String, part: Option<u32> },
    Info { message: String, part: Option<u32> },
    /// Effective duration of the download, in seconds.
    GotDuration(f64),
    /// Declared size of the remote file, in bytes.
    GotFilesize(u64),
    PartFinished(u32),
    PartFailed(u32),
    Progress { fraction: f64, part: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Debug,
    Info,
    GotDuration,
    GotFilesize,
    PartFinished,
    PartFailed,
    Progress,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Debug { .. } => EventKind::Debug,
            Event::Info { .. } => EventKind::Info,
            Event::GotDuration(_) => EventKind::GotDuration,
            Event::GotFilesize(_) => EventKind::GotFilesize,
            Event::PartFinished(_) => EventKind::PartFinished,
            Event::PartFailed(_) => EventKind::PartFailed,
            Event::Progress { .. } => EventKind::Progress,
        }
    }
}

/// Opaque handle returned by [`EventBus::connect`], accepted by
/// [`EventBus::disconnect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type Handler = Box<dyn FnMut(&Event) + Send>;

#[derive(Default)]
pub struct EventBus {
    next_id: u64,
    handlers: HashMap<EventKind, Vec<(HandlerId, Handler)>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect<F>(&mut self, kind: EventKind, handler: F) -> HandlerId
    where
        F: FnMut(&Event) + Send + 'static,
    {
        let id = HandlerId(self.next_id);
        self.next_id += 1;
        self.handlers
            .entry(kind)
            .or_default()
            .push((id, Box::new(handler)));
        id
    }

    /// Remove a previously connected handler. Returns whether it was found.
    pub fn disconnect(&mut self, id: HandlerId) -> bool {
        for handlers in self.handlers.values_mut() {
            if let Some(at) = handlers.iter().position(|(handler_id, _)| *handler_id == id) {
                handlers.remove(at);
                return true;
            }
        }
        false
    }

    pub fn emit(&mut self, event: &Event) {
        if let Some(handlers) = self.handlers.get_mut(&event.kind()) {
            for (_, handler) in handlers.iter_mut() {
                handler(event);
            }
        }
    }
}
